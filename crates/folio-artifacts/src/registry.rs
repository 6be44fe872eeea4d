//! Artifact registry.

use chrono::{DateTime, Utc};
use folio_store::rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use folio_store::{Database, json_column, new_id, now, parse_timestamp, parsed_column, timestamp_column};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::ArtifactError;
use crate::kind::ArtifactKind;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// A typed output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    pub artifact_type: ArtifactKind,
    /// Where the artifact lives; opaque to the registry.
    pub path: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`ArtifactRegistry::register`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArtifact {
    pub run_id: String,
    pub artifact_type: ArtifactKind,
    pub path: String,
    #[serde(default)]
    pub metadata: Value,
}

impl NewArtifact {
    pub fn new(run_id: impl Into<String>, artifact_type: ArtifactKind, path: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            artifact_type,
            path: path.into(),
            metadata: Value::Object(Map::new()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn validate(&self) -> Result<Map<String, Value>, ArtifactError> {
        if self.path.trim().is_empty() {
            return Err(ArtifactError::InvalidArtifactPath(self.path.clone()));
        }
        match &self.metadata {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            other => Err(ArtifactError::InvalidMetadata(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }
}

pub(crate) const ARTIFACT_COLUMNS: &str = "id, run_id, artifact_type, path, metadata, created_at";

pub(crate) fn artifact_from_row(row: &Row<'_>) -> folio_store::rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get(0)?,
        run_id: row.get(1)?,
        artifact_type: parsed_column(row, 2)?,
        path: row.get(3)?,
        metadata: json_column(row, 4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

fn query_artifacts(
    conn: &Connection,
    filter: &str,
    args: &[&str],
) -> Result<Vec<Artifact>, ArtifactError> {
    let sql = format!(
        "SELECT {} FROM artifacts WHERE {} ORDER BY rowid",
        ARTIFACT_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let artifacts = stmt
        .query_map(params_from_iter(args), artifact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(artifacts)
}

fn run_exists(conn: &Connection, run_id: &str) -> Result<bool, ArtifactError> {
    let found = conn
        .query_row("SELECT 1 FROM workflow_runs WHERE id = ?1", [run_id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Records the artifacts runs produce.
#[derive(Clone)]
pub struct ArtifactRegistry {
    db: Database,
}

impl ArtifactRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store an artifact for an existing run.
    pub async fn register(&self, input: NewArtifact) -> Result<Artifact, ArtifactError> {
        let metadata = input.validate()?;
        self.db
            .transaction(move |tx| {
                if !run_exists(tx, &input.run_id)? {
                    return Err(ArtifactError::RunNotFound(input.run_id));
                }

                let id = new_id("art");
                let created_at = now();
                tx.execute(
                    "INSERT INTO artifacts (id, run_id, artifact_type, path, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        input.run_id,
                        input.artifact_type.as_str(),
                        input.path,
                        serde_json::to_string(&metadata)?,
                        created_at
                    ],
                )?;
                info!(
                    "Registered {} artifact {} for run {}",
                    input.artifact_type, id, input.run_id
                );

                Ok(Artifact {
                    id,
                    run_id: input.run_id,
                    artifact_type: input.artifact_type,
                    path: input.path,
                    metadata,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Artifact>, ArtifactError> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                let mut found = query_artifacts(conn, "id = ?1", &[id.as_str()])?;
                Ok(found.pop())
            })
            .await
    }

    /// Artifacts of one run in registration order.
    pub async fn get_by_run_id(&self, run_id: &str) -> Result<Vec<Artifact>, ArtifactError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| query_artifacts(conn, "run_id = ?1", &[run_id.as_str()]))
            .await
    }

    pub async fn get_by_type(&self, kind: ArtifactKind) -> Result<Vec<Artifact>, ArtifactError> {
        self.db
            .call(move |conn| query_artifacts(conn, "artifact_type = ?1", &[kind.as_str()]))
            .await
    }

    pub async fn get_by_run_and_type(
        &self,
        run_id: &str,
        kind: ArtifactKind,
    ) -> Result<Vec<Artifact>, ArtifactError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| {
                query_artifacts(
                    conn,
                    "run_id = ?1 AND artifact_type = ?2",
                    &[run_id.as_str(), kind.as_str()],
                )
            })
            .await
    }
}
