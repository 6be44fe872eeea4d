//! Cross-run artifact queries and lineage.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, SecondsFormat, Utc};
use folio_store::rusqlite::{self, Connection, OptionalExtension, Row, params_from_iter};
use folio_store::{Database, parsed_column};
use folio_workflow::{PipelineStage, RunStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ArtifactError;
use crate::kind::ArtifactKind;
use crate::registry::{ARTIFACT_COLUMNS, Artifact, artifact_from_row};

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;

/// Page size used by [`ArtifactQuery::search`] when none is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// An artifact joined with the run that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub owner_id: String,
    pub workflow_type: String,
    pub run_status: RunStatus,
}

/// Filters for [`ArtifactQuery::search`]. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSearchCriteria {
    pub owner_id: Option<String>,
    pub workflow_type: Option<String>,
    pub artifact_type: Option<ArtifactKind>,
    pub run_status: Option<RunStatus>,
    /// Exclusive lower bound on creation time.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time.
    pub created_before: Option<DateTime<Utc>>,
}

impl ArtifactSearchCriteria {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn with_workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    pub fn with_artifact_type(mut self, kind: ArtifactKind) -> Self {
        self.artifact_type = Some(kind);
        self
    }

    pub fn with_run_status(mut self, status: RunStatus) -> Self {
        self.run_status = Some(status);
        self
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(owner_id) = &self.owner_id {
            values.push(owner_id.clone());
            clauses.push(format!("r.owner_id = ?{}", values.len()));
        }
        if let Some(workflow_type) = &self.workflow_type {
            values.push(workflow_type.clone());
            clauses.push(format!("r.workflow_type = ?{}", values.len()));
        }
        if let Some(kind) = self.artifact_type {
            values.push(kind.as_str().to_string());
            clauses.push(format!("a.artifact_type = ?{}", values.len()));
        }
        if let Some(status) = self.run_status {
            values.push(status.as_str().to_string());
            clauses.push(format!("r.status = ?{}", values.len()));
        }
        if let Some(after) = self.created_after {
            values.push(after.to_rfc3339_opts(SecondsFormat::Micros, true));
            clauses.push(format!("a.created_at > ?{}", values.len()));
        }
        if let Some(before) = self.created_before {
            values.push(before.to_rfc3339_opts(SecondsFormat::Micros, true));
            clauses.push(format!("a.created_at < ?{}", values.len()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactQueryResult {
    pub artifacts: Vec<ArtifactRecord>,
    /// Matches ignoring pagination.
    pub total_count: usize,
    pub has_more: bool,
}

const RECORD_FROM: &str = "FROM artifacts a INNER JOIN workflow_runs r ON a.run_id = r.id";
const NEWEST_FIRST: &str = "ORDER BY a.created_at DESC, a.rowid DESC";

fn record_columns() -> String {
    let artifact_columns = ARTIFACT_COLUMNS
        .split(", ")
        .map(|column| format!("a.{}", column))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}, r.owner_id, r.workflow_type, r.status", artifact_columns)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        artifact: artifact_from_row(row)?,
        owner_id: row.get(6)?,
        workflow_type: row.get(7)?,
        run_status: parsed_column(row, 8)?,
    })
}

fn query_records(
    conn: &Connection,
    filter: &str,
    values: &[String],
    tail: &str,
) -> Result<Vec<ArtifactRecord>, ArtifactError> {
    let sql = format!(
        "SELECT {} {} {} {} {}",
        record_columns(),
        RECORD_FROM,
        filter,
        NEWEST_FIRST,
        tail
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values.iter()), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs whose output version is `run_id`'s input version, newest first.
fn upstream_runs(conn: &Connection, run_id: &str) -> Result<Vec<String>, ArtifactError> {
    let input_version: Option<String> = conn
        .query_row(
            "SELECT input_version_id FROM workflow_runs WHERE id = ?1",
            [run_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    let Some(input_version) = input_version else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT id FROM workflow_runs WHERE output_version_id = ?1 AND id != ?2
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let runs = stmt
        .query_map([input_version.as_str(), run_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(runs)
}

fn lineage(conn: &Connection, artifact_id: &str) -> Result<Vec<ArtifactRecord>, ArtifactError> {
    let start = query_records(conn, "WHERE a.id = ?1", &[artifact_id.to_string()], "")?;
    let Some(start) = start.into_iter().next() else {
        return Ok(Vec::new());
    };

    let mut seen_artifacts = HashSet::from([start.artifact.id.clone()]);
    let mut seen_runs = HashSet::from([start.artifact.run_id.clone()]);
    let mut queue = VecDeque::from([start.artifact.run_id.clone()]);
    let mut lineage = vec![start];

    while let Some(run_id) = queue.pop_front() {
        for upstream in upstream_runs(conn, &run_id)? {
            if !seen_runs.insert(upstream.clone()) {
                continue;
            }
            let records = query_records(conn, "WHERE a.run_id = ?1", &[upstream.clone()], "")?;
            for record in records {
                if seen_artifacts.insert(record.artifact.id.clone()) {
                    lineage.push(record);
                }
            }
            queue.push_back(upstream);
        }
    }

    debug!("Lineage of {} spans {} artifacts", artifact_id, lineage.len());
    Ok(lineage)
}

/// Read-only queries over the artifacts of all runs.
#[derive(Clone)]
pub struct ArtifactQuery {
    db: Database,
}

impl ArtifactQuery {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Matching artifacts newest first, `limit` defaulting to
    /// [`DEFAULT_SEARCH_LIMIT`].
    pub async fn search(
        &self,
        criteria: ArtifactSearchCriteria,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<ArtifactQueryResult, ArtifactError> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let offset = offset.unwrap_or(0);
        self.db
            .call(move |conn| {
                let (filter, values) = criteria.where_clause();
                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) {} {}", RECORD_FROM, filter),
                    params_from_iter(values.iter()),
                    |row| row.get(0),
                )?;
                let total_count = total as usize;
                let artifacts = query_records(
                    conn,
                    &filter,
                    &values,
                    &format!("LIMIT {} OFFSET {}", limit, offset),
                )?;
                let has_more = offset + artifacts.len() < total_count;
                Ok(ArtifactQueryResult {
                    artifacts,
                    total_count,
                    has_more,
                })
            })
            .await
    }

    /// The newest artifact of `kind` for a book.
    pub async fn find_latest_for_book(
        &self,
        owner_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<ArtifactRecord>, ArtifactError> {
        let values = vec![owner_id.to_string(), kind.as_str().to_string()];
        self.db
            .call(move |conn| {
                let mut found = query_records(
                    conn,
                    "WHERE r.owner_id = ?1 AND a.artifact_type = ?2",
                    &values,
                    "LIMIT 1",
                )?;
                Ok(found.pop())
            })
            .await
    }

    /// Artifacts of a book produced by runs of `workflow_type`, newest first.
    pub async fn find_by_workflow_type(
        &self,
        owner_id: &str,
        workflow_type: &str,
    ) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        let values = vec![owner_id.to_string(), workflow_type.to_string()];
        self.db
            .call(move |conn| {
                query_records(conn, "WHERE r.owner_id = ?1 AND r.workflow_type = ?2", &values, "")
            })
            .await
    }

    /// Artifacts a run of `workflow_type` would consume for a book.
    ///
    /// Only artifacts of completed runs of the dependency stages count, and
    /// only kinds those stages produce. Workflow types outside the pipeline
    /// have no dependencies.
    pub async fn find_dependencies(
        &self,
        workflow_type: &str,
        owner_id: &str,
    ) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        let Some(stage) = PipelineStage::from_workflow_type(workflow_type) else {
            return Ok(Vec::new());
        };
        let dependencies = stage.dependencies();
        if dependencies.is_empty() {
            return Ok(Vec::new());
        }

        let kinds: Vec<ArtifactKind> = dependencies
            .iter()
            .flat_map(|dep| ArtifactKind::produced_by(*dep))
            .collect();

        let mut values = vec![owner_id.to_string(), RunStatus::Completed.as_str().to_string()];
        let stage_list = placeholders(values.len() + 1, dependencies.len());
        values.extend(dependencies.iter().map(|dep| dep.as_str().to_string()));
        let kind_list = placeholders(values.len() + 1, kinds.len());
        values.extend(kinds.iter().map(|kind| kind.as_str().to_string()));

        let filter = format!(
            "WHERE r.owner_id = ?1 AND r.status = ?2 AND r.workflow_type IN ({}) AND a.artifact_type IN ({})",
            stage_list, kind_list
        );
        self.db
            .call(move |conn| query_records(conn, &filter, &values, ""))
            .await
    }

    /// The artifact followed by the artifacts of every run upstream of it.
    ///
    /// Upstream runs are those whose output version is a downstream run's
    /// input version, followed transitively. Each artifact appears once;
    /// an unknown id yields an empty list.
    pub async fn get_lineage(&self, artifact_id: &str) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        let artifact_id = artifact_id.to_string();
        self.db.call(move |conn| lineage(conn, &artifact_id)).await
    }
}
