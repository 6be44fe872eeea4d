//! Run records and their persistence.

use chrono::{DateTime, Utc};
use folio_store::rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use folio_store::{json_column, new_id, now, parse_timestamp, parsed_column, timestamp_column};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::error::WorkflowError;
use crate::status::{RunStatus, validate_transition};

/// One execution of a workflow definition for an owning entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_type: String,
    /// The book this run works on.
    pub owner_id: String,
    pub status: RunStatus,
    pub current_step: Option<String>,
    pub checkpoint: Checkpoint,
    pub input_version_id: Option<String>,
    pub output_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// A fresh `pending` run positioned at `initial_step`.
    pub fn new(
        workflow_type: impl Into<String>,
        owner_id: impl Into<String>,
        initial_step: impl Into<String>,
    ) -> Self {
        let initial_step = initial_step.into();
        let created_at = Utc::now();
        Self {
            id: new_id("run"),
            workflow_type: workflow_type.into(),
            owner_id: owner_id.into(),
            status: RunStatus::Pending,
            current_step: Some(initial_step.clone()),
            checkpoint: Checkpoint::new(initial_step),
            input_version_id: None,
            output_version_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Move to `to` along a legal edge.
    pub fn transition(&mut self, to: RunStatus) -> Result<(), WorkflowError> {
        validate_transition(self.status, to)?;
        info!("Run {}: {} -> {}", self.id, self.status, to);
        self.status = to;
        Ok(())
    }

    /// Position the run at `step`.
    pub fn set_step(&mut self, step: Option<String>) {
        self.checkpoint.current_step = step.clone();
        self.current_step = step;
    }
}

/// Criteria for [`list_runs`]. Empty criteria list every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    pub owner_id: Option<String>,
    pub status: Option<RunStatus>,
    pub workflow_type: Option<String>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }
}

const RUN_COLUMNS: &str = "id, workflow_type, owner_id, status, current_step, checkpoint, \
                           input_version_id, output_version_id, created_at, updated_at";

fn run_from_row(row: &Row<'_>) -> folio_store::rusqlite::Result<WorkflowRun> {
    Ok(WorkflowRun {
        id: row.get(0)?,
        workflow_type: row.get(1)?,
        owner_id: row.get(2)?,
        status: parsed_column(row, 3)?,
        current_step: row.get(4)?,
        checkpoint: json_column(row, 5)?,
        input_version_id: row.get(6)?,
        output_version_id: row.get(7)?,
        created_at: timestamp_column(row, 8)?,
        updated_at: timestamp_column(row, 9)?,
    })
}

pub fn insert_run(conn: &Connection, run: &WorkflowRun) -> Result<(), WorkflowError> {
    let created_at = run.created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    conn.execute(
        &format!(
            "INSERT INTO workflow_runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            RUN_COLUMNS
        ),
        params![
            run.id,
            run.workflow_type,
            run.owner_id,
            run.status.as_str(),
            run.current_step,
            serde_json::to_string(&run.checkpoint)?,
            run.input_version_id,
            run.output_version_id,
            created_at,
        ],
    )?;
    debug!("Inserted run {}", run.id);
    Ok(())
}

pub fn get_run(conn: &Connection, id: &str) -> Result<Option<WorkflowRun>, WorkflowError> {
    let run = conn
        .query_row(
            &format!("SELECT {} FROM workflow_runs WHERE id = ?1", RUN_COLUMNS),
            [id],
            run_from_row,
        )
        .optional()?;
    Ok(run)
}

pub fn require_run(conn: &Connection, id: &str) -> Result<WorkflowRun, WorkflowError> {
    get_run(conn, id)?.ok_or_else(|| WorkflowError::RunNotFound(id.to_string()))
}

/// Persist status, position, checkpoint and version links in one statement.
pub fn save_run(conn: &Connection, run: &mut WorkflowRun) -> Result<(), WorkflowError> {
    let updated_at = now();
    let changed = conn.execute(
        "UPDATE workflow_runs
         SET status = ?1, current_step = ?2, checkpoint = ?3,
             input_version_id = ?4, output_version_id = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            run.status.as_str(),
            run.current_step,
            serde_json::to_string(&run.checkpoint)?,
            run.input_version_id,
            run.output_version_id,
            updated_at,
            run.id,
        ],
    )?;
    if changed == 0 {
        return Err(WorkflowError::RunNotFound(run.id.clone()));
    }
    run.updated_at = parse_timestamp(&updated_at)?;
    Ok(())
}

/// Runs matching `filter`, newest first.
pub fn list_runs(conn: &Connection, filter: &RunFilter) -> Result<Vec<WorkflowRun>, WorkflowError> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(owner_id) = &filter.owner_id {
        values.push(owner_id.clone());
        clauses.push(format!("owner_id = ?{}", values.len()));
    }
    if let Some(status) = filter.status {
        values.push(status.as_str().to_string());
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(workflow_type) = &filter.workflow_type {
        values.push(workflow_type.clone());
        clauses.push(format!("workflow_type = ?{}", values.len()));
    }

    let mut sql = format!("SELECT {} FROM workflow_runs", RUN_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let runs = stmt
        .query_map(params_from_iter(values.iter()), run_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(runs)
}
