//! Workflow event log.
//!
//! Lifecycle events are appended by the runner and the escalation manager in
//! the same transaction as the state change they describe. Trigger evaluation
//! reads the newest `completed` event to detect approvals.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::Database;
use crate::error::StoreError;
use crate::util::{json_column, new_id, now, parse_timestamp, parsed_column, timestamp_column};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    Completed,
    Rejected,
    Escalated,
    Paused,
    Resumed,
    Failed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::Completed => "completed",
            EventType::Rejected => "rejected",
            EventType::Escalated => "escalated",
            EventType::Paused => "paused",
            EventType::Resumed => "resumed",
            EventType::Failed => "failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(EventType::Started),
            "completed" => Ok(EventType::Completed),
            "rejected" => Ok(EventType::Rejected),
            "escalated" => Ok(EventType::Escalated),
            "paused" => Ok(EventType::Paused),
            "resumed" => Ok(EventType::Resumed),
            "failed" => Ok(EventType::Failed),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

/// A recorded lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: String,
    pub run_id: String,
    pub event_type: EventType,
    /// Who or what caused the event (step name, approver, component).
    pub agent: Option<String>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

const EVENT_COLUMNS: &str = "id, run_id, event_type, agent, data, created_at";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowEvent> {
    Ok(WorkflowEvent {
        id: row.get(0)?,
        run_id: row.get(1)?,
        event_type: parsed_column(row, 2)?,
        agent: row.get(3)?,
        data: json_column(row, 4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

/// Append an event.
pub fn record_event(
    conn: &Connection,
    run_id: &str,
    event_type: EventType,
    agent: Option<&str>,
    data: &Value,
) -> Result<WorkflowEvent, StoreError> {
    let id = new_id("evt");
    let created_at = now();
    conn.execute(
        "INSERT INTO workflow_events (id, run_id, event_type, agent, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            run_id,
            event_type.as_str(),
            agent,
            serde_json::to_string(data)?,
            created_at
        ],
    )?;

    Ok(WorkflowEvent {
        id,
        run_id: run_id.to_string(),
        event_type,
        agent: agent.map(str::to_string),
        data: data.clone(),
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Newest event of `event_type` for a run.
pub fn latest_event(
    conn: &Connection,
    run_id: &str,
    event_type: EventType,
) -> Result<Option<WorkflowEvent>, StoreError> {
    let sql = format!(
        "SELECT {} FROM workflow_events WHERE run_id = ?1 AND event_type = ?2
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
        EVENT_COLUMNS
    );
    let event = conn
        .query_row(&sql, params![run_id, event_type.as_str()], event_from_row)
        .optional()?;
    Ok(event)
}

/// All events of a run, oldest first.
pub fn list_events(conn: &Connection, run_id: &str) -> Result<Vec<WorkflowEvent>, StoreError> {
    let sql = format!(
        "SELECT {} FROM workflow_events WHERE run_id = ?1 ORDER BY rowid",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map([run_id], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Async access to the event log.
#[derive(Clone)]
pub struct EventLog {
    db: Database,
}

impl EventLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        run_id: &str,
        event_type: EventType,
        agent: Option<&str>,
        data: Value,
    ) -> Result<WorkflowEvent, StoreError> {
        let run_id = run_id.to_string();
        let agent = agent.map(str::to_string);
        self.db
            .call(move |conn| record_event(conn, &run_id, event_type, agent.as_deref(), &data))
            .await
    }

    pub async fn latest(
        &self,
        run_id: &str,
        event_type: EventType,
    ) -> Result<Option<WorkflowEvent>, StoreError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| latest_event(conn, &run_id, event_type))
            .await
    }

    pub async fn list(&self, run_id: &str) -> Result<Vec<WorkflowEvent>, StoreError> {
        let run_id = run_id.to_string();
        self.db.call(move |conn| list_events(conn, &run_id)).await
    }
}
