//! Rejection tracker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use folio_config::EscalationConfig;
use folio_store::rusqlite::{Connection, OptionalExtension, Row, params};
use folio_store::{
    Database, new_id, now, optional_timestamp_column, parse_timestamp, parsed_column,
    timestamp_column,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::RejectionCategory;
use crate::error::EscalationError;

#[cfg(test)]
#[path = "rejection_tests.rs"]
mod tests;

/// A recorded step failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub id: String,
    pub run_id: String,
    pub category: RejectionCategory,
    pub reason: String,
    /// Position of this failure within `(run_id, category)`, starting at 1.
    pub retry_count: u32,
    /// Workflow event that caused the rejection, if any.
    pub event_id: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input for [`RejectionTracker::record_rejection`].
#[derive(Debug, Clone)]
pub struct NewRejection {
    pub run_id: String,
    pub category: RejectionCategory,
    pub reason: String,
    pub event_id: Option<String>,
}

impl NewRejection {
    pub fn new(
        run_id: impl Into<String>,
        category: RejectionCategory,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            category,
            reason: reason.into(),
            event_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

const REJECTION_COLUMNS: &str =
    "id, run_id, category, reason, retry_count, event_id, resolved, created_at, resolved_at";

fn rejection_from_row(row: &Row<'_>) -> folio_store::rusqlite::Result<Rejection> {
    Ok(Rejection {
        id: row.get(0)?,
        run_id: row.get(1)?,
        category: parsed_column(row, 2)?,
        reason: row.get(3)?,
        retry_count: row.get(4)?,
        event_id: row.get(5)?,
        resolved: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
        resolved_at: optional_timestamp_column(row, 8)?,
    })
}

pub(crate) fn retry_count(
    conn: &Connection,
    run_id: &str,
    category: RejectionCategory,
) -> Result<u32, EscalationError> {
    let count: u32 = conn.query_row(
        "SELECT COALESCE(MAX(retry_count), 0) FROM rejections WHERE run_id = ?1 AND category = ?2",
        params![run_id, category.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub(crate) fn get_rejection(conn: &Connection, id: &str) -> Result<Option<Rejection>, EscalationError> {
    let sql = format!("SELECT {} FROM rejections WHERE id = ?1", REJECTION_COLUMNS);
    Ok(conn.query_row(&sql, [id], rejection_from_row).optional()?)
}

fn query_rejections(
    conn: &Connection,
    filter: &str,
    run_id: &str,
) -> Result<Vec<Rejection>, EscalationError> {
    let sql = format!(
        "SELECT {} FROM rejections WHERE run_id = ?1 {} ORDER BY rowid",
        REJECTION_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rejections = stmt
        .query_map([run_id], rejection_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rejections)
}

/// Rejections of one run, or of every run, in creation order.
pub(crate) fn list_rejections(
    conn: &Connection,
    run_id: Option<&str>,
) -> Result<Vec<Rejection>, EscalationError> {
    match run_id {
        Some(run_id) => query_rejections(conn, "", run_id),
        None => {
            let sql = format!("SELECT {} FROM rejections ORDER BY rowid", REJECTION_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rejections = stmt
                .query_map([], rejection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rejections)
        }
    }
}

/// Durable per-`(run, category)` retry counters.
#[derive(Clone)]
pub struct RejectionTracker {
    db: Database,
    threshold: u32,
    overrides: HashMap<RejectionCategory, u32>,
}

impl RejectionTracker {
    /// Create a tracker that escalates once a counter reaches `threshold`.
    pub fn new(db: Database, threshold: u32) -> Self {
        Self {
            db,
            threshold,
            overrides: HashMap::new(),
        }
    }

    /// Create a tracker with the threshold and per-category `max_retries`
    /// of an `[escalation]` section. Unknown category keys are skipped.
    pub fn from_config(db: Database, config: &EscalationConfig) -> Self {
        let overrides = config
            .max_retries
            .iter()
            .filter_map(|(category, max)| {
                category
                    .parse::<RejectionCategory>()
                    .ok()
                    .map(|category| (category, *max))
            })
            .collect();
        Self {
            db,
            threshold: config.threshold,
            overrides,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn threshold_for(&self, category: RejectionCategory) -> u32 {
        self.overrides
            .get(&category)
            .copied()
            .unwrap_or(self.threshold)
    }

    /// Record a rejection on an open connection or transaction.
    ///
    /// The retry count is one more than the highest count ever recorded for
    /// the pair, so it never decreases even after rejections are resolved.
    pub fn record_in(
        &self,
        conn: &Connection,
        rejection: &NewRejection,
    ) -> Result<Rejection, EscalationError> {
        let retry_count = retry_count(conn, &rejection.run_id, rejection.category)? + 1;
        let id = new_id("rej");
        let created_at = now();

        conn.execute(
            "INSERT INTO rejections (id, run_id, category, reason, retry_count, event_id, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                id,
                rejection.run_id,
                rejection.category.as_str(),
                rejection.reason,
                retry_count,
                rejection.event_id,
                created_at
            ],
        )?;

        debug!(
            "Recorded {} rejection #{} for run {}",
            rejection.category, retry_count, rejection.run_id
        );

        Ok(Rejection {
            id,
            run_id: rejection.run_id.clone(),
            category: rejection.category,
            reason: rejection.reason.clone(),
            retry_count,
            event_id: rejection.event_id.clone(),
            resolved: false,
            created_at: parse_timestamp(&created_at)?,
            resolved_at: None,
        })
    }

    /// Unresolved rejections of `(run_id, category)`, the failures since the
    /// run was last resumed by a human.
    pub fn unresolved_count_in(
        &self,
        conn: &Connection,
        run_id: &str,
        category: RejectionCategory,
    ) -> Result<u32, EscalationError> {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM rejections WHERE run_id = ?1 AND category = ?2 AND resolved = 0",
            params![run_id, category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark every unresolved rejection of a run resolved. Returns how many changed.
    pub fn resolve_all_in(&self, conn: &Connection, run_id: &str) -> Result<usize, EscalationError> {
        let changed = conn.execute(
            "UPDATE rejections SET resolved = 1, resolved_at = ?1 WHERE run_id = ?2 AND resolved = 0",
            params![now(), run_id],
        )?;
        Ok(changed)
    }

    /// Record a rejection and return it with its freshly computed retry count.
    pub async fn record_rejection(&self, rejection: NewRejection) -> Result<Rejection, EscalationError> {
        let tracker = self.clone();
        self.db
            .transaction(move |tx| tracker.record_in(tx, &rejection))
            .await
    }

    /// Current retry count for `(run_id, category)`, 0 when none recorded.
    pub async fn get_retry_count(
        &self,
        run_id: &str,
        category: RejectionCategory,
    ) -> Result<u32, EscalationError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| retry_count(conn, &run_id, category))
            .await
    }

    pub async fn should_escalate(
        &self,
        run_id: &str,
        category: RejectionCategory,
    ) -> Result<bool, EscalationError> {
        Ok(self.get_retry_count(run_id, category).await? >= self.threshold_for(category))
    }

    /// Mark a rejection resolved. Resolving twice is a no-op.
    pub async fn resolve_rejection(&self, id: &str) -> Result<Rejection, EscalationError> {
        let id = id.to_string();
        self.db
            .transaction(move |tx| {
                let changed = tx.execute(
                    "UPDATE rejections SET resolved = 1, resolved_at = COALESCE(resolved_at, ?1)
                     WHERE id = ?2",
                    params![now(), id],
                )?;
                if changed == 0 {
                    return Err(EscalationError::RejectionNotFound(id));
                }
                get_rejection(tx, &id)?.ok_or(EscalationError::RejectionNotFound(id))
            })
            .await
    }

    pub async fn get_rejection(&self, id: &str) -> Result<Option<Rejection>, EscalationError> {
        let id = id.to_string();
        self.db.call(move |conn| get_rejection(conn, &id)).await
    }

    /// All rejections of a run in creation order.
    pub async fn get_rejections_for_run(&self, run_id: &str) -> Result<Vec<Rejection>, EscalationError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| query_rejections(conn, "", &run_id))
            .await
    }

    pub async fn get_unresolved_rejections(
        &self,
        run_id: &str,
    ) -> Result<Vec<Rejection>, EscalationError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| query_rejections(conn, "AND resolved = 0", &run_id))
            .await
    }

    pub async fn resolve_all_for_run(&self, run_id: &str) -> Result<usize, EscalationError> {
        let tracker = self.clone();
        let run_id = run_id.to_string();
        self.db
            .transaction(move |tx| tracker.resolve_all_in(tx, &run_id))
            .await
    }
}
