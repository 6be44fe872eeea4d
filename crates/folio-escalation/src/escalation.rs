//! Escalation manager.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use folio_config::EscalationConfig;
use folio_store::rusqlite::{Connection, OptionalExtension, Row, params};
use folio_store::{
    Database, EventType, new_id, now, optional_timestamp_column, parse_timestamp, parsed_column,
    record_event, timestamp_column,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::category::RejectionCategory;
use crate::error::EscalationError;
use crate::rejection::retry_count;
use crate::stats::EscalationStats;

#[cfg(test)]
#[path = "escalation_tests.rs"]
mod tests;

/// Lifecycle of an escalation. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Acknowledged,
    Resolved,
}

impl EscalationStatus {
    pub const ALL: [EscalationStatus; 3] = [
        EscalationStatus::Pending,
        EscalationStatus::Acknowledged,
        EscalationStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "pending",
            EscalationStatus::Acknowledged => "acknowledged",
            EscalationStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown escalation status '{}'", s))
    }
}

/// A durable request for human attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub run_id: String,
    pub category: RejectionCategory,
    /// Retry count observed when the escalation was created.
    pub retry_count: u32,
    pub target: String,
    pub status: EscalationStatus,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Outcome of [`EscalationManager::check_and_escalate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationCheck {
    /// An escalation exists for the pair, new or pre-existing.
    pub escalated: bool,
    /// The escalation was created by this call.
    pub created: bool,
    pub escalation: Option<Escalation>,
    pub reason: String,
}

const ESCALATION_COLUMNS: &str = "id, run_id, category, retry_count, target, status, resolution, \
                                  created_at, acknowledged_at, resolved_at";

fn escalation_from_row(row: &Row<'_>) -> folio_store::rusqlite::Result<Escalation> {
    Ok(Escalation {
        id: row.get(0)?,
        run_id: row.get(1)?,
        category: parsed_column(row, 2)?,
        retry_count: row.get(3)?,
        target: row.get(4)?,
        status: parsed_column(row, 5)?,
        resolution: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
        acknowledged_at: optional_timestamp_column(row, 8)?,
        resolved_at: optional_timestamp_column(row, 9)?,
    })
}

fn get_escalation(conn: &Connection, id: &str) -> Result<Option<Escalation>, EscalationError> {
    let sql = format!("SELECT {} FROM escalations WHERE id = ?1", ESCALATION_COLUMNS);
    Ok(conn.query_row(&sql, [id], escalation_from_row).optional()?)
}

/// The pending or acknowledged escalation of a pair, if any.
fn find_open_escalation(
    conn: &Connection,
    run_id: &str,
    category: RejectionCategory,
) -> Result<Option<Escalation>, EscalationError> {
    let sql = format!(
        "SELECT {} FROM escalations WHERE run_id = ?1 AND category = ?2 AND status != 'resolved'",
        ESCALATION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![run_id, category.as_str()], escalation_from_row)
        .optional()?)
}

fn latest_resolved_escalation(
    conn: &Connection,
    run_id: &str,
    category: RejectionCategory,
) -> Result<Option<Escalation>, EscalationError> {
    let sql = format!(
        "SELECT {} FROM escalations WHERE run_id = ?1 AND category = ?2 AND status = 'resolved'
         ORDER BY rowid DESC LIMIT 1",
        ESCALATION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![run_id, category.as_str()], escalation_from_row)
        .optional()?)
}

fn query_escalations(
    conn: &Connection,
    filter: &str,
    arg: Option<&str>,
) -> Result<Vec<Escalation>, EscalationError> {
    let sql = format!(
        "SELECT {} FROM escalations {} ORDER BY created_at, rowid",
        ESCALATION_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = match arg {
        Some(value) => stmt.query_map([value], escalation_from_row)?,
        None => stmt.query_map([], escalation_from_row)?,
    };
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn require_escalation(conn: &Connection, id: &str) -> Result<Escalation, EscalationError> {
    get_escalation(conn, id)?.ok_or_else(|| EscalationError::EscalationNotFound(id.to_string()))
}

/// Creates and tracks escalations once rejections reach the threshold.
#[derive(Clone)]
pub struct EscalationManager {
    db: Database,
    config: Arc<EscalationConfig>,
}

impl EscalationManager {
    pub fn new(db: Database, config: EscalationConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.config.threshold
    }

    /// Retry limit for a category, honoring `max_retries` overrides.
    pub fn threshold_for(&self, category: RejectionCategory) -> u32 {
        self.config.threshold_for(category.as_str())
    }

    /// Escalation target for a category.
    pub fn target_for(&self, category: RejectionCategory) -> &str {
        self.config.target_for(category.as_str())
    }

    /// Escalate `(run_id, category)` on an open connection or transaction.
    pub fn check_and_escalate_in(
        &self,
        conn: &Connection,
        run_id: &str,
        category: RejectionCategory,
    ) -> Result<EscalationCheck, EscalationError> {
        if let Some(existing) = find_open_escalation(conn, run_id, category)? {
            return Ok(EscalationCheck {
                escalated: true,
                created: false,
                reason: format!("Already escalated to {}", existing.target),
                escalation: Some(existing),
            });
        }

        // A resolved escalation re-arms after `threshold` further rejections.
        let count = retry_count(conn, run_id, category)?;
        let threshold = self.threshold_for(category);
        let required = latest_resolved_escalation(conn, run_id, category)?
            .map_or(threshold, |e| e.retry_count + threshold);
        if count < required {
            return Ok(EscalationCheck {
                escalated: false,
                created: false,
                escalation: None,
                reason: format!(
                    "Retry count ({}) has not reached threshold ({})",
                    count, required
                ),
            });
        }

        let target = self.target_for(category).to_string();
        let id = new_id("esc");
        let created_at = now();
        conn.execute(
            "INSERT INTO escalations (id, run_id, category, retry_count, target, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                run_id,
                category.as_str(),
                count,
                target,
                EscalationStatus::Pending.as_str(),
                created_at
            ],
        )?;

        if self.config.notify_human {
            record_event(
                conn,
                run_id,
                EventType::Escalated,
                Some(&target),
                &json!({
                    "escalation_id": id,
                    "category": category,
                    "retry_count": count,
                    "target": target,
                }),
            )?;
            warn!(
                "Run {} escalated to {} after {} {} rejections",
                run_id, target, count, category
            );
        }

        let reason = format!(
            "Retry count ({}) reached threshold ({}), escalated to {}",
            count, required, target
        );
        Ok(EscalationCheck {
            escalated: true,
            created: true,
            reason,
            escalation: Some(Escalation {
                id,
                run_id: run_id.to_string(),
                category,
                retry_count: count,
                target,
                status: EscalationStatus::Pending,
                resolution: None,
                created_at: parse_timestamp(&created_at)?,
                acknowledged_at: None,
                resolved_at: None,
            }),
        })
    }

    /// Whether the run has any escalation that is not yet resolved.
    pub fn has_unresolved_in(&self, conn: &Connection, run_id: &str) -> Result<bool, EscalationError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM escalations WHERE run_id = ?1 AND status != 'resolved'",
            [run_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Escalate when the retry count reached the threshold.
    ///
    /// Never opens a second escalation while one is pending or acknowledged.
    pub async fn check_and_escalate(
        &self,
        run_id: &str,
        category: RejectionCategory,
    ) -> Result<EscalationCheck, EscalationError> {
        let manager = self.clone();
        let run_id = run_id.to_string();
        self.db
            .transaction(move |tx| manager.check_and_escalate_in(tx, &run_id, category))
            .await
    }

    /// Move a pending escalation to acknowledged. Acknowledging twice is a no-op.
    pub async fn acknowledge_escalation(&self, id: &str) -> Result<Escalation, EscalationError> {
        let id = id.to_string();
        self.db
            .transaction(move |tx| {
                let escalation = require_escalation(tx, &id)?;
                match escalation.status {
                    EscalationStatus::Acknowledged => Ok(escalation),
                    EscalationStatus::Resolved => Err(EscalationError::InvalidTransition {
                        id,
                        from: EscalationStatus::Resolved,
                        to: EscalationStatus::Acknowledged,
                    }),
                    EscalationStatus::Pending => {
                        tx.execute(
                            "UPDATE escalations SET status = ?1, acknowledged_at = ?2 WHERE id = ?3",
                            params![EscalationStatus::Acknowledged.as_str(), now(), id],
                        )?;
                        info!("Escalation {} acknowledged", id);
                        require_escalation(tx, &id)
                    }
                }
            })
            .await
    }

    /// Resolve an escalation with a note.
    pub async fn resolve_escalation(
        &self,
        id: &str,
        resolution: &str,
    ) -> Result<Escalation, EscalationError> {
        let id = id.to_string();
        let resolution = resolution.to_string();
        self.db
            .transaction(move |tx| {
                let escalation = require_escalation(tx, &id)?;
                if escalation.status == EscalationStatus::Resolved {
                    return Err(EscalationError::InvalidTransition {
                        id,
                        from: EscalationStatus::Resolved,
                        to: EscalationStatus::Resolved,
                    });
                }
                tx.execute(
                    "UPDATE escalations SET status = ?1, resolution = ?2, resolved_at = ?3 WHERE id = ?4",
                    params![EscalationStatus::Resolved.as_str(), resolution, now(), id],
                )?;
                info!("Escalation {} resolved", id);
                require_escalation(tx, &id)
            })
            .await
    }

    pub async fn get_escalation(&self, id: &str) -> Result<Option<Escalation>, EscalationError> {
        let id = id.to_string();
        self.db.call(move |conn| get_escalation(conn, &id)).await
    }

    /// Escalations still waiting for acknowledgement, oldest first.
    pub async fn get_pending_escalations(&self) -> Result<Vec<Escalation>, EscalationError> {
        self.db
            .call(|conn| query_escalations(conn, "WHERE status = 'pending'", None))
            .await
    }

    /// Escalations of one run, oldest first.
    pub async fn get_escalations_for_workflow(
        &self,
        run_id: &str,
    ) -> Result<Vec<Escalation>, EscalationError> {
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| query_escalations(conn, "WHERE run_id = ?1", Some(&run_id)))
            .await
    }

    pub async fn list_escalations(&self) -> Result<Vec<Escalation>, EscalationError> {
        self.db.call(|conn| query_escalations(conn, "", None)).await
    }

    pub async fn has_unresolved(&self, run_id: &str) -> Result<bool, EscalationError> {
        let manager = self.clone();
        let run_id = run_id.to_string();
        self.db
            .call(move |conn| manager.has_unresolved_in(conn, &run_id))
            .await
    }

    /// Counts by status, category and target plus average latencies.
    pub async fn get_escalation_stats(&self) -> Result<EscalationStats, EscalationError> {
        let escalations = self.list_escalations().await?;
        Ok(EscalationStats::from_escalations(&escalations))
    }
}
