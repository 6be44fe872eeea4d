//! Trigger engine.

use folio_store::rusqlite::{Connection, OptionalExtension, Row, params};
use folio_store::{
    Database, EventType, json_column, latest_event, new_id, now, parse_timestamp, parsed_column,
    timestamp_column,
};
use folio_workflow::{RunStatus, WorkflowRun, WorkflowRunner};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TriggerError;
use crate::trigger::{NewTrigger, Trigger, TriggerCondition};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Outcome of evaluating one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResult {
    pub trigger_id: String,
    pub trigger_name: String,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_run_id: Option<String>,
    pub reason: String,
}

impl TriggerResult {
    fn skipped(trigger: &Trigger, reason: impl Into<String>) -> Self {
        Self {
            trigger_id: trigger.id.clone(),
            trigger_name: trigger.name.clone(),
            triggered: false,
            new_run_id: None,
            reason: reason.into(),
        }
    }
}

const TRIGGER_COLUMNS: &str =
    "id, name, source_workflow, target_workflow, condition, enabled, config, created_at, updated_at";

fn trigger_from_row(row: &Row<'_>) -> folio_store::rusqlite::Result<Trigger> {
    Ok(Trigger {
        id: row.get(0)?,
        name: row.get(1)?,
        source_workflow: row.get(2)?,
        target_workflow: row.get(3)?,
        condition: parsed_column(row, 4)?,
        enabled: row.get(5)?,
        config: json_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

fn get_trigger(conn: &Connection, id: &str) -> Result<Option<Trigger>, TriggerError> {
    let trigger = conn
        .query_row(
            &format!("SELECT {} FROM triggers WHERE id = ?1", TRIGGER_COLUMNS),
            [id],
            trigger_from_row,
        )
        .optional()?;
    Ok(trigger)
}

fn require_trigger(conn: &Connection, id: &str) -> Result<Trigger, TriggerError> {
    get_trigger(conn, id)?.ok_or_else(|| TriggerError::TriggerNotFound(id.to_string()))
}

fn query_triggers(
    conn: &Connection,
    source: Option<&str>,
) -> Result<Vec<Trigger>, TriggerError> {
    let triggers = match source {
        Some(source) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM triggers WHERE source_workflow = ?1 ORDER BY rowid",
                TRIGGER_COLUMNS
            ))?;
            stmt.query_map([source], trigger_from_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM triggers ORDER BY rowid",
                TRIGGER_COLUMNS
            ))?;
            stmt.query_map([], trigger_from_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(triggers)
}

/// Whether the newest `completed` event of a run carries `"approved": true`.
fn has_approval(conn: &Connection, run_id: &str) -> Result<bool, TriggerError> {
    let approved = latest_event(conn, run_id, EventType::Completed)?
        .and_then(|event| event.data.get("approved").and_then(|v| v.as_bool()))
        .unwrap_or(false);
    Ok(approved)
}

/// Starts dependent workflows when source runs complete.
///
/// The engine is consulted explicitly after a run completes; it does not
/// watch the store.
#[derive(Clone)]
pub struct TriggerEngine {
    db: Database,
    runner: WorkflowRunner,
}

impl TriggerEngine {
    pub fn new(runner: WorkflowRunner) -> Self {
        Self {
            db: runner.database().clone(),
            runner,
        }
    }

    pub async fn register_trigger(&self, input: NewTrigger) -> Result<Trigger, TriggerError> {
        let config = input.validate()?;
        self.db
            .call(move |conn| {
                let id = new_id("trig");
                let timestamp = now();
                conn.execute(
                    "INSERT INTO triggers (id, name, source_workflow, target_workflow, condition, enabled, config, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        id,
                        input.name,
                        input.source_workflow,
                        input.target_workflow,
                        input.condition.as_str(),
                        input.enabled,
                        serde_json::to_string(&config)?,
                        timestamp
                    ],
                )?;
                info!(
                    "Registered trigger {} ({}: {} -> {})",
                    id, input.condition, input.source_workflow, input.target_workflow
                );

                let created_at = parse_timestamp(&timestamp)?;
                Ok(Trigger {
                    id,
                    name: input.name,
                    source_workflow: input.source_workflow,
                    target_workflow: input.target_workflow,
                    condition: input.condition,
                    enabled: input.enabled,
                    config,
                    created_at,
                    updated_at: created_at,
                })
            })
            .await
    }

    pub async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>, TriggerError> {
        let id = id.to_string();
        self.db.call(move |conn| get_trigger(conn, &id)).await
    }

    /// All triggers in registration order.
    pub async fn list_triggers(&self) -> Result<Vec<Trigger>, TriggerError> {
        self.db.call(|conn| query_triggers(conn, None)).await
    }

    /// Triggers whose source is `workflow_type`, in registration order.
    pub async fn get_triggers_for_source(
        &self,
        workflow_type: &str,
    ) -> Result<Vec<Trigger>, TriggerError> {
        let workflow_type = workflow_type.to_string();
        self.db
            .call(move |conn| query_triggers(conn, Some(&workflow_type)))
            .await
    }

    pub async fn set_trigger_enabled(&self, id: &str, enabled: bool) -> Result<Trigger, TriggerError> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE triggers SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
                    params![enabled, now(), id],
                )?;
                if changed == 0 {
                    return Err(TriggerError::TriggerNotFound(id));
                }
                debug!("Trigger {} enabled = {}", id, enabled);
                require_trigger(conn, &id)
            })
            .await
    }

    pub async fn delete_trigger(&self, id: &str) -> Result<(), TriggerError> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM triggers WHERE id = ?1", [&id])?;
                if changed == 0 {
                    return Err(TriggerError::TriggerNotFound(id));
                }
                info!("Deleted trigger {}", id);
                Ok(())
            })
            .await
    }

    /// Evaluate every enabled trigger whose source matches a completed run.
    ///
    /// Runs that are not `completed` yield no results. Each firing trigger
    /// starts a run of its target for the same owner, fed by the completed
    /// run's output version.
    pub async fn check_triggers(&self, run_id: &str) -> Result<Vec<TriggerResult>, TriggerError> {
        let run = self
            .runner
            .get_run(run_id)
            .await?
            .ok_or_else(|| TriggerError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Completed {
            debug!("Run {} is {}, no triggers checked", run.id, run.status);
            return Ok(Vec::new());
        }

        let source = run.workflow_type.clone();
        let completed_id = run.id.clone();
        let (triggers, approved) = self
            .db
            .call(move |conn| {
                let triggers: Vec<Trigger> = query_triggers(conn, Some(&source))?
                    .into_iter()
                    .filter(|t| t.enabled)
                    .collect();
                let approved = has_approval(conn, &completed_id)?;
                Ok::<_, TriggerError>((triggers, approved))
            })
            .await?;

        let mut results = Vec::with_capacity(triggers.len());
        for trigger in &triggers {
            let result = match trigger.condition {
                TriggerCondition::Manual => TriggerResult::skipped(
                    trigger,
                    "Manual trigger requires explicit invocation",
                ),
                TriggerCondition::OnApprove if !approved => TriggerResult::skipped(
                    trigger,
                    "Condition \"on_approve\" not met: the run has no recorded approval",
                ),
                TriggerCondition::OnComplete | TriggerCondition::OnApprove => {
                    self.fire(trigger, &run.owner_id, Some(&run)).await
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Fire a trigger for `owner_id` regardless of its condition.
    pub async fn fire_trigger(&self, id: &str, owner_id: &str) -> Result<TriggerResult, TriggerError> {
        let trigger = self
            .get_trigger(id)
            .await?
            .ok_or_else(|| TriggerError::TriggerNotFound(id.to_string()))?;
        if !trigger.enabled {
            return Ok(TriggerResult::skipped(&trigger, "Trigger is disabled"));
        }
        Ok(self.fire(&trigger, owner_id, None).await)
    }

    async fn fire(&self, trigger: &Trigger, owner_id: &str, source: Option<&WorkflowRun>) -> TriggerResult {
        let input_version = source.and_then(|run| run.output_version_id.as_deref());
        match self
            .runner
            .start_with_input(&trigger.target_workflow, owner_id, input_version)
            .await
        {
            Ok(state) => {
                info!(
                    "Trigger {} started {} run {} for {}",
                    trigger.name, trigger.target_workflow, state.run_id, owner_id
                );
                TriggerResult {
                    trigger_id: trigger.id.clone(),
                    trigger_name: trigger.name.clone(),
                    triggered: true,
                    new_run_id: Some(state.run_id),
                    reason: format!("Trigger \"{}\" fired", trigger.name),
                }
            }
            Err(e) => {
                warn!("Trigger {} could not start {}: {}", trigger.name, trigger.target_workflow, e);
                TriggerResult::skipped(
                    trigger,
                    format!("Failed to start {}: {}", trigger.target_workflow, e),
                )
            }
        }
    }
}
