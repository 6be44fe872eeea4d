//! Workflow runner.
//!
//! Every command loads the run, applies one decision and writes status,
//! checkpoint, rejections, escalations and events in a single transaction.
//! The runner never executes step work itself; see [`crate::executor`].

use std::sync::Arc;

use folio_config::{EscalationConfig, RunnerConfig};
use folio_escalation::{
    Escalation, EscalationCheck, EscalationManager, EscalationStatus, NewRejection,
    RejectionCategory, RejectionRouter, RejectionTracker,
};
use folio_store::rusqlite::Connection;
use folio_store::{Database, EventType, WorkflowEvent, record_event};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::catalog::WorkflowCatalog;
use crate::checkpoint::{Checkpoint, ItemStatus, ParallelItem, ParallelProgress, PendingRetry};
use crate::decision::{StepOutcome, StepReport, decide, resolve_next};
use crate::definition::{GateOption, StepDefinition, StepNext, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::executor::{StepExecutor, StepRequest};
use crate::run::{RunFilter, WorkflowRun, get_run, insert_run, list_runs, require_run, save_run};
use crate::status::RunStatus;

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;

/// A pending human decision.
#[derive(Debug, Clone, Serialize)]
pub struct GatePrompt {
    pub step: String,
    pub prompt: String,
    pub options: Vec<GateOption>,
    /// Values of the gate's context keys, `null` when unresolved.
    pub context: Map<String, Value>,
}

/// Where a run stands after a command.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: String,
    pub workflow_type: String,
    pub owner_id: String,
    pub status: RunStatus,
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_gate: Option<GatePrompt>,
    /// Last step failure, or why the run was paused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    /// Items of the current fan-out step still waiting for a result.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parallel_items: Vec<String>,
    pub resume_context: Checkpoint,
}

impl RunState {
    fn of(run: WorkflowRun, definition: Option<&WorkflowDefinition>) -> Self {
        let human_gate = match (run.status, definition, run.current_step.as_deref()) {
            (RunStatus::AwaitingHuman, Some(definition), Some(step)) => definition
                .step(step)
                .and_then(|s| s.human_gate())
                .map(|gate| GatePrompt {
                    step: step.to_string(),
                    prompt: gate.prompt.clone(),
                    options: gate.options.clone(),
                    context: run.checkpoint.gate_context(&gate.context),
                }),
            _ => None,
        };

        let parallel_items = match (run.status, run.current_step.as_deref()) {
            (RunStatus::Running, Some(step)) => run
                .checkpoint
                .parallel_for(step)
                .map(ParallelProgress::pending)
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        Self {
            error: run.checkpoint.pending_retry.as_ref().map(|p| p.error.clone()),
            run_id: run.id,
            workflow_type: run.workflow_type,
            owner_id: run.owner_id,
            status: run.status,
            current_step: run.current_step,
            human_gate,
            escalation: None,
            parallel_items,
            resume_context: run.checkpoint,
        }
    }

    /// The run no longer expects an executor call.
    pub fn is_suspended(&self) -> bool {
        self.status != RunStatus::Running
    }
}

fn escalation_message(attempt: u32, category: RejectionCategory, reason: &str) -> String {
    format!(
        "Escalated to human after {} {} rejections: {}",
        attempt, category, reason
    )
}

fn current_step(run: &WorkflowRun) -> Result<String, WorkflowError> {
    run.current_step
        .clone()
        .ok_or_else(|| WorkflowError::StepNotFound(format!("run {} has no current step", run.id)))
}

/// Position `run` at `step`, suspending it when the step is a human gate.
fn enter_step(
    run: &mut WorkflowRun,
    definition: &WorkflowDefinition,
    step: &str,
) -> Result<(), WorkflowError> {
    let step_def = definition.require_step(step)?;
    run.set_step(Some(step.to_string()));
    if let Some(key) = &step_def.parallel_key {
        start_parallel(&mut run.checkpoint, step, key)?;
        debug!(
            "Run {} fanned out {} over {:?}",
            run.id,
            step,
            run.checkpoint.parallel_for(step).map(ParallelProgress::pending)
        );
    }
    if step_def.human_gate().is_some() {
        run.transition(RunStatus::AwaitingHuman)?;
        info!("Run {} waiting for a human decision at {}", run.id, step);
    }
    Ok(())
}

/// Track the items of a fan-out step, read from context `key`.
///
/// Re-entering a step that is still tracked queues its failed items again
/// and keeps the completed ones.
fn start_parallel(
    checkpoint: &mut Checkpoint,
    step: &str,
    key: &str,
) -> Result<(), WorkflowError> {
    if let Some(progress) = checkpoint.parallel.as_mut().filter(|p| p.step == step) {
        progress.retry_failed();
        return Ok(());
    }

    let items: Option<Vec<String>> = checkpoint.context_value(key).and_then(|value| {
        value
            .as_array()?
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect()
    });
    match items {
        Some(items) if !items.is_empty() => {
            checkpoint.parallel = Some(ParallelProgress::new(step, items));
            Ok(())
        }
        _ => Err(WorkflowError::ParallelItemsMissing {
            step: step.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Record `result` for a passed `step` and move on to `next`, completing
/// the run when there is none.
fn pass_step(
    conn: &Connection,
    run: &mut WorkflowRun,
    definition: &WorkflowDefinition,
    step: &StepDefinition,
    result: Value,
    next: Option<String>,
) -> Result<(), WorkflowError> {
    if matches!(step.next, StepNext::Branch(_)) {
        run.checkpoint.record_iteration(&step.name);
    }
    run.checkpoint.complete_step(&step.name, result);

    match next {
        Some(next) => {
            debug!("Run {}: {} -> {}", run.id, step.name, next);
            enter_step(run, definition, &next)
        }
        None => complete(
            conn,
            run,
            json!({ "approved": false, "last_step": step.name }),
        ),
    }
}

fn require_running(run: &WorkflowRun) -> Result<(), WorkflowError> {
    match run.status {
        RunStatus::Running => Ok(()),
        RunStatus::AwaitingHuman => Err(WorkflowError::AwaitingHuman(run.id.clone())),
        status => Err(WorkflowError::RunNotActive {
            run_id: run.id.clone(),
            status,
        }),
    }
}

fn step_request(run: &WorkflowRun, step: &StepDefinition) -> StepRequest {
    let retry = run
        .checkpoint
        .pending_retry
        .as_ref()
        .filter(|p| p.step == step.name);
    StepRequest {
        run_id: run.id.clone(),
        workflow_type: run.workflow_type.clone(),
        owner_id: run.owner_id.clone(),
        step: step.name.clone(),
        command: step.command.clone(),
        preconditions: step.preconditions.clone(),
        postconditions: step.postconditions.clone(),
        attempt: retry.map_or(1, |p| p.attempt + 1),
        item: None,
        handler: retry.and_then(|p| p.handler.clone()),
        prior_results: run.checkpoint.step_results.clone(),
        data: run.checkpoint.data.clone(),
    }
}

fn item_request(run: &WorkflowRun, step: &StepDefinition, item: &ParallelItem) -> StepRequest {
    StepRequest {
        attempt: item.retry_count + 1,
        item: Some(item.item.clone()),
        handler: item.handler.clone(),
        ..step_request(run, step)
    }
}

fn complete(conn: &Connection, run: &mut WorkflowRun, data: Value) -> Result<(), WorkflowError> {
    run.transition(RunStatus::Completed)?;
    run.set_step(None);
    record_event(conn, &run.id, EventType::Completed, None, &data)?;
    info!("Run {} ({}) completed", run.id, run.workflow_type);
    Ok(())
}

/// Drives runs through their workflow definitions.
#[derive(Clone)]
pub struct WorkflowRunner {
    db: Database,
    catalog: Arc<WorkflowCatalog>,
    tracker: RejectionTracker,
    escalations: EscalationManager,
    router: RejectionRouter,
    default_category: RejectionCategory,
    max_auto_steps: u32,
}

impl WorkflowRunner {
    /// Build a runner. Tracker, escalation manager and router share the
    /// `[escalation]` thresholds.
    pub fn new(
        db: Database,
        catalog: WorkflowCatalog,
        escalation: EscalationConfig,
        config: RunnerConfig,
    ) -> Result<Self, WorkflowError> {
        let default_category = config
            .default_rejection_category
            .parse::<RejectionCategory>()?;

        Ok(Self {
            tracker: RejectionTracker::from_config(db.clone(), &escalation),
            router: RejectionRouter::new(db.clone(), escalation.clone()),
            escalations: EscalationManager::new(db.clone(), escalation),
            catalog: Arc::new(catalog),
            db,
            default_category,
            max_auto_steps: config.max_auto_steps,
        })
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &RejectionTracker {
        &self.tracker
    }

    pub fn escalations(&self) -> &EscalationManager {
        &self.escalations
    }

    pub fn router(&self) -> &RejectionRouter {
        &self.router
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Start a run of `workflow_type` for `owner_id` at the initial step.
    pub async fn start(&self, workflow_type: &str, owner_id: &str) -> Result<RunState, WorkflowError> {
        self.start_with_input(workflow_type, owner_id, None).await
    }

    /// Start a run that consumes `input_version_id`.
    pub async fn start_with_input(
        &self,
        workflow_type: &str,
        owner_id: &str,
        input_version_id: Option<&str>,
    ) -> Result<RunState, WorkflowError> {
        let definition = self.catalog.require(workflow_type)?;
        let mut run = WorkflowRun::new(workflow_type, owner_id, &definition.initial_step);
        run.input_version_id = input_version_id.map(str::to_string);

        let runner = self.clone();
        self.db
            .transaction(move |tx| {
                let definition = runner.catalog.require(&run.workflow_type)?;
                let initial_step = definition.initial_step.clone();

                run.transition(RunStatus::Running)?;
                enter_step(&mut run, definition, &initial_step)?;
                insert_run(tx, &run)?;
                record_event(
                    tx,
                    &run.id,
                    EventType::Started,
                    None,
                    &json!({
                        "workflow_type": run.workflow_type,
                        "owner_id": run.owner_id,
                        "input_version_id": run.input_version_id,
                    }),
                )?;

                info!(
                    "Started run {} ({}) for {} at {}",
                    run.id, run.workflow_type, run.owner_id, initial_step
                );
                Ok(RunState::of(run, Some(definition)))
            })
            .await
    }

    /// Continue a run.
    ///
    /// A paused run resumes once all its escalations are resolved. Its
    /// unresolved rejections are closed, which restores the retry budget;
    /// the tracker's retry counts stay. A run waiting at a gate only reports
    /// the gate.
    pub async fn resume(&self, run_id: &str) -> Result<RunState, WorkflowError> {
        let runner = self.clone();
        let run_id = run_id.to_string();
        self.db
            .transaction(move |tx| runner.resume_in(tx, &run_id))
            .await
    }

    fn resume_in(&self, conn: &Connection, run_id: &str) -> Result<RunState, WorkflowError> {
        let mut run = require_run(conn, run_id)?;
        let definition = self.catalog.require(&run.workflow_type)?;

        match run.status {
            RunStatus::Completed | RunStatus::Failed => Err(WorkflowError::RunNotActive {
                run_id: run.id,
                status: run.status,
            }),
            RunStatus::Running | RunStatus::AwaitingHuman => Ok(RunState::of(run, Some(definition))),
            RunStatus::Pending => {
                let step = current_step(&run)?;
                run.transition(RunStatus::Running)?;
                enter_step(&mut run, definition, &step)?;
                save_run(conn, &mut run)?;
                Ok(RunState::of(run, Some(definition)))
            }
            RunStatus::Paused => {
                if self.escalations.has_unresolved_in(conn, &run.id)? {
                    return Err(WorkflowError::EscalationUnresolved(run.id));
                }

                let step = current_step(&run)?;
                run.transition(RunStatus::Running)?;
                let resolved = self.tracker.resolve_all_in(conn, &run.id)?;
                run.checkpoint.pending_retry = None;
                record_event(
                    conn,
                    &run.id,
                    EventType::Resumed,
                    None,
                    &json!({ "step": step, "resolved_rejections": resolved }),
                )?;
                enter_step(&mut run, definition, &step)?;
                save_run(conn, &mut run)?;

                info!("Resumed run {} at {}", run.id, step);
                Ok(RunState::of(run, Some(definition)))
            }
        }
    }

    /// Apply an executor's report for the current step.
    ///
    /// A failed report is not an error: it records a rejection and either
    /// keeps the run on the same step or pauses it for a human.
    pub async fn process_step_result(
        &self,
        run_id: &str,
        report: StepReport,
    ) -> Result<RunState, WorkflowError> {
        let runner = self.clone();
        let run_id = run_id.to_string();
        self.db
            .transaction(move |tx| runner.apply_report(tx, &run_id, report))
            .await
    }

    fn apply_report(
        &self,
        conn: &Connection,
        run_id: &str,
        report: StepReport,
    ) -> Result<RunState, WorkflowError> {
        let mut run = require_run(conn, run_id)?;
        require_running(&run)?;

        let definition = self.catalog.require(&run.workflow_type)?;
        let step_name = current_step(&run)?;
        let step = definition.require_step(&step_name)?;
        if step.is_parallel() {
            return Err(WorkflowError::ParallelStep(step_name));
        }

        let category = report.category.unwrap_or(self.default_category);
        let reason = report
            .error
            .clone()
            .unwrap_or_else(|| format!("Postconditions failed for step {}", step_name));

        let retry_count = if report.postconditions_passed {
            0
        } else {
            self.reject(conn, &run.id, &step_name, None, category, &reason)?
        };

        let outcome = decide(
            definition,
            step,
            &run.checkpoint,
            &report,
            retry_count,
            self.tracker.threshold_for(category),
        )?;

        let result = report.result.clone().unwrap_or(Value::Null);
        let mut error = None;
        let mut escalation = None;
        match outcome {
            StepOutcome::Advance(next) | StepOutcome::Suspend(next) => {
                pass_step(conn, &mut run, definition, step, result, Some(next))?;
            }
            StepOutcome::Complete => {
                pass_step(conn, &mut run, definition, step, result, None)?;
            }
            StepOutcome::Retry { attempt } => {
                run.checkpoint.pending_retry =
                    Some(self.pending_retry(&step_name, &reason, attempt, category));
                info!(
                    "Run {} step {} failed ({} #{}), awaiting retry",
                    run.id, step_name, category, attempt
                );
                error = Some(reason);
            }
            StepOutcome::Escalate { attempt } => {
                run.checkpoint.pending_retry =
                    Some(self.pending_retry(&step_name, &reason, attempt, category));
                let check = self.escalate(conn, &mut run, &step_name, None, category, attempt)?;
                if check.escalated {
                    error = Some(escalation_message(attempt, category, &reason));
                    escalation = check.escalation;
                } else {
                    info!(
                        "Run {} step {} failed ({} #{}), not escalated: {}",
                        run.id, step_name, category, attempt, check.reason
                    );
                    error = Some(reason);
                }
            }
        }

        save_run(conn, &mut run)?;

        let mut state = RunState::of(run, Some(definition));
        if error.is_some() {
            state.error = error;
        }
        state.escalation = escalation;
        Ok(state)
    }

    fn pending_retry(
        &self,
        step: &str,
        reason: &str,
        attempt: u32,
        category: RejectionCategory,
    ) -> PendingRetry {
        PendingRetry {
            step: step.to_string(),
            error: reason.to_string(),
            attempt,
            category: Some(category),
            handler: Some(self.router.handler_for(category).to_string()),
        }
    }

    /// Record a failure of `step` as an event and a rejection, and return
    /// the number of unresolved rejections of the category.
    fn reject(
        &self,
        conn: &Connection,
        run_id: &str,
        step: &str,
        item: Option<&str>,
        category: RejectionCategory,
        reason: &str,
    ) -> Result<u32, WorkflowError> {
        let mut data = json!({ "step": step, "category": category, "reason": reason });
        if let Some(item) = item {
            data["item"] = json!(item);
        }
        let event = record_event(conn, run_id, EventType::Rejected, Some(step), &data)?;
        self.tracker.record_in(
            conn,
            &NewRejection::new(run_id, category, reason).with_event_id(event.id),
        )?;
        // Only failures since the last human resume count against the budget.
        Ok(self.tracker.unresolved_count_in(conn, run_id, category)?)
    }

    /// Escalate the category and pause the run when an escalation is open.
    fn escalate(
        &self,
        conn: &Connection,
        run: &mut WorkflowRun,
        step: &str,
        item: Option<&str>,
        category: RejectionCategory,
        attempt: u32,
    ) -> Result<EscalationCheck, WorkflowError> {
        let check = self.escalations.check_and_escalate_in(conn, &run.id, category)?;
        if check.escalated {
            run.transition(RunStatus::Paused)?;
            record_event(
                conn,
                &run.id,
                EventType::Paused,
                Some(step),
                &json!({
                    "step": step,
                    "item": item,
                    "category": category,
                    "retry_count": attempt,
                    "escalation_id": check.escalation.as_ref().map(|e| e.id.clone()),
                }),
            )?;
            warn!("Run {} paused at {}: {}", run.id, step, check.reason);
        }
        Ok(check)
    }

    /// Apply an executor's report for one item of the current fan-out step.
    ///
    /// Once no item is pending, failed items are queued again, or the step
    /// completes with the item results keyed by item when all passed.
    pub async fn record_parallel_item_result(
        &self,
        run_id: &str,
        item: &str,
        report: StepReport,
    ) -> Result<RunState, WorkflowError> {
        let runner = self.clone();
        let run_id = run_id.to_string();
        let item = item.to_string();
        self.db
            .transaction(move |tx| runner.apply_item_report(tx, &run_id, &item, report))
            .await
    }

    fn apply_item_report(
        &self,
        conn: &Connection,
        run_id: &str,
        item: &str,
        report: StepReport,
    ) -> Result<RunState, WorkflowError> {
        let mut run = require_run(conn, run_id)?;
        require_running(&run)?;

        let definition = self.catalog.require(&run.workflow_type)?;
        let step_name = current_step(&run)?;
        let step = definition.require_step(&step_name)?;
        let Some(progress) = run
            .checkpoint
            .parallel
            .as_mut()
            .filter(|p| p.step == step_name && step.is_parallel())
        else {
            return Err(WorkflowError::NotParallelStep(step_name));
        };
        let entry = progress
            .item_mut(item)
            .ok_or_else(|| WorkflowError::UnknownParallelItem {
                step: step_name.clone(),
                item: item.to_string(),
            })?;
        if entry.status != ItemStatus::Pending {
            return Err(WorkflowError::ParallelItemSettled {
                step: step_name,
                item: item.to_string(),
            });
        }

        let mut error = None;
        let mut escalation = None;
        if report.postconditions_passed {
            entry.complete(report.result.clone().unwrap_or(Value::Null));
            debug!("Run {} step {} item {} passed", run.id, step_name, item);
        } else {
            let category = report.category.unwrap_or(self.default_category);
            let reason = report.error.clone().unwrap_or_else(|| {
                format!("Postconditions failed for {} of step {}", item, step_name)
            });
            entry.fail(&reason, Some(self.router.handler_for(category).to_string()));

            let attempt = self.reject(conn, &run.id, &step_name, Some(item), category, &reason)?;
            if attempt >= self.tracker.threshold_for(category) {
                let check =
                    self.escalate(conn, &mut run, &step_name, Some(item), category, attempt)?;
                if check.escalated {
                    error = Some(escalation_message(attempt, category, &reason));
                    escalation = check.escalation;
                }
            }
            if error.is_none() {
                info!(
                    "Run {} step {} item {} failed ({} #{})",
                    run.id, step_name, item, category, attempt
                );
                error = Some(reason);
            }
        }

        if run.status == RunStatus::Running {
            self.settle_parallel(conn, &mut run, definition, step)?;
        }

        save_run(conn, &mut run)?;

        let mut state = RunState::of(run, Some(definition));
        state.error = error;
        state.escalation = escalation;
        Ok(state)
    }

    fn settle_parallel(
        &self,
        conn: &Connection,
        run: &mut WorkflowRun,
        definition: &WorkflowDefinition,
        step: &StepDefinition,
    ) -> Result<(), WorkflowError> {
        let Some(progress) = run.checkpoint.parallel.as_mut() else {
            return Ok(());
        };
        if !progress.is_settled() {
            return Ok(());
        }
        if !progress.all_completed() {
            let queued = progress.retry_failed();
            info!("Run {} step {}: retrying {} failed items", run.id, step.name, queued);
            return Ok(());
        }

        let combined = progress.combined_results();
        run.checkpoint.parallel = None;
        let next = resolve_next(
            definition,
            step,
            &run.checkpoint,
            &StepReport::passed(combined.clone()),
        )?;
        info!("Run {} step {}: all items completed", run.id, step.name);
        pass_step(conn, run, definition, step, combined, next)
    }

    /// Apply a human decision at the current gate.
    pub async fn handle_gate_decision(
        &self,
        run_id: &str,
        option: &str,
        input: Option<String>,
    ) -> Result<RunState, WorkflowError> {
        let runner = self.clone();
        let run_id = run_id.to_string();
        let option = option.to_string();
        self.db
            .transaction(move |tx| runner.decide_gate(tx, &run_id, &option, input))
            .await
    }

    fn decide_gate(
        &self,
        conn: &Connection,
        run_id: &str,
        label: &str,
        input: Option<String>,
    ) -> Result<RunState, WorkflowError> {
        let mut run = require_run(conn, run_id)?;
        if run.status.is_terminal() {
            return Err(WorkflowError::RunNotActive {
                run_id: run.id,
                status: run.status,
            });
        }

        let definition = self.catalog.require(&run.workflow_type)?;
        let step_name = current_step(&run)?;
        let gate = definition
            .require_step(&step_name)?
            .human_gate()
            .ok_or_else(|| WorkflowError::NoHumanGate(step_name.clone()))?;

        if run.status != RunStatus::AwaitingHuman {
            return Err(WorkflowError::RunNotActive {
                run_id: run.id,
                status: run.status,
            });
        }

        let option = gate
            .find_option(label)
            .ok_or_else(|| WorkflowError::InvalidGateOption {
                option: label.to_string(),
                valid: gate.labels(),
            })?;

        let input = input.filter(|text| !text.trim().is_empty());
        if option.requires_input && input.is_none() {
            return Err(WorkflowError::GateInputRequired(label.to_string()));
        }

        run.checkpoint
            .record_gate_decision(&step_name, label, input.clone());
        if option.requires_input {
            if let Some(text) = &input {
                run.checkpoint
                    .data
                    .insert(format!("{}.input", step_name), json!(text));
            }
        }
        run.checkpoint
            .complete_step(&step_name, json!({ "option": label, "input": input }));
        run.transition(RunStatus::Running)?;

        info!("Run {} gate {}: {}", run.id, step_name, label);

        match &option.next_step {
            None => complete(
                conn,
                &mut run,
                json!({ "approved": false, "gate": step_name, "option": label }),
            )?,
            Some(next) => enter_step(&mut run, definition, next)?,
        }

        save_run(conn, &mut run)?;
        Ok(RunState::of(run, Some(definition)))
    }

    /// Stop a run for good.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> Result<RunState, WorkflowError> {
        let runner = self.clone();
        let run_id = run_id.to_string();
        let reason = reason.to_string();
        self.db
            .transaction(move |tx| {
                let mut run = require_run(tx, &run_id)?;
                if run.status.is_terminal() {
                    return Err(WorkflowError::RunNotActive {
                        run_id: run.id,
                        status: run.status,
                    });
                }

                if matches!(run.status, RunStatus::AwaitingHuman | RunStatus::Pending) {
                    run.transition(RunStatus::Running)?;
                }
                run.transition(RunStatus::Failed)?;
                run.checkpoint
                    .data
                    .insert("cancel_reason".to_string(), json!(reason));
                record_event(
                    tx,
                    &run.id,
                    EventType::Failed,
                    None,
                    &json!({ "reason": reason, "step": run.current_step }),
                )?;
                save_run(tx, &mut run)?;

                warn!("Run {} cancelled: {}", run.id, reason);
                let definition = runner.catalog.get(&run.workflow_type);
                Ok(RunState::of(run, definition))
            })
            .await
    }

    /// Record an explicit approval of a completed run.
    ///
    /// Approval is a second `completed` event flagged `approved`, which is
    /// what `on_approve` triggers look for.
    pub async fn record_approval(
        &self,
        run_id: &str,
        approved_by: &str,
    ) -> Result<WorkflowEvent, WorkflowError> {
        let run_id = run_id.to_string();
        let approved_by = approved_by.to_string();
        self.db
            .transaction(move |tx| {
                let run = require_run(tx, &run_id)?;
                if run.status != RunStatus::Completed {
                    return Err(WorkflowError::RunNotCompleted(run.id));
                }
                let event = record_event(
                    tx,
                    &run.id,
                    EventType::Completed,
                    Some(&approved_by),
                    &json!({ "approved": true, "approved_by": approved_by }),
                )?;
                info!("Run {} approved by {}", run.id, approved_by);
                Ok(event)
            })
            .await
    }

    /// Record the version a run produced, for lineage.
    pub async fn link_output_version(
        &self,
        run_id: &str,
        version_id: &str,
    ) -> Result<WorkflowRun, WorkflowError> {
        let run_id = run_id.to_string();
        let version_id = version_id.to_string();
        self.db
            .transaction(move |tx| {
                let mut run = require_run(tx, &run_id)?;
                run.output_version_id = Some(version_id);
                save_run(tx, &mut run)?;
                debug!("Run {} produced version {:?}", run.id, run.output_version_id);
                Ok(run)
            })
            .await
    }

    /// Current state without side effects.
    pub async fn get_state(&self, run_id: &str) -> Result<RunState, WorkflowError> {
        let run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
        let paused = run.status == RunStatus::Paused;
        let attempt = run.checkpoint.pending_retry.as_ref().map(|p| p.attempt);

        let definition = self.catalog.get(&run.workflow_type);
        let mut state = RunState::of(run, definition);

        if paused {
            let escalation = self
                .escalations
                .get_escalations_for_workflow(run_id)
                .await?
                .into_iter()
                .find(|e| e.status != EscalationStatus::Resolved);
            if let Some(escalation) = &escalation {
                let reason = state.error.clone().unwrap_or_default();
                state.error = Some(escalation_message(
                    attempt.unwrap_or(escalation.retry_count),
                    escalation.category,
                    &reason,
                ));
            }
            state.escalation = escalation;
        }
        Ok(state)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>, WorkflowError> {
        let run_id = run_id.to_string();
        self.db.call(move |conn| get_run(conn, &run_id)).await
    }

    pub async fn list_runs(&self, filter: RunFilter) -> Result<Vec<WorkflowRun>, WorkflowError> {
        self.db.call(move |conn| list_runs(conn, &filter)).await
    }

    /// Execute steps with `executor` until the run leaves `running` or the
    /// configured number of executions is spent.
    pub async fn run_until_suspended(
        &self,
        run_id: &str,
        executor: &dyn StepExecutor,
    ) -> Result<RunState, WorkflowError> {
        let mut executed = 0;
        loop {
            let run = self
                .get_run(run_id)
                .await?
                .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;
            if run.status != RunStatus::Running {
                break;
            }
            if executed >= self.max_auto_steps {
                info!(
                    "Run {} still running after {} step executions",
                    run_id, executed
                );
                break;
            }

            let definition = self.catalog.require(&run.workflow_type)?;
            let step_name = current_step(&run)?;
            let step = definition.require_step(&step_name)?;

            if let Some(progress) = run.checkpoint.parallel_for(&step_name) {
                let requests: Vec<StepRequest> = progress
                    .items
                    .iter()
                    .filter(|i| i.status == ItemStatus::Pending)
                    .map(|i| item_request(&run, step, i))
                    .collect();
                if requests.is_empty() {
                    warn!("Run {} step {} has no pending items", run_id, step_name);
                    break;
                }

                for request in requests {
                    if executed >= self.max_auto_steps {
                        break;
                    }
                    let item = request.item.clone().unwrap_or_default();
                    let report = self.execute(executor, &request).await;
                    executed += 1;
                    let state = self.record_parallel_item_result(run_id, &item, report).await?;
                    if state.status != RunStatus::Running
                        || state.current_step.as_deref() != Some(step_name.as_str())
                    {
                        break;
                    }
                }
                continue;
            }

            let request = step_request(&run, step);
            let report = self.execute(executor, &request).await;
            executed += 1;
            self.process_step_result(run_id, report).await?;
        }

        self.get_state(run_id).await
    }

    async fn execute(&self, executor: &dyn StepExecutor, request: &StepRequest) -> StepReport {
        match executor.execute(request).await {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    "Executor failed on {} of run {}: {}",
                    request.step, request.run_id, e
                );
                StepReport::failed(e.to_string())
            }
        }
    }
}
