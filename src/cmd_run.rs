//! Run subcommand handlers.

use serde::Serialize;
use tracing::info;

use folio_store::EventLog;
use folio_triggers::TriggerResult;
use folio_workflow::{RunFilter, RunState, StepReport};

use crate::app::App;
use crate::cli::RunAction;
use crate::output::{parse_json_arg, print_json};

/// A run state plus whatever its completion triggered.
#[derive(Serialize)]
struct CommandOutcome {
    #[serde(flatten)]
    state: RunState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    triggered: Vec<TriggerResult>,
}

/// Print a state, chaining into triggers when the run completed.
async fn finish(app: &App, state: RunState) -> Result<(), Box<dyn std::error::Error>> {
    let triggered = app.chain(&state).await?;
    for result in triggered.iter().filter(|r| r.triggered) {
        info!(
            "Trigger {} started run {}",
            result.trigger_name,
            result.new_run_id.as_deref().unwrap_or("-")
        );
    }
    print_json(&CommandOutcome { state, triggered })
}

/// Handle run subcommands.
pub(crate) async fn handle_run_command(
    app: &App,
    action: RunAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = &app.runner;
    match action {
        RunAction::Start {
            workflow_type,
            owner,
            input_version,
        } => {
            let state = runner
                .start_with_input(&workflow_type, &owner, input_version.as_deref())
                .await?;
            print_json(&state)
        }
        RunAction::Resume { run_id } => {
            let state = runner.resume(&run_id).await?;
            print_json(&state)
        }
        RunAction::Report {
            run_id,
            passed,
            failed: _,
            result,
            error,
            category,
            next_step,
        } => {
            let report = StepReport {
                success: passed,
                result: parse_json_arg("result", result.as_deref())?,
                error,
                postconditions_passed: passed,
                next_step_hint: next_step,
                category,
            };
            let state = runner.process_step_result(&run_id, report).await?;
            finish(app, state).await
        }
        RunAction::Item {
            run_id,
            item,
            passed,
            failed: _,
            result,
            error,
            category,
        } => {
            let report = StepReport {
                success: passed,
                result: parse_json_arg("result", result.as_deref())?,
                error,
                postconditions_passed: passed,
                next_step_hint: None,
                category,
            };
            let state = runner
                .record_parallel_item_result(&run_id, &item, report)
                .await?;
            finish(app, state).await
        }
        RunAction::Gate {
            run_id,
            option,
            input,
        } => {
            let state = runner.handle_gate_decision(&run_id, &option, input).await?;
            finish(app, state).await
        }
        RunAction::Drive { run_id } => {
            let executor = app.executor();
            let state = runner.run_until_suspended(&run_id, &executor).await?;
            finish(app, state).await
        }
        RunAction::Status { run_id } => {
            let state = runner.get_state(&run_id).await?;
            print_json(&state)
        }
        RunAction::List {
            owner,
            status,
            workflow_type,
            limit,
        } => {
            let filter = RunFilter {
                owner_id: owner,
                status,
                workflow_type,
                limit,
            };
            let runs = runner.list_runs(filter).await?;
            print_json(&runs)
        }
        RunAction::Events { run_id } => {
            let events = EventLog::new(app.db.clone()).list(&run_id).await?;
            print_json(&events)
        }
        RunAction::Cancel { run_id, reason } => {
            let state = runner.cancel(&run_id, &reason).await?;
            print_json(&state)
        }
        RunAction::Approve { run_id, by } => {
            let event = runner.record_approval(&run_id, &by).await?;
            print_json(&event)
        }
        RunAction::LinkOutput { run_id, version } => {
            let run = runner.link_output_version(&run_id, &version).await?;
            print_json(&run)
        }
    }
}
