//! Escalation, rejection and routing subcommand handlers.

use folio_escalation::EscalationStatus;

use crate::app::App;
use crate::cli::{EscalationAction, RejectionAction};
use crate::output::print_json;

/// Handle escalation subcommands.
pub(crate) async fn handle_escalation_command(
    app: &App,
    action: EscalationAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = app.runner.escalations();
    match action {
        EscalationAction::List { run, pending } => {
            let mut escalations = match run {
                Some(run_id) => manager.get_escalations_for_workflow(&run_id).await?,
                None if pending => manager.get_pending_escalations().await?,
                None => manager.list_escalations().await?,
            };
            if pending {
                escalations.retain(|e| e.status == EscalationStatus::Pending);
            }
            print_json(&escalations)
        }
        EscalationAction::Ack { id } => print_json(&manager.acknowledge_escalation(&id).await?),
        EscalationAction::Resolve { id, resolution } => {
            print_json(&manager.resolve_escalation(&id, &resolution).await?)
        }
        EscalationAction::Stats => print_json(&manager.get_escalation_stats().await?),
    }
}

/// Handle rejection subcommands.
pub(crate) async fn handle_rejection_command(
    app: &App,
    action: RejectionAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = app.runner.tracker();
    let router = app.runner.router();
    match action {
        RejectionAction::List { run_id, unresolved } => {
            let rejections = if unresolved {
                tracker.get_unresolved_rejections(&run_id).await?
            } else {
                tracker.get_rejections_for_run(&run_id).await?
            };
            print_json(&rejections)
        }
        RejectionAction::Resolve { id } => print_json(&tracker.resolve_rejection(&id).await?),
        RejectionAction::Route { id } => print_json(&router.route_rejection(&id).await?),
        RejectionAction::Routes => print_json(&router.routes()),
        RejectionAction::Stats { run } => {
            print_json(&router.get_routing_stats(run.as_deref()).await?)
        }
    }
}
