//! Workflow definition subcommand handlers.

use serde::Serialize;

use folio_workflow::{PipelineStage, load_definition_file};

use crate::app::App;
use crate::cli::WorkflowAction;
use crate::output::print_json;

#[derive(Serialize)]
struct WorkflowSummary<'a> {
    workflow_type: &'a str,
    name: &'a str,
    initial_step: &'a str,
    steps: usize,
    /// Pipeline stages this workflow consumes, empty outside the pipeline.
    depends_on: Vec<&'static str>,
}

/// Handle workflow subcommands.
pub(crate) async fn handle_workflow_command(
    app: &App,
    action: WorkflowAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = app.runner.catalog();
    match action {
        WorkflowAction::List => {
            let summaries: Vec<_> = catalog
                .list()
                .into_iter()
                .map(|def| WorkflowSummary {
                    workflow_type: &def.workflow_type,
                    name: &def.name,
                    initial_step: &def.initial_step,
                    steps: def.steps.len(),
                    depends_on: PipelineStage::from_workflow_type(&def.workflow_type)
                        .map(|stage| stage.dependencies().iter().map(|d| d.as_str()).collect())
                        .unwrap_or_default(),
                })
                .collect();
            print_json(&summaries)
        }
        WorkflowAction::Show { workflow_type } => print_json(catalog.require(&workflow_type)?),
        WorkflowAction::Validate { file } => {
            let definition = load_definition_file(&file)?;
            print_json(&serde_json::json!({
                "valid": true,
                "workflow_type": definition.workflow_type,
                "steps": definition.steps.len(),
            }))
        }
    }
}
