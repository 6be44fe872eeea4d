//! Artifact subcommand handlers.

use folio_artifacts::{ArtifactSearchCriteria, NewArtifact};

use crate::app::App;
use crate::cli::ArtifactAction;
use crate::output::{parse_json_arg, print_json};

/// Handle artifact subcommands.
pub(crate) async fn handle_artifact_command(
    app: &App,
    action: ArtifactAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ArtifactAction::Register {
            run_id,
            kind,
            path,
            metadata,
        } => {
            let mut input = NewArtifact::new(run_id, kind, path);
            if let Some(metadata) = parse_json_arg("metadata", metadata.as_deref())? {
                input = input.with_metadata(metadata);
            }
            print_json(&app.registry.register(input).await?)
        }
        ArtifactAction::List { run_id, kind } => {
            let artifacts = match kind {
                Some(kind) => app.registry.get_by_run_and_type(&run_id, kind).await?,
                None => app.registry.get_by_run_id(&run_id).await?,
            };
            print_json(&artifacts)
        }
        ArtifactAction::Search {
            owner,
            workflow_type,
            kind,
            status,
            after,
            before,
            limit,
            offset,
        } => {
            let criteria = ArtifactSearchCriteria {
                owner_id: owner,
                workflow_type,
                artifact_type: kind,
                run_status: status,
                created_after: after,
                created_before: before,
            };
            print_json(&app.query.search(criteria, limit, offset).await?)
        }
        ArtifactAction::Latest { owner, kind } => {
            print_json(&app.query.find_latest_for_book(&owner, kind).await?)
        }
        ArtifactAction::Deps {
            workflow_type,
            owner,
        } => print_json(&app.query.find_dependencies(&workflow_type, &owner).await?),
        ArtifactAction::Lineage { artifact_id } => {
            print_json(&app.query.get_lineage(&artifact_id).await?)
        }
    }
}
