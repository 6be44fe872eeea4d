//! Trigger subcommand handlers.

use folio_triggers::NewTrigger;

use crate::app::App;
use crate::cli::TriggerAction;
use crate::output::{parse_json_arg, print_json};

/// Handle trigger subcommands.
pub(crate) async fn handle_trigger_command(
    app: &App,
    action: TriggerAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = &app.triggers;
    match action {
        TriggerAction::Add {
            name,
            source,
            target,
            condition,
            disabled,
            config,
        } => {
            let mut input = NewTrigger::new(name, source, target, condition);
            if let Some(config) = parse_json_arg("config", config.as_deref())? {
                input = input.with_config(config);
            }
            if disabled {
                input = input.disabled();
            }
            let trigger = engine.register_trigger(input).await?;
            print_json(&trigger)
        }
        TriggerAction::List { source } => {
            let triggers = match source {
                Some(source) => engine.get_triggers_for_source(&source).await?,
                None => engine.list_triggers().await?,
            };
            print_json(&triggers)
        }
        TriggerAction::Enable { id } => print_json(&engine.set_trigger_enabled(&id, true).await?),
        TriggerAction::Disable { id } => {
            print_json(&engine.set_trigger_enabled(&id, false).await?)
        }
        TriggerAction::Delete { id } => {
            engine.delete_trigger(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        TriggerAction::Check { run_id } => print_json(&engine.check_triggers(&run_id).await?),
        TriggerAction::Fire { id, owner } => print_json(&engine.fire_trigger(&id, &owner).await?),
    }
}
