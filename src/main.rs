//! Folio - checkpointed workflow orchestration for book production.
//!
//! Main entry point for the Folio CLI.

mod app;
mod cli;
mod cmd_artifact;
mod cmd_escalation;
mod cmd_run;
mod cmd_trigger;
mod cmd_workflow;
mod output;

use std::path::Path;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use folio_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use crate::app::App;
use crate::cli::{Cli, Commands};

/// Initialize tracing with console and file output.
///
/// The console layer writes to stderr so stdout carries only command output.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = logging.resolved_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("folio")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop and must outlive main.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Load and validate the configuration file, defaulting when it is absent.
fn load_config(path: &Path) -> Result<(Config, Vec<String>), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_or_default(path)?;
    let warnings = ConfigValidator::validate(&config)?
        .into_result()?
        .into_iter()
        .map(|w| format!("{}: {}", w.path, w.message))
        .collect();
    Ok((config, warnings))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, warnings) = load_config(&cli.config)?;
    init_tracing(&config.logging)?;
    for warning in warnings {
        warn!("Config {}", warning);
    }

    let app = App::open(config, cli.database).await?;

    let result = match cli.command {
        Commands::Run { action } => cmd_run::handle_run_command(&app, action).await,
        Commands::Trigger { action } => cmd_trigger::handle_trigger_command(&app, action).await,
        Commands::Escalation { action } => {
            cmd_escalation::handle_escalation_command(&app, action).await
        }
        Commands::Rejection { action } => {
            cmd_escalation::handle_rejection_command(&app, action).await
        }
        Commands::Artifact { action } => {
            cmd_artifact::handle_artifact_command(&app, action).await
        }
        Commands::Workflow { action } => {
            cmd_workflow::handle_workflow_command(&app, action).await
        }
    };

    app.close().await?;
    result
}
