//! Component wiring shared by every command.

use std::path::PathBuf;

use tracing::{debug, info};

use folio_artifacts::{ArtifactQuery, ArtifactRegistry};
use folio_config::Config;
use folio_store::Database;
use folio_triggers::{TriggerEngine, TriggerResult};
use folio_workflow::{RunState, RunStatus, ShellStepExecutor, WorkflowCatalog, WorkflowRunner};

/// One opened database and the components built on it.
pub(crate) struct App {
    pub config: Config,
    pub db: Database,
    pub runner: WorkflowRunner,
    pub triggers: TriggerEngine,
    pub registry: ArtifactRegistry,
    pub query: ArtifactQuery,
}

/// Built-in pipeline definitions plus those in the configured directory.
pub(crate) fn build_catalog(config: &Config) -> Result<WorkflowCatalog, Box<dyn std::error::Error>> {
    let mut catalog = WorkflowCatalog::builtin()?;
    if let Some(dir) = config.workflows.resolved_definitions_dir() {
        if dir.is_dir() {
            let loaded = catalog.load_dir(&dir)?;
            info!("Loaded {} workflow definitions from {}", loaded, dir.display());
        } else {
            debug!("Definitions directory {} does not exist", dir.display());
        }
    }
    Ok(catalog)
}

impl App {
    pub async fn open(
        config: Config,
        database: Option<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let path = database.unwrap_or_else(|| config.database.resolved_path());
        let db = Database::open(&path).await?;

        let catalog = build_catalog(&config)?;
        let runner = WorkflowRunner::new(
            db.clone(),
            catalog,
            config.escalation.clone(),
            config.runner.clone(),
        )?;

        Ok(Self {
            triggers: TriggerEngine::new(runner.clone()),
            registry: ArtifactRegistry::new(db.clone()),
            query: ArtifactQuery::new(db.clone()),
            runner,
            db,
            config,
        })
    }

    pub fn executor(&self) -> ShellStepExecutor {
        ShellStepExecutor::new(self.config.executor.clone())
    }

    /// Chain into dependent workflows once a run has completed.
    pub async fn chain(
        &self,
        state: &RunState,
    ) -> Result<Vec<TriggerResult>, Box<dyn std::error::Error>> {
        if state.status != RunStatus::Completed {
            return Ok(Vec::new());
        }
        Ok(self.triggers.check_triggers(&state.run_id).await?)
    }

    pub async fn close(self) -> Result<(), Box<dyn std::error::Error>> {
        self.db.close().await?;
        Ok(())
    }
}
