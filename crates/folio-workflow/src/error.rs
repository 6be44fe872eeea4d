//! Workflow errors.
//!
//! These are engine-level errors: the caller used the API incorrectly or the
//! store failed. A failing step is never reported through this type.

use std::path::PathBuf;

use thiserror::Error;

use folio_escalation::EscalationError;
use folio_store::StoreError;

use crate::status::RunStatus;

/// Workflow error types.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error("Workflow run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Current step \"{0}\" has no human gate")]
    NoHumanGate(String),

    #[error("Invalid gate option '{option}', expected one of: {}", .valid.join(", "))]
    InvalidGateOption { option: String, valid: Vec<String> },

    #[error("Gate option '{0}' requires input")]
    GateInputRequired(String),

    #[error("Run {run_id} is {status} and cannot accept this command")]
    RunNotActive { run_id: String, status: RunStatus },

    #[error("Run {0} is awaiting a human gate decision")]
    AwaitingHuman(String),

    #[error("Run {0} has not completed")]
    RunNotCompleted(String),

    #[error("Run {0} has unresolved escalations")]
    EscalationUnresolved(String),

    #[error("Parallel step {step} needs a non-empty list of item names at '{key}'")]
    ParallelItemsMissing { step: String, key: String },

    #[error("Step {0} is not a parallel step")]
    NotParallelStep(String),

    /// Items of a parallel step report one at a time.
    #[error("Step {0} is a parallel step, report its items individually")]
    ParallelStep(String),

    #[error("Unknown item '{item}' of parallel step {step}")]
    UnknownParallelItem { step: String, item: String },

    #[error("Item '{item}' of parallel step {step} is not awaiting a result")]
    ParallelItemSettled { step: String, item: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to load workflow definition {path}: {message}")]
    DefinitionLoad { path: PathBuf, message: String },

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<folio_store::rusqlite::Error> for WorkflowError {
    fn from(err: folio_store::rusqlite::Error) -> Self {
        WorkflowError::Store(StoreError::from(err))
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Store(StoreError::from(err))
    }
}
