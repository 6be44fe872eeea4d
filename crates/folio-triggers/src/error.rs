//! Trigger errors.

use thiserror::Error;

use folio_store::StoreError;
use folio_workflow::WorkflowError;

/// Trigger error types.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Workflow run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Unknown trigger condition: {0}")]
    UnknownCondition(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<folio_store::rusqlite::Error> for TriggerError {
    fn from(err: folio_store::rusqlite::Error) -> Self {
        TriggerError::Store(StoreError::from(err))
    }
}

impl From<serde_json::Error> for TriggerError {
    fn from(err: serde_json::Error) -> Self {
        TriggerError::Store(StoreError::from(err))
    }
}
