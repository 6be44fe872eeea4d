//! Artifact errors.

use thiserror::Error;

use folio_store::StoreError;
use folio_workflow::WorkflowError;

/// Artifact error types.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid artifact path: {0:?}")]
    InvalidArtifactPath(String),

    #[error("Invalid artifact metadata: {0}")]
    InvalidMetadata(String),

    #[error("Workflow run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<folio_store::rusqlite::Error> for ArtifactError {
    fn from(err: folio_store::rusqlite::Error) -> Self {
        ArtifactError::Store(StoreError::from(err))
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        ArtifactError::Store(StoreError::from(err))
    }
}
