//! Escalation errors.

use thiserror::Error;

use folio_store::StoreError;

use crate::escalation::EscalationStatus;

/// Escalation error types.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("Rejection not found: {0}")]
    RejectionNotFound(String),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(String),

    /// Escalation status only moves forward.
    #[error("Escalation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: EscalationStatus,
        to: EscalationStatus,
    },

    #[error("Unknown rejection category: {0}")]
    UnknownCategory(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<folio_store::rusqlite::Error> for EscalationError {
    fn from(err: folio_store::rusqlite::Error) -> Self {
        EscalationError::Store(StoreError::from(err))
    }
}

impl From<serde_json::Error> for EscalationError {
    fn from(err: serde_json::Error) -> Self {
        EscalationError::Store(StoreError::from(err))
    }
}
