//! Store errors.

use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The background connection is gone or could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be interpreted.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => StoreError::Database(e),
            other => StoreError::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokio_rusqlite_unwraps_sqlite_error() {
        let err = StoreError::from(tokio_rusqlite::Error::Rusqlite(
            rusqlite::Error::QueryReturnedNoRows,
        ));
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_connection_closed() {
        let err = StoreError::from(tokio_rusqlite::Error::ConnectionClosed);
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[test]
    fn test_invalid_data_display() {
        let err = StoreError::InvalidData("status 'sleeping'".to_string());
        assert!(err.to_string().contains("sleeping"));
    }
}
