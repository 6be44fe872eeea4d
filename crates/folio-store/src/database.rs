//! Shared SQLite handle.

use std::path::Path;

use rusqlite::{Connection as SqliteConnection, Transaction};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema::init_schema;

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;

/// Durable store handle.
///
/// Cloning is cheap: every clone talks to the same background connection.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(&path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            init_schema(conn)?;
            Ok(())
        })
        .await?;

        info!("Opened database at {}", path.display());
        Ok(Self { conn })
    }

    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| Ok(init_schema(conn)?)).await?;

        debug!("Opened in-memory database");
        Ok(Self { conn })
    }

    /// Close the connection, flushing pending work.
    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        debug!("Database closed");
        Ok(())
    }

    /// Run `f` against the connection outside of an explicit transaction.
    pub async fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&SqliteConnection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(StoreError::from)?
    }

    /// Run `f` inside a transaction.
    ///
    /// The transaction commits only when `f` returns `Ok`; an `Err` from `f`
    /// rolls every write back and is returned unchanged.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                match f(&tx) {
                    Ok(value) => {
                        tx.commit()?;
                        Ok(Ok(value))
                    }
                    Err(err) => Ok(Err(err)),
                }
            })
            .await
            .map_err(StoreError::from)?
    }
}
