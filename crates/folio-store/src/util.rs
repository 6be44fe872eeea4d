//! Identifier, timestamp and column helpers.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::StoreError;

/// Generate a prefixed identifier, e.g. `run_4f0c...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Current time as a fixed-width RFC 3339 string.
///
/// Microsecond precision with a `Z` suffix keeps lexical and chronological
/// order identical, so `ORDER BY created_at` is correct.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("timestamp '{}': {}", value, e)))
}

/// Wrap a decoding failure for column `idx`.
pub fn invalid_column<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

/// Read a JSON text column.
pub fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| invalid_column(idx, e))
}

/// Read an RFC 3339 timestamp column.
pub fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid_column(idx, e))
}

/// Read a nullable RFC 3339 timestamp column.
pub fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid_column(idx, e))
    })
    .transpose()
}

/// Read a text column through `FromStr`.
pub fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| invalid_column(idx, e))
}
