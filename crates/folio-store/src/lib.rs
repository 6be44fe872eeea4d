//! # Folio Store
//!
//! The single durable store shared by every Folio component.
//!
//! A [`Database`] is opened once per process and cloned into each
//! component's constructor. Components keep their SQL in plain functions over
//! `&rusqlite::Connection` so that several of them can take part in one
//! [`Database::transaction`].

mod database;
mod error;
mod events;
mod schema;
mod util;

pub use database::Database;
pub use error::StoreError;
pub use events::{EventLog, EventType, WorkflowEvent, latest_event, list_events, record_event};
pub use schema::init_schema;
pub use util::{
    invalid_column, json_column, new_id, now, optional_timestamp_column, parse_timestamp,
    parsed_column, timestamp_column,
};

/// Re-exported so dependants use the same SQLite bindings.
pub use rusqlite;
