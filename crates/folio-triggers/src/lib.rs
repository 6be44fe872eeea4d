//! # Folio Triggers
//!
//! Chaining between workflows. When a run completes, the [`TriggerEngine`]
//! starts runs of dependent workflow types for the same book.

mod engine;
mod error;
mod trigger;

pub use engine::{TriggerEngine, TriggerResult};
pub use error::TriggerError;
pub use trigger::{NewTrigger, Trigger, TriggerCondition};
