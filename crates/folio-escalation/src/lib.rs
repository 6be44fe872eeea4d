//! # Folio Escalation
//!
//! Bounded retries for failed workflow steps.
//!
//! The [`RejectionTracker`] keeps a monotonic retry counter per
//! `(run, category)`. The [`EscalationManager`] turns a counter that reached
//! the configured threshold into a durable, human-facing [`Escalation`] and
//! tracks it through `pending -> acknowledged -> resolved`. A pair has at
//! most one open escalation at a time.
//!
//! The [`RejectionRouter`] names the agent that reworks a rejected step,
//! per category, and the escalation target once the category limit is hit.

mod category;
mod error;
mod escalation;
mod rejection;
mod router;
mod stats;

pub use category::RejectionCategory;
pub use error::EscalationError;
pub use escalation::{Escalation, EscalationCheck, EscalationManager, EscalationStatus};
pub use rejection::{NewRejection, Rejection, RejectionTracker};
pub use router::{RejectionRouter, Route, RouteDecision, RoutingStats};
pub use stats::EscalationStats;
