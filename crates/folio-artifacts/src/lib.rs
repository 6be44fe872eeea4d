//! # Folio Artifacts
//!
//! Typed outputs of workflow runs.
//!
//! The [`ArtifactRegistry`] records what a run produced. The
//! [`ArtifactQuery`] searches across runs of one book, finds the outputs of
//! the stages a workflow depends on and walks lineage through the version
//! links between runs.

mod error;
mod kind;
mod query;
mod registry;

pub use error::ArtifactError;
pub use kind::ArtifactKind;
pub use query::{ArtifactQuery, ArtifactQueryResult, ArtifactRecord, ArtifactSearchCriteria};
pub use registry::{Artifact, ArtifactRegistry, NewArtifact};
