//! # Folio Workflow
//!
//! Workflow definitions and the checkpointed runner.
//!
//! A [`WorkflowRunner`] starts runs from the definitions in its
//! [`WorkflowCatalog`], applies [`StepReport`]s from external executors and
//! hands failures to the rejection tracker and escalation manager. Runs move
//! only along the [`RunStatus`] graph; every change is persisted together
//! with the run's [`Checkpoint`].
//!
//! A step with a `parallel` key fans out over a list of items; each item is
//! reported on its own and the step completes once every item passed.

mod catalog;
mod checkpoint;
mod decision;
mod definition;
mod error;
mod executor;
mod loader;
mod predicate;
mod run;
mod runner;
mod status;

pub use catalog::{PipelineStage, WorkflowCatalog};
pub use checkpoint::{
    Checkpoint, CompletedStep, GateDecision, ItemStatus, ParallelItem, ParallelProgress,
    ParallelStatus, PendingRetry,
};
pub use decision::{StepOutcome, StepReport, decide, resolve_next};
pub use definition::{Branch, GateOption, HumanGate, StepDefinition, StepNext, WorkflowDefinition};
pub use error::WorkflowError;
pub use executor::{ExecutorError, ShellStepExecutor, StepExecutor, StepRequest};
pub use loader::{DefinitionFormat, load_definition_file, load_definitions_dir, parse_definition};
pub use predicate::{Comparator, Predicate, lookup_path};
pub use run::{RunFilter, WorkflowRun, get_run, insert_run, list_runs, require_run, save_run};
pub use runner::{GatePrompt, RunState, WorkflowRunner};
pub use status::{RunStatus, validate_transition};
