//! CLI definitions for Folio.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use folio_artifacts::ArtifactKind;
use folio_escalation::RejectionCategory;
use folio_triggers::TriggerCondition;
use folio_workflow::RunStatus;

/// Folio CLI.
#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Checkpointed workflow orchestration for book production")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "folio.toml", global = true, env = "FOLIO_CONFIG")]
    pub config: PathBuf,

    /// Database file, overriding the configured one
    #[arg(short, long, global = true, env = "FOLIO_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start, advance and inspect workflow runs
    Run {
        #[command(subcommand)]
        action: RunAction,
    },

    /// Manage cross-workflow triggers
    Trigger {
        #[command(subcommand)]
        action: TriggerAction,
    },

    /// Inspect and resolve escalations
    Escalation {
        #[command(subcommand)]
        action: EscalationAction,
    },

    /// Inspect recorded step rejections
    Rejection {
        #[command(subcommand)]
        action: RejectionAction,
    },

    /// Register and query run artifacts
    Artifact {
        #[command(subcommand)]
        action: ArtifactAction,
    },

    /// Inspect workflow definitions
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum RunAction {
    /// Start a run at the workflow's initial step
    Start {
        workflow_type: String,
        owner: String,

        /// Version the run consumes
        #[arg(long)]
        input_version: Option<String>,
    },

    /// Continue a paused or pending run
    Resume { run_id: String },

    /// Report the outcome of the current step
    #[command(group(ArgGroup::new("outcome").required(true).args(["passed", "failed"])))]
    Report {
        run_id: String,

        #[arg(long)]
        passed: bool,

        #[arg(long)]
        failed: bool,

        /// Step result as JSON
        #[arg(long)]
        result: Option<String>,

        /// Failure reason
        #[arg(long)]
        error: Option<String>,

        /// Rejection category of a failure
        #[arg(long)]
        category: Option<RejectionCategory>,

        /// Step to continue at instead of the defined next step
        #[arg(long)]
        next_step: Option<String>,
    },

    /// Report the outcome of one item of the current parallel step
    #[command(group(ArgGroup::new("outcome").required(true).args(["passed", "failed"])))]
    Item {
        run_id: String,
        item: String,

        #[arg(long)]
        passed: bool,

        #[arg(long)]
        failed: bool,

        /// Item result as JSON
        #[arg(long)]
        result: Option<String>,

        /// Failure reason
        #[arg(long)]
        error: Option<String>,

        /// Rejection category of a failure
        #[arg(long)]
        category: Option<RejectionCategory>,
    },

    /// Decide the human gate the run is waiting at
    Gate {
        run_id: String,
        option: String,

        /// Free-text input for the chosen option
        #[arg(long)]
        input: Option<String>,
    },

    /// Execute steps with the shell executor until the run suspends
    Drive { run_id: String },

    /// Show the current state of a run
    Status { run_id: String },

    /// List runs, newest first
    List {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        status: Option<RunStatus>,

        #[arg(long)]
        workflow_type: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the event log of a run
    Events { run_id: String },

    /// Fail a run with a reason
    Cancel {
        run_id: String,

        #[arg(long)]
        reason: String,
    },

    /// Record an approval of a completed run
    Approve {
        run_id: String,

        #[arg(long)]
        by: String,
    },

    /// Record the version a run produced
    LinkOutput { run_id: String, version: String },
}

#[derive(Subcommand)]
pub(crate) enum TriggerAction {
    /// Register a trigger
    Add {
        name: String,

        #[arg(long)]
        source: String,

        #[arg(long)]
        target: String,

        #[arg(long, default_value = "on_complete")]
        condition: TriggerCondition,

        /// Register the trigger disabled
        #[arg(long)]
        disabled: bool,

        /// Trigger configuration as a JSON object
        #[arg(long)]
        config: Option<String>,
    },

    /// List triggers in registration order
    List {
        /// Only triggers with this source workflow type
        #[arg(long)]
        source: Option<String>,
    },

    /// Enable a trigger
    Enable { id: String },

    /// Disable a trigger
    Disable { id: String },

    /// Delete a trigger
    Delete { id: String },

    /// Evaluate triggers for a completed run
    Check { run_id: String },

    /// Fire a trigger for an owner regardless of its condition
    Fire { id: String, owner: String },
}

#[derive(Subcommand)]
pub(crate) enum EscalationAction {
    /// List escalations, oldest first
    List {
        /// Only escalations of this run
        #[arg(long)]
        run: Option<String>,

        /// Only escalations still pending
        #[arg(long)]
        pending: bool,
    },

    /// Acknowledge an escalation
    Ack { id: String },

    /// Resolve an escalation
    Resolve {
        id: String,

        #[arg(long)]
        resolution: String,
    },

    /// Escalation counts and latencies
    Stats,
}

#[derive(Subcommand)]
pub(crate) enum RejectionAction {
    /// List rejections of a run
    List {
        run_id: String,

        #[arg(long)]
        unresolved: bool,
    },

    /// Mark a rejection resolved
    Resolve { id: String },

    /// Show where a rejection is routed
    Route { id: String },

    /// Show the handler and limits of every category
    Routes,

    /// Routing counts by category and handler
    Stats {
        /// Only rejections of this run
        #[arg(long)]
        run: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ArtifactAction {
    /// Register an artifact produced by a run
    Register {
        run_id: String,
        kind: ArtifactKind,
        path: String,

        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List the artifacts of a run
    List {
        run_id: String,

        #[arg(long)]
        kind: Option<ArtifactKind>,
    },

    /// Search artifacts across runs, newest first
    Search {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        workflow_type: Option<String>,

        #[arg(long)]
        kind: Option<ArtifactKind>,

        #[arg(long)]
        status: Option<RunStatus>,

        /// RFC 3339 lower bound (exclusive)
        #[arg(long)]
        after: Option<DateTime<Utc>>,

        /// RFC 3339 upper bound (exclusive)
        #[arg(long)]
        before: Option<DateTime<Utc>>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,
    },

    /// Newest artifact of a kind for a book
    Latest { owner: String, kind: ArtifactKind },

    /// Artifacts a workflow would consume for a book
    Deps { workflow_type: String, owner: String },

    /// An artifact and everything upstream of it
    Lineage { artifact_id: String },
}

#[derive(Subcommand)]
pub(crate) enum WorkflowAction {
    /// List registered workflow definitions
    List,

    /// Show one workflow definition
    Show { workflow_type: String },

    /// Validate a definition file
    Validate { file: PathBuf },
}
