//! Run status and the legal transition graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    AwaitingHuman,
    Completed,
    Failed,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Paused,
        RunStatus::AwaitingHuman,
        RunStatus::Completed,
        RunStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::AwaitingHuman => "awaiting_human",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Completed and failed runs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Statuses reachable in one step.
    pub fn allowed_transitions(&self) -> &'static [RunStatus] {
        match self {
            RunStatus::Pending => &[RunStatus::Running],
            RunStatus::Running => &[
                RunStatus::Paused,
                RunStatus::AwaitingHuman,
                RunStatus::Completed,
                RunStatus::Failed,
            ],
            RunStatus::Paused => &[RunStatus::Running, RunStatus::Failed],
            RunStatus::AwaitingHuman => &[RunStatus::Running],
            RunStatus::Completed | RunStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown run status '{}'", s))
    }
}

/// Check a single status change against the transition graph.
pub fn validate_transition(from: RunStatus, to: RunStatus) -> Result<(), WorkflowError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition { from, to })
    }
}
