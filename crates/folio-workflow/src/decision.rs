//! Step reports and the pure next-step decision.
//!
//! [`decide`] never touches the store. The runner records the rejection,
//! asks for a decision and then applies it, so the same logic serves a
//! one-shot command and a driving loop.

use folio_escalation::RejectionCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::definition::{StepDefinition, StepNext, WorkflowDefinition};
use crate::error::WorkflowError;

/// What an executor reports back after performing a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(alias = "postconditionsPassed")]
    pub postconditions_passed: bool,
    #[serde(
        default,
        alias = "nextStepHint",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_step_hint: Option<String>,
    /// Rejection category for a failed report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<RejectionCategory>,
}

impl StepReport {
    pub fn passed(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            postconditions_passed: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            postconditions_passed: false,
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, step: impl Into<String>) -> Self {
        self.next_step_hint = Some(step.into());
        self
    }

    pub fn with_category(mut self, category: RejectionCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Result of applying a step report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Continue at the named step.
    Advance(String),
    /// Continue at the named step, which waits for a human.
    Suspend(String),
    Complete,
    /// Stay on the same step; the caller re-invokes the executor.
    Retry { attempt: u32 },
    /// The retry threshold is reached; a human has to step in.
    Escalate { attempt: u32 },
}

/// Decide what follows `report` for `step`.
///
/// `retry_count` is the rejection count for the failing category after the
/// current failure was recorded; it is ignored for passing reports.
pub fn decide(
    definition: &WorkflowDefinition,
    step: &StepDefinition,
    checkpoint: &Checkpoint,
    report: &StepReport,
    retry_count: u32,
    threshold: u32,
) -> Result<StepOutcome, WorkflowError> {
    if !report.postconditions_passed {
        return Ok(if retry_count >= threshold {
            StepOutcome::Escalate {
                attempt: retry_count,
            }
        } else {
            StepOutcome::Retry {
                attempt: retry_count,
            }
        });
    }

    match resolve_next(definition, step, checkpoint, report)? {
        None => Ok(StepOutcome::Complete),
        Some(next) => {
            if definition.require_step(&next)?.human_gate().is_some() {
                Ok(StepOutcome::Suspend(next))
            } else {
                Ok(StepOutcome::Advance(next))
            }
        }
    }
}

/// Name of the step after `step`, `None` when the run completes.
///
/// A hint overrides fixed and branch targets but not a loop that reached its
/// `max_iterations`, which always leaves through `on_false`.
pub fn resolve_next(
    definition: &WorkflowDefinition,
    step: &StepDefinition,
    checkpoint: &Checkpoint,
    report: &StepReport,
) -> Result<Option<String>, WorkflowError> {
    let hint = report.next_step_hint.as_deref();

    let next = match &step.next {
        StepNext::Terminal => return Ok(None),
        StepNext::Fixed(next) => hint.unwrap_or(next.as_str()),
        StepNext::Branch(branch) => {
            let evaluations = checkpoint.iteration_count(&step.name);
            let exhausted = branch
                .max_iterations
                .is_some_and(|max| evaluations >= max);

            if exhausted {
                branch.on_false.as_str()
            } else if let Some(hint) = hint {
                hint
            } else {
                let result = report.result.as_ref().unwrap_or(&Value::Null);
                if branch.predicate.evaluate(result) {
                    branch.on_true.as_str()
                } else {
                    branch.on_false.as_str()
                }
            }
        }
        StepNext::Gate(_) => {
            return Err(WorkflowError::InvalidDefinition(format!(
                "step '{}' is decided at its human gate",
                step.name
            )));
        }
    };

    definition.require_step(next)?;
    Ok(Some(next.to_string()))
}
