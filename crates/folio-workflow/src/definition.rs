//! Workflow definitions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::predicate::Predicate;

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;

/// A named, ordered set of steps for one workflow type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub initial_step: String,
    pub steps: Vec<StepDefinition>,
}

/// One unit of externally executed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepSpec", into = "StepSpec")]
pub struct StepDefinition {
    pub name: String,
    /// Executor reference, opaque to the engine.
    pub command: String,
    /// Named checks the executor runs before the step.
    pub preconditions: Vec<String>,
    /// Named checks the executor reports on via `postconditions_passed`.
    pub postconditions: Vec<String>,
    /// Checkpoint key holding the item list of a fan-out step. The command
    /// runs once per item and the step completes when every item passed.
    pub parallel_key: Option<String>,
    pub next: StepNext,
}

/// What follows a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepNext {
    /// The run completes after this step.
    Terminal,
    Fixed(String),
    Branch(Branch),
    /// The step suspends the run for a human decision.
    Gate(HumanGate),
}

/// Conditional branch evaluated against the step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub predicate: Predicate,
    pub on_true: String,
    pub on_false: String,
    /// Evaluations after which `on_false` is forced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl Branch {
    pub fn new(predicate: Predicate, on_true: impl Into<String>, on_false: impl Into<String>) -> Self {
        Self {
            predicate,
            on_true: on_true.into(),
            on_false: on_false.into(),
            max_iterations: None,
        }
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

/// Human decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanGate {
    pub prompt: String,
    /// Checkpoint keys shown alongside the prompt.
    #[serde(default)]
    pub context: Vec<String>,
    pub options: Vec<GateOption>,
}

impl HumanGate {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_context<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn option(mut self, option: GateOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn find_option(&self, label: &str) -> Option<&GateOption> {
        self.options.iter().find(|o| o.label == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.options.iter().map(|o| o.label.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOption {
    pub label: String,
    /// `None` ends the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    #[serde(default)]
    pub requires_input: bool,
}

impl GateOption {
    /// Option that continues at `next_step`.
    pub fn to(label: impl Into<String>, next_step: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next_step: Some(next_step.into()),
            requires_input: false,
        }
    }

    /// Option that ends the run.
    pub fn end(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next_step: None,
            requires_input: false,
        }
    }

    pub fn requires_input(mut self) -> Self {
        self.requires_input = true;
        self
    }
}

impl StepDefinition {
    /// A terminal step.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            parallel_key: None,
            next: StepNext::Terminal,
        }
    }

    /// Fan the step out over the string array stored at checkpoint `key`.
    pub fn parallel(mut self, key: impl Into<String>) -> Self {
        self.parallel_key = Some(key.into());
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel_key.is_some()
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = StepNext::Fixed(next.into());
        self
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.next = StepNext::Branch(branch);
        self
    }

    pub fn gate(mut self, gate: HumanGate) -> Self {
        self.next = StepNext::Gate(gate);
        self
    }

    pub fn with_preconditions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preconditions = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_postconditions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.postconditions = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn human_gate(&self) -> Option<&HumanGate> {
        match &self.next {
            StepNext::Gate(gate) => Some(gate),
            _ => None,
        }
    }

    /// Step names this step can hand over to.
    fn targets(&self) -> Vec<&str> {
        match &self.next {
            StepNext::Terminal => Vec::new(),
            StepNext::Fixed(next) => vec![next.as_str()],
            StepNext::Branch(branch) => vec![branch.on_true.as_str(), branch.on_false.as_str()],
            StepNext::Gate(gate) => gate
                .options
                .iter()
                .filter_map(|o| o.next_step.as_deref())
                .collect(),
        }
    }
}

/// File representation of a step: `next`, `branch` and `gate` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepSpec {
    name: String,
    #[serde(default)]
    command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    preconditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    postconditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parallel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gate: Option<HumanGate>,
}

impl TryFrom<StepSpec> for StepDefinition {
    type Error = String;

    fn try_from(spec: StepSpec) -> Result<Self, Self::Error> {
        let next = match (spec.next, spec.branch, spec.gate) {
            (None, None, None) => StepNext::Terminal,
            (Some(next), None, None) => StepNext::Fixed(next),
            (None, Some(branch), None) => StepNext::Branch(branch),
            (None, None, Some(gate)) => StepNext::Gate(gate),
            _ => {
                return Err(format!(
                    "step '{}' may set only one of next, branch or gate",
                    spec.name
                ));
            }
        };
        Ok(StepDefinition {
            name: spec.name,
            command: spec.command,
            preconditions: spec.preconditions,
            postconditions: spec.postconditions,
            parallel_key: spec.parallel,
            next,
        })
    }
}

impl From<StepDefinition> for StepSpec {
    fn from(step: StepDefinition) -> Self {
        let mut spec = StepSpec {
            name: step.name,
            command: step.command,
            preconditions: step.preconditions,
            postconditions: step.postconditions,
            parallel: step.parallel_key,
            next: None,
            branch: None,
            gate: None,
        };
        match step.next {
            StepNext::Terminal => {}
            StepNext::Fixed(next) => spec.next = Some(next),
            StepNext::Branch(branch) => spec.branch = Some(branch),
            StepNext::Gate(gate) => spec.gate = Some(gate),
        }
        spec
    }
}

impl WorkflowDefinition {
    pub fn new(
        workflow_type: impl Into<String>,
        name: impl Into<String>,
        initial_step: impl Into<String>,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            name: name.into(),
            description: None,
            initial_step: initial_step.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn require_step(&self, name: &str) -> Result<&StepDefinition, WorkflowError> {
        self.step(name).ok_or_else(|| {
            WorkflowError::StepNotFound(format!("{}.{}", self.workflow_type, name))
        })
    }

    /// Check structural integrity: every referenced step exists.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut problems = Vec::new();

        if self.workflow_type.trim().is_empty() {
            problems.push("workflow_type is empty".to_string());
        }
        if self.steps.is_empty() {
            problems.push("no steps defined".to_string());
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                problems.push("step with empty name".to_string());
            }
            if !names.insert(step.name.as_str()) {
                problems.push(format!("duplicate step '{}'", step.name));
            }
        }

        if !names.contains(self.initial_step.as_str()) {
            problems.push(format!("initial step '{}' does not exist", self.initial_step));
        }

        for step in &self.steps {
            for target in step.targets() {
                if !names.contains(target) {
                    problems.push(format!(
                        "step '{}' references unknown step '{}'",
                        step.name, target
                    ));
                }
            }

            if let Some(key) = &step.parallel_key {
                if key.trim().is_empty() {
                    problems.push(format!("parallel step '{}' has an empty key", step.name));
                }
                if step.human_gate().is_some() {
                    problems.push(format!("parallel step '{}' cannot carry a gate", step.name));
                }
            }

            match &step.next {
                StepNext::Branch(branch) if branch.max_iterations == Some(0) => {
                    problems.push(format!("step '{}' has max_iterations = 0", step.name));
                }
                StepNext::Gate(gate) => {
                    if gate.options.is_empty() {
                        problems.push(format!("gate on step '{}' has no options", step.name));
                    }
                    let mut labels = HashSet::new();
                    for option in &gate.options {
                        if !labels.insert(option.label.as_str()) {
                            problems.push(format!(
                                "gate on step '{}' repeats option '{}'",
                                step.name, option.label
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::InvalidDefinition(format!(
                "{}: {}",
                self.workflow_type,
                problems.join("; ")
            )))
        }
    }
}
