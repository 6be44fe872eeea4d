//! Trigger definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TriggerError;

/// When a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Whenever the source run completes.
    OnComplete,
    /// When the source run completed and was explicitly approved.
    OnApprove,
    /// Only through [`crate::TriggerEngine::fire_trigger`].
    Manual,
}

impl TriggerCondition {
    pub const ALL: [TriggerCondition; 3] = [
        TriggerCondition::OnComplete,
        TriggerCondition::OnApprove,
        TriggerCondition::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCondition::OnComplete => "on_complete",
            TriggerCondition::OnApprove => "on_approve",
            TriggerCondition::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerCondition {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TriggerError::UnknownCondition(s.to_string()))
    }
}

/// A registered trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub source_workflow: String,
    pub target_workflow: String,
    pub condition: TriggerCondition,
    pub enabled: bool,
    /// Opaque to the engine.
    pub config: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`crate::TriggerEngine::register_trigger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrigger {
    pub name: String,
    pub source_workflow: String,
    pub target_workflow: String,
    pub condition: TriggerCondition,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

fn default_enabled() -> bool {
    true
}

impl NewTrigger {
    pub fn new(
        name: impl Into<String>,
        source_workflow: impl Into<String>,
        target_workflow: impl Into<String>,
        condition: TriggerCondition,
    ) -> Self {
        Self {
            name: name.into(),
            source_workflow: source_workflow.into(),
            target_workflow: target_workflow.into(),
            condition,
            enabled: true,
            config: Value::Object(Map::new()),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Check the input and return the configuration object to store.
    pub(crate) fn validate(&self) -> Result<Map<String, Value>, TriggerError> {
        if self.name.trim().is_empty() {
            return Err(TriggerError::InvalidTrigger("name is empty".to_string()));
        }
        if self.source_workflow.trim().is_empty() || self.target_workflow.trim().is_empty() {
            return Err(TriggerError::InvalidTrigger(
                "source and target workflow types are required".to_string(),
            ));
        }
        if self.source_workflow == self.target_workflow {
            return Err(TriggerError::InvalidTrigger(format!(
                "{} would trigger itself",
                self.source_workflow
            )));
        }
        match &self.config {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            _ => Err(TriggerError::InvalidTrigger(
                "config must be a JSON object".to_string(),
            )),
        }
    }
}
