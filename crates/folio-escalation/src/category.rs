//! Rejection categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EscalationError;

/// Why a step failed. Retry counts are scoped per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    Style,
    Mechanics,
    Clarity,
    Scope,
}

impl RejectionCategory {
    pub const ALL: [RejectionCategory; 4] = [
        RejectionCategory::Style,
        RejectionCategory::Mechanics,
        RejectionCategory::Clarity,
        RejectionCategory::Scope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::Style => "style",
            RejectionCategory::Mechanics => "mechanics",
            RejectionCategory::Clarity => "clarity",
            RejectionCategory::Scope => "scope",
        }
    }
}

impl fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectionCategory {
    type Err = EscalationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| EscalationError::UnknownCategory(s.to_string()))
    }
}
