//! Escalation statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::escalation::{Escalation, EscalationStatus};

/// Aggregate view over all escalations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_target: BTreeMap<String, usize>,
    /// Mean seconds from creation to acknowledgement.
    pub avg_acknowledge_secs: Option<f64>,
    /// Mean seconds from creation to resolution.
    pub avg_resolve_secs: Option<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl EscalationStats {
    pub fn from_escalations(escalations: &[Escalation]) -> Self {
        let mut stats = EscalationStats {
            total: escalations.len(),
            ..Default::default()
        };
        for status in EscalationStatus::ALL {
            stats.by_status.insert(status.as_str().to_string(), 0);
        }

        let mut acknowledge = Vec::new();
        let mut resolve = Vec::new();

        for escalation in escalations {
            *stats
                .by_status
                .entry(escalation.status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_category
                .entry(escalation.category.as_str().to_string())
                .or_default() += 1;
            *stats.by_target.entry(escalation.target.clone()).or_default() += 1;

            if let Some(at) = escalation.acknowledged_at {
                acknowledge.push((at - escalation.created_at).num_milliseconds() as f64 / 1000.0);
            }
            if let Some(at) = escalation.resolved_at {
                resolve.push((at - escalation.created_at).num_milliseconds() as f64 / 1000.0);
            }
        }

        stats.avg_acknowledge_secs = mean(&acknowledge);
        stats.avg_resolve_secs = mean(&resolve);
        stats
    }
}
