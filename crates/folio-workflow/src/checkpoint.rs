//! Durable run progress.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use folio_escalation::RejectionCategory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::predicate::lookup_path;

/// A step that finished with its postconditions satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step: String,
    pub completed_at: DateTime<Utc>,
    pub result: Value,
}

/// A human decision taken at a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub step: String,
    pub option: String,
    #[serde(default)]
    pub input: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// The failed attempt the caller is expected to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRetry {
    pub step: String,
    pub error: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<RejectionCategory>,
    /// Agent routed to rework the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Completed,
    Failed,
}

/// One item of a fan-out step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelItem {
    pub item: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failures of this item so far.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl ParallelItem {
    fn new(item: String) -> Self {
        Self {
            item,
            status: ItemStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            handler: None,
        }
    }

    pub fn complete(&mut self, result: Value) {
        self.status = ItemStatus::Completed;
        self.result = Some(result);
        self.error = None;
    }

    /// Mark the item failed and return its new failure count.
    pub fn fail(&mut self, error: impl Into<String>, handler: Option<String>) -> u32 {
        self.status = ItemStatus::Failed;
        self.error = Some(error.into());
        self.handler = handler;
        self.retry_count += 1;
        self.retry_count
    }
}

/// Summary of a fan-out step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParallelStatus {
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
}

/// Per-item progress of the fan-out step the run is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelProgress {
    pub step: String,
    pub items: Vec<ParallelItem>,
}

impl ParallelProgress {
    /// Track `items` for `step`. Repeated items are tracked once.
    pub fn new<I>(step: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut tracked: Vec<ParallelItem> = Vec::new();
        for item in items {
            if !tracked.iter().any(|t| t.item == item) {
                tracked.push(ParallelItem::new(item));
            }
        }
        Self {
            step: step.into(),
            items: tracked,
        }
    }

    pub fn item(&self, item: &str) -> Option<&ParallelItem> {
        self.items.iter().find(|i| i.item == item)
    }

    pub fn item_mut(&mut self, item: &str) -> Option<&mut ParallelItem> {
        self.items.iter_mut().find(|i| i.item == item)
    }

    fn with_status(&self, status: ItemStatus) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.status == status)
            .map(|i| i.item.clone())
            .collect()
    }

    pub fn pending(&self) -> Vec<String> {
        self.with_status(ItemStatus::Pending)
    }

    pub fn status(&self) -> ParallelStatus {
        ParallelStatus {
            total: self.items.len(),
            completed: self.with_status(ItemStatus::Completed).len(),
            failed: self.with_status(ItemStatus::Failed),
            pending: self.pending(),
        }
    }

    /// No item is waiting for a report.
    pub fn is_settled(&self) -> bool {
        self.items.iter().all(|i| i.status != ItemStatus::Pending)
    }

    pub fn all_completed(&self) -> bool {
        self.items.iter().all(|i| i.status == ItemStatus::Completed)
    }

    /// Queue failed items again. Returns how many were queued.
    pub fn retry_failed(&mut self) -> usize {
        let mut queued = 0;
        for item in self.items.iter_mut().filter(|i| i.status == ItemStatus::Failed) {
            item.status = ItemStatus::Pending;
            queued += 1;
        }
        queued
    }

    /// Item results keyed by item, `null` for items without one.
    pub fn combined_results(&self) -> Value {
        Value::Object(
            self.items
                .iter()
                .map(|i| (i.item.clone(), i.result.clone().unwrap_or(Value::Null)))
                .collect(),
        )
    }
}

/// Resumable record of a run's progress.
///
/// Stored as JSON next to the run's status and written in the same
/// transaction, so the two never disagree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub current_step: Option<String>,
    pub completed_steps: Vec<CompletedStep>,
    /// Last result reported for each step.
    pub step_results: BTreeMap<String, Value>,
    /// Branch evaluations per step.
    pub iteration_counts: BTreeMap<String, u32>,
    pub gate_decisions: Vec<GateDecision>,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_retry: Option<PendingRetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelProgress>,
}

impl Checkpoint {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            current_step: Some(step.into()),
            ..Default::default()
        }
    }

    pub fn complete_step(&mut self, step: &str, result: Value) {
        self.step_results.insert(step.to_string(), result.clone());
        self.completed_steps.push(CompletedStep {
            step: step.to_string(),
            completed_at: Utc::now(),
            result,
        });
        self.pending_retry = None;
    }

    /// Progress of `step` when it is the tracked fan-out step.
    pub fn parallel_for(&self, step: &str) -> Option<&ParallelProgress> {
        self.parallel.as_ref().filter(|p| p.step == step)
    }

    pub fn iteration_count(&self, step: &str) -> u32 {
        self.iteration_counts.get(step).copied().unwrap_or(0)
    }

    /// Count one more branch evaluation of `step` and return the new total.
    pub fn record_iteration(&mut self, step: &str) -> u32 {
        let count = self.iteration_counts.entry(step.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_gate_decision(&mut self, step: &str, option: &str, input: Option<String>) {
        self.gate_decisions.push(GateDecision {
            step: step.to_string(),
            option: option.to_string(),
            input,
            decided_at: Utc::now(),
        });
    }

    pub fn times_completed(&self, step: &str) -> usize {
        self.completed_steps.iter().filter(|s| s.step == step).count()
    }

    /// Resolve a context key.
    ///
    /// Looks in `data` (exact key, then dotted path), then in the step
    /// results (`<step>.<path>`), then in each completed result, newest first.
    pub fn context_value(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.data.get(key) {
            return Some(value.clone());
        }

        let mut parts = key.splitn(2, '.');
        let head = parts.next().unwrap_or_default();
        let rest = parts.next();

        if let (Some(root), Some(rest)) = (self.data.get(head), rest) {
            if let Some(value) = lookup_path(root, rest) {
                return Some(value.clone());
            }
        }

        if let Some(result) = self.step_results.get(head) {
            match rest {
                None => return Some(result.clone()),
                Some(rest) => {
                    if let Some(value) = lookup_path(result, rest) {
                        return Some(value.clone());
                    }
                }
            }
        }

        self.completed_steps
            .iter()
            .rev()
            .find_map(|s| lookup_path(&s.result, key).cloned())
    }

    /// Context values for a gate, `null` for keys that resolve to nothing.
    pub fn gate_context(&self, keys: &[String]) -> Map<String, Value> {
        keys.iter()
            .map(|key| (key.clone(), self.context_value(key).unwrap_or(Value::Null)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_step_clears_pending_retry() {
        let mut cp = Checkpoint::new("draft");
        cp.pending_retry = Some(PendingRetry {
            step: "draft".to_string(),
            error: "too short".to_string(),
            attempt: 1,
            category: Some(RejectionCategory::Mechanics),
            handler: Some("mechanics-reviewer".to_string()),
        });

        cp.complete_step("draft", json!({"words": 1200}));
        assert!(cp.pending_retry.is_none());
        assert_eq!(cp.step_results["draft"], json!({"words": 1200}));
        assert_eq!(cp.times_completed("draft"), 1);
    }

    #[test]
    fn test_step_results_keep_latest() {
        let mut cp = Checkpoint::default();
        cp.complete_step("review", json!({"decision": "revise"}));
        cp.complete_step("review", json!({"decision": "approve"}));

        assert_eq!(cp.completed_steps.len(), 2);
        assert_eq!(cp.step_results["review"]["decision"], "approve");
        assert_eq!(cp.times_completed("review"), 2);
    }

    #[test]
    fn test_iteration_counter() {
        let mut cp = Checkpoint::default();
        assert_eq!(cp.iteration_count("review"), 0);
        assert_eq!(cp.record_iteration("review"), 1);
        assert_eq!(cp.record_iteration("review"), 2);
        assert_eq!(cp.iteration_count("review"), 2);
        assert_eq!(cp.iteration_count("other"), 0);
    }

    #[test]
    fn test_context_lookup_order() {
        let mut cp = Checkpoint::default();
        cp.complete_step("editor", json!({"summary": "tight prose", "score": {"clarity": 8}}));
        cp.data.insert("approve.input".to_string(), json!("fix chapter 2"));
        cp.data.insert("book".to_string(), json!({"title": "Dungeon Tiles"}));

        assert_eq!(cp.context_value("approve.input"), Some(json!("fix chapter 2")));
        assert_eq!(cp.context_value("book.title"), Some(json!("Dungeon Tiles")));
        assert_eq!(cp.context_value("editor.score.clarity"), Some(json!(8)));
        assert_eq!(cp.context_value("summary"), Some(json!("tight prose")));
        assert_eq!(cp.context_value("missing"), None);
    }

    #[test]
    fn test_gate_context_fills_nulls() {
        let mut cp = Checkpoint::default();
        cp.complete_step("editor", json!({"summary": "ok"}));

        let ctx = cp.gate_context(&["editor.summary".to_string(), "nothing".to_string()]);
        assert_eq!(ctx["editor.summary"], json!("ok"));
        assert_eq!(ctx["nothing"], Value::Null);
    }

    fn chapters() -> ParallelProgress {
        ParallelProgress::new(
            "edit_chapters",
            ["ch1", "ch2", "ch1", "ch3"].map(String::from),
        )
    }

    #[test]
    fn test_parallel_progress_dedupes_items() {
        let progress = chapters();
        assert_eq!(progress.pending(), vec!["ch1", "ch2", "ch3"]);
        assert!(!progress.is_settled());
    }

    #[test]
    fn test_parallel_status_and_retry() {
        let mut progress = chapters();
        progress.item_mut("ch1").unwrap().complete(json!({"words": 3000}));
        let failures = progress
            .item_mut("ch2")
            .unwrap()
            .fail("dangling modifier", Some("mechanics-reviewer".to_string()));
        assert_eq!(failures, 1);

        let status = progress.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, vec!["ch2"]);
        assert_eq!(status.pending, vec!["ch3"]);

        progress.item_mut("ch3").unwrap().complete(json!({"words": 2500}));
        assert!(progress.is_settled());
        assert!(!progress.all_completed());

        assert_eq!(progress.retry_failed(), 1);
        assert_eq!(progress.pending(), vec!["ch2"]);
        let ch2 = progress.item("ch2").unwrap();
        assert_eq!(ch2.retry_count, 1);
        assert_eq!(ch2.handler.as_deref(), Some("mechanics-reviewer"));
    }

    #[test]
    fn test_combined_results_keyed_by_item() {
        let mut progress = chapters();
        progress.item_mut("ch1").unwrap().complete(json!("done"));
        let combined = progress.combined_results();
        assert_eq!(combined, json!({"ch1": "done", "ch2": null, "ch3": null}));
    }

    #[test]
    fn test_parallel_for_matches_step() {
        let mut cp = Checkpoint::new("edit_chapters");
        cp.parallel = Some(chapters());
        assert!(cp.parallel_for("edit_chapters").is_some());
        assert!(cp.parallel_for("assemble").is_none());

        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["parallel"]["items"][0]["status"], "pending");
        let back: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn test_deserialize_partial_checkpoint() {
        let cp: Checkpoint = serde_json::from_str(r#"{"current_step": "step1"}"#).unwrap();
        assert_eq!(cp.current_step.as_deref(), Some("step1"));
        assert!(cp.completed_steps.is_empty());

        let empty: Checkpoint = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Checkpoint::default());
    }
}
