use super::*;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use folio_store::EventLog;

use crate::definition::{Branch, HumanGate, StepDefinition};
use crate::executor::ExecutorError;
use crate::predicate::Predicate;

fn editing() -> WorkflowDefinition {
    WorkflowDefinition::new("w1_editing", "Editing (test)", "step1")
        .with_step(StepDefinition::new("step1", "write").then("step2"))
        .with_step(
            StepDefinition::new("step2", "edit").branch(
                Branch::new(Predicate::equals("decision", "revise"), "step1", "review")
                    .max_iterations(3),
            ),
        )
        .with_step(
            StepDefinition::new("review", "human").gate(
                HumanGate::new("Approve the edit?")
                    .with_context(["step2.summary"])
                    .option(GateOption::to("Approve", "publish"))
                    .option(GateOption::end("Reject"))
                    .option(GateOption::to("Request Changes", "step1").requires_input()),
            ),
        )
        .with_step(StepDefinition::new("publish", "publish"))
}

fn gated_start() -> WorkflowDefinition {
    WorkflowDefinition::new("gated_start", "Gate first", "kickoff")
        .with_step(
            StepDefinition::new("kickoff", "human").gate(
                HumanGate::new("Start the book?")
                    .with_context(["brief"])
                    .option(GateOption::to("Go", "work")),
            ),
        )
        .with_step(StepDefinition::new("work", "work"))
}

fn fan_out() -> WorkflowDefinition {
    WorkflowDefinition::new("w2_chapters", "Chapter fan-out", "outline")
        .with_step(StepDefinition::new("outline", "outline").then("edit_chapters"))
        .with_step(
            StepDefinition::new("edit_chapters", "edit-chapter")
                .parallel("outline.chapters")
                .then("assemble"),
        )
        .with_step(StepDefinition::new("assemble", "assemble"))
}

struct Fixture {
    runner: WorkflowRunner,
    events: EventLog,
}

async fn fixture() -> Fixture {
    fixture_with(2, RunnerConfig::default()).await
}

async fn fixture_with(threshold: u32, config: RunnerConfig) -> Fixture {
    let escalation = EscalationConfig {
        threshold,
        ..Default::default()
    };
    fixture_config(escalation, config).await
}

async fn fixture_config(escalation: EscalationConfig, config: RunnerConfig) -> Fixture {
    let db = Database::in_memory().await.unwrap();
    let catalog = WorkflowCatalog::new()
        .with(editing())
        .unwrap()
        .with(gated_start())
        .unwrap()
        .with(fan_out())
        .unwrap();
    Fixture {
        runner: WorkflowRunner::new(db.clone(), catalog, escalation, config).unwrap(),
        events: EventLog::new(db),
    }
}

impl Fixture {
    async fn start(&self) -> RunState {
        self.runner.start("w1_editing", "book_test").await.unwrap()
    }

    async fn pass(&self, run_id: &str, result: Value) -> RunState {
        self.runner
            .process_step_result(run_id, StepReport::passed(result))
            .await
            .unwrap()
    }

    async fn fail(&self, run_id: &str, error: &str) -> RunState {
        self.runner
            .process_step_result(run_id, StepReport::failed(error))
            .await
            .unwrap()
    }

    /// Drive a fresh run to the review gate.
    async fn at_gate(&self) -> RunState {
        let state = self.start().await;
        self.pass(&state.run_id, json!({})).await;
        self.pass(
            &state.run_id,
            json!({"decision": "approve", "summary": "clean"}),
        )
        .await
    }

    /// Start a fan-out run and pass its outline with `chapters`.
    async fn at_fan_out(&self, chapters: Value) -> RunState {
        let state = self.runner.start("w2_chapters", "book_test").await.unwrap();
        self.pass(&state.run_id, json!({ "chapters": chapters })).await
    }

    async fn item(&self, run_id: &str, item: &str, report: StepReport) -> RunState {
        self.runner
            .record_parallel_item_result(run_id, item, report)
            .await
            .unwrap()
    }

    async fn event_types(&self, run_id: &str) -> Vec<EventType> {
        self.events
            .list(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[tokio::test]
async fn test_start_unknown_workflow_type() {
    let f = fixture().await;
    let err = f.runner.start("w9_unknown", "book_test").await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownWorkflowType(t) if t == "w9_unknown"));
    assert!(f.runner.list_runs(RunFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_creates_running_run() {
    let f = fixture().await;
    let state = f.start().await;

    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("step1"));
    assert_eq!(state.owner_id, "book_test");
    assert!(state.human_gate.is_none());
    assert!(state.resume_context.completed_steps.is_empty());

    let run = f.runner.get_run(&state.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.checkpoint.current_step.as_deref(), Some("step1"));
    assert_eq!(f.event_types(&state.run_id).await, vec![EventType::Started]);
}

#[tokio::test]
async fn test_start_with_input_version() {
    let f = fixture().await;
    let state = f
        .runner
        .start_with_input("w1_editing", "book_test", Some("ver_1"))
        .await
        .unwrap();
    let run = f.runner.get_run(&state.run_id).await.unwrap().unwrap();
    assert_eq!(run.input_version_id.as_deref(), Some("ver_1"));
    assert!(run.output_version_id.is_none());
}

#[tokio::test]
async fn test_two_failures_pause_with_escalation() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let first = f.fail(&run_id, "chapter too short").await;
    assert_eq!(first.status, RunStatus::Running);
    assert_eq!(first.current_step.as_deref(), Some("step1"));
    assert_eq!(first.error.as_deref(), Some("chapter too short"));
    assert_eq!(first.resume_context.pending_retry.as_ref().unwrap().attempt, 1);
    assert!(first.escalation.is_none());

    let second = f.fail(&run_id, "chapter too short").await;
    assert_eq!(second.status, RunStatus::Paused);
    assert_eq!(second.current_step.as_deref(), Some("step1"));
    assert!(second.error.as_deref().unwrap().contains("Escalated to human"));
    let escalation = second.escalation.unwrap();
    assert_eq!(escalation.category, RejectionCategory::Mechanics);
    assert_eq!(escalation.retry_count, 2);
    assert_eq!(escalation.target, "human-reviewer");

    assert_eq!(
        f.event_types(&run_id).await,
        vec![
            EventType::Started,
            EventType::Rejected,
            EventType::Rejected,
            EventType::Escalated,
            EventType::Paused,
        ]
    );
}

#[tokio::test]
async fn test_retry_routes_to_category_handler() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let state = f
        .runner
        .process_step_result(
            &run_id,
            StepReport::failed("purple prose").with_category(RejectionCategory::Style),
        )
        .await
        .unwrap();
    let retry = state.resume_context.pending_retry.unwrap();
    assert_eq!(retry.category, Some(RejectionCategory::Style));
    assert_eq!(retry.handler.as_deref(), Some("style-editor"));
}

#[tokio::test]
async fn test_category_max_retries_overrides_threshold() {
    let mut escalation = EscalationConfig::default();
    escalation.max_retries.insert("scope".to_string(), 1);
    let f = fixture_config(escalation, RunnerConfig::default()).await;
    let run_id = f.start().await.run_id;

    let state = f
        .runner
        .process_step_result(
            &run_id,
            StepReport::failed("wanders off topic").with_category(RejectionCategory::Scope),
        )
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert_eq!(state.escalation.unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_failure_uses_reported_category() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    f.runner
        .process_step_result(
            &run_id,
            StepReport::failed("passive voice").with_category(RejectionCategory::Style),
        )
        .await
        .unwrap();

    let tracker = f.runner.tracker();
    assert_eq!(
        tracker.get_retry_count(&run_id, RejectionCategory::Style).await.unwrap(),
        1
    );
    assert_eq!(
        tracker.get_retry_count(&run_id, RejectionCategory::Mechanics).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_failure_without_error_text() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    let report = StepReport {
        postconditions_passed: false,
        ..Default::default()
    };

    let state = f.runner.process_step_result(&run_id, report).await.unwrap();
    assert_eq!(
        state.error.as_deref(),
        Some("Postconditions failed for step step1")
    );
}

#[tokio::test]
async fn test_success_advances_and_clears_retry() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "typos").await;

    let state = f.pass(&run_id, json!({"words": 900})).await;
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("step2"));
    assert!(state.error.is_none());
    assert!(state.resume_context.pending_retry.is_none());
    assert_eq!(state.resume_context.step_results["step1"], json!({"words": 900}));
}

#[tokio::test]
async fn test_loop_forced_out_after_max_iterations() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let mut loops_back = 0;
    let mut evaluations = 0;
    let state = loop {
        f.pass(&run_id, json!({})).await;
        let state = f.pass(&run_id, json!({"decision": "revise"})).await;
        evaluations += 1;
        if state.current_step.as_deref() == Some("step1") {
            loops_back += 1;
        } else {
            break state;
        }
        assert!(evaluations < 10, "loop never terminated");
    };

    assert_eq!(loops_back, 3);
    assert_eq!(evaluations, 4);
    assert_eq!(state.current_step.as_deref(), Some("review"));
    assert_eq!(state.status, RunStatus::AwaitingHuman);
    assert_eq!(state.resume_context.iteration_count("step2"), 4);
    assert_eq!(state.resume_context.times_completed("step1"), 4);
}

#[tokio::test]
async fn test_hint_overrides_next() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let state = f
        .runner
        .process_step_result(&run_id, StepReport::passed(json!({})).with_hint("publish"))
        .await
        .unwrap();
    assert_eq!(state.current_step.as_deref(), Some("publish"));
}

#[tokio::test]
async fn test_unknown_hint_rolls_back() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let err = f
        .runner
        .process_step_result(&run_id, StepReport::passed(json!({})).with_hint("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::StepNotFound(_)));

    let run = f.runner.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.current_step.as_deref(), Some("step1"));
    assert!(run.checkpoint.completed_steps.is_empty());
}

#[tokio::test]
async fn test_process_unknown_run() {
    let f = fixture().await;
    let err = f
        .runner
        .process_step_result("run_missing", StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RunNotFound(_)));
}

#[tokio::test]
async fn test_entering_gate_awaits_human() {
    let f = fixture().await;
    let state = f.at_gate().await;

    assert_eq!(state.status, RunStatus::AwaitingHuman);
    assert_eq!(state.current_step.as_deref(), Some("review"));
    let gate = state.human_gate.unwrap();
    assert_eq!(gate.prompt, "Approve the edit?");
    assert_eq!(gate.options.len(), 3);
    assert_eq!(gate.context["step2.summary"], json!("clean"));

    let err = f
        .runner
        .process_step_result(&state.run_id, StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AwaitingHuman(_)));
}

#[tokio::test]
async fn test_gate_on_initial_step() {
    let f = fixture().await;
    let state = f.runner.start("gated_start", "book_test").await.unwrap();
    assert_eq!(state.status, RunStatus::AwaitingHuman);
    let gate = state.human_gate.unwrap();
    assert_eq!(gate.step, "kickoff");
    assert_eq!(gate.context["brief"], Value::Null);

    let state = f
        .runner
        .handle_gate_decision(&state.run_id, "Go", None)
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("work"));
}

#[tokio::test]
async fn test_gate_invalid_option() {
    let f = fixture().await;
    let run_id = f.at_gate().await.run_id;

    let err = f
        .runner
        .handle_gate_decision(&run_id, "Maybe", None)
        .await
        .unwrap_err();
    match err {
        WorkflowError::InvalidGateOption { option, valid } => {
            assert_eq!(option, "Maybe");
            assert_eq!(valid, vec!["Approve", "Reject", "Request Changes"]);
        }
        other => panic!("expected InvalidGateOption, got {other:?}"),
    }
}

#[tokio::test]
async fn test_gate_requires_input() {
    let f = fixture().await;
    let run_id = f.at_gate().await.run_id;

    let err = f
        .runner
        .handle_gate_decision(&run_id, "Request Changes", Some("  ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GateInputRequired(_)));

    let state = f
        .runner
        .handle_gate_decision(
            &run_id,
            "Request Changes",
            Some("tighten chapter 3".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("step1"));
    assert_eq!(
        state.resume_context.data["review.input"],
        json!("tighten chapter 3")
    );
    let decision = &state.resume_context.gate_decisions[0];
    assert_eq!(decision.option, "Request Changes");
    assert_eq!(decision.input.as_deref(), Some("tighten chapter 3"));
}

#[tokio::test]
async fn test_gate_reject_completes() {
    let f = fixture().await;
    let run_id = f.at_gate().await.run_id;

    let state = f
        .runner
        .handle_gate_decision(&run_id, "Reject", None)
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.current_step.is_none());

    let completed = f
        .events
        .latest(&run_id, EventType::Completed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.data["approved"], json!(false));
    assert_eq!(completed.data["option"], json!("Reject"));
}

#[tokio::test]
async fn test_gate_approve_then_finish() {
    let f = fixture().await;
    let run_id = f.at_gate().await.run_id;

    let state = f
        .runner
        .handle_gate_decision(&run_id, "Approve", None)
        .await
        .unwrap();
    assert_eq!(state.current_step.as_deref(), Some("publish"));

    let state = f.pass(&run_id, json!({"url": "https://example.test/book"})).await;
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(
        f.event_types(&run_id).await.last(),
        Some(&EventType::Completed)
    );
}

#[tokio::test]
async fn test_gate_decision_without_gate() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let err = f
        .runner
        .handle_gate_decision(&run_id, "Approve", None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NoHumanGate(step) if step == "step1"));
}

#[tokio::test]
async fn test_resume_requires_resolved_escalation() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "broken").await;
    let paused = f.fail(&run_id, "broken").await;
    let escalation = paused.escalation.unwrap();

    let err = f.runner.resume(&run_id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::EscalationUnresolved(_)));

    f.runner
        .escalations()
        .resolve_escalation(&escalation.id, "outline rewritten")
        .await
        .unwrap();

    let state = f.runner.resume(&run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("step1"));
    assert!(state.resume_context.pending_retry.is_none());

    let tracker = f.runner.tracker();
    assert!(tracker.get_unresolved_rejections(&run_id).await.unwrap().is_empty());
    assert_eq!(
        tracker.get_retry_count(&run_id, RejectionCategory::Mechanics).await.unwrap(),
        2
    );
    assert_eq!(
        f.event_types(&run_id).await.last(),
        Some(&EventType::Resumed)
    );
}

#[tokio::test]
async fn test_resume_restores_retry_budget() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "broken").await;
    let first = f.fail(&run_id, "broken").await.escalation.unwrap();
    f.runner
        .escalations()
        .resolve_escalation(&first.id, "fixed")
        .await
        .unwrap();
    f.runner.resume(&run_id).await.unwrap();

    let retry = f.fail(&run_id, "broken again").await;
    assert_eq!(retry.status, RunStatus::Running);
    assert_eq!(retry.resume_context.pending_retry.as_ref().unwrap().attempt, 1);
    assert!(retry.escalation.is_none());
}

#[tokio::test]
async fn test_second_escalation_needs_new_resolution() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "broken").await;
    let first = f.fail(&run_id, "broken").await.escalation.unwrap();
    f.runner
        .escalations()
        .resolve_escalation(&first.id, "fixed")
        .await
        .unwrap();
    f.runner.resume(&run_id).await.unwrap();

    f.fail(&run_id, "broken again").await;
    let paused = f.fail(&run_id, "broken again").await;
    assert_eq!(paused.status, RunStatus::Paused);
    let second = paused.escalation.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.status, EscalationStatus::Pending);
    assert_eq!(second.retry_count, 4);

    let err = f.runner.resume(&run_id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::EscalationUnresolved(_)));

    f.runner
        .escalations()
        .resolve_escalation(&second.id, "rewritten from outline")
        .await
        .unwrap();
    let state = f.runner.resume(&run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(
        f.runner.escalations().list_escalations().await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_resume_at_gate_has_no_side_effects() {
    let f = fixture().await;
    let run_id = f.at_gate().await.run_id;
    let before = f.runner.get_run(&run_id).await.unwrap().unwrap();

    let state = f.runner.resume(&run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::AwaitingHuman);
    assert!(state.human_gate.is_some());

    let after = f.runner.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(before.updated_at, after.updated_at);
    assert_eq!(before.checkpoint, after.checkpoint);
}

#[tokio::test]
async fn test_resume_running_reports_position() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "typos").await;

    let state = f.runner.resume(&run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("step1"));
    assert_eq!(state.error.as_deref(), Some("typos"));
}

#[tokio::test]
async fn test_terminal_runs_reject_commands() {
    let f = fixture().await;
    let run_id = f.at_gate().await.run_id;
    f.runner
        .handle_gate_decision(&run_id, "Reject", None)
        .await
        .unwrap();

    assert!(matches!(
        f.runner.resume(&run_id).await,
        Err(WorkflowError::RunNotActive { status: RunStatus::Completed, .. })
    ));
    assert!(matches!(
        f.runner
            .process_step_result(&run_id, StepReport::passed(json!({})))
            .await,
        Err(WorkflowError::RunNotActive { .. })
    ));
    assert!(matches!(
        f.runner.handle_gate_decision(&run_id, "Approve", None).await,
        Err(WorkflowError::RunNotActive { .. })
    ));
    assert!(matches!(
        f.runner.cancel(&run_id, "too late").await,
        Err(WorkflowError::RunNotActive { .. })
    ));
}

#[tokio::test]
async fn test_process_on_paused_run() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "broken").await;
    f.fail(&run_id, "broken").await;

    let err = f
        .runner
        .process_step_result(&run_id, StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::RunNotActive { status: RunStatus::Paused, .. }
    ));
}

#[tokio::test]
async fn test_cancel_running_and_awaiting() {
    let f = fixture().await;

    let running = f.start().await.run_id;
    let state = f.runner.cancel(&running, "book shelved").await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(
        state.resume_context.data["cancel_reason"],
        json!("book shelved")
    );
    let failed = f
        .events
        .latest(&running, EventType::Failed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.data["reason"], json!("book shelved"));

    let waiting = f.at_gate().await.run_id;
    let state = f.runner.cancel(&waiting, "no reviewer").await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.human_gate.is_none());
}

#[tokio::test]
async fn test_cancel_paused() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "broken").await;
    f.fail(&run_id, "broken").await;

    let state = f.runner.cancel(&run_id, "giving up").await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_record_approval() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let err = f.runner.record_approval(&run_id, "editor-in-chief").await.unwrap_err();
    assert!(matches!(err, WorkflowError::RunNotCompleted(_)));

    f.runner
        .process_step_result(&run_id, StepReport::passed(json!({})).with_hint("publish"))
        .await
        .unwrap();
    let state = f.pass(&run_id, json!({})).await;
    assert_eq!(state.status, RunStatus::Completed);

    let event = f
        .runner
        .record_approval(&run_id, "editor-in-chief")
        .await
        .unwrap();
    assert_eq!(event.event_type, EventType::Completed);
    assert_eq!(event.agent.as_deref(), Some("editor-in-chief"));

    let latest = f
        .events
        .latest(&run_id, EventType::Completed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.data["approved"], json!(true));
    assert_eq!(latest.data["approved_by"], json!("editor-in-chief"));
}

#[tokio::test]
async fn test_link_output_version() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;

    let run = f.runner.link_output_version(&run_id, "ver_9").await.unwrap();
    assert_eq!(run.output_version_id.as_deref(), Some("ver_9"));

    let loaded = f.runner.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(loaded.output_version_id.as_deref(), Some("ver_9"));

    assert!(matches!(
        f.runner.link_output_version("run_missing", "ver_1").await,
        Err(WorkflowError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn test_get_state_of_paused_run() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    f.fail(&run_id, "broken").await;
    f.fail(&run_id, "broken").await;

    let state = f.runner.get_state(&run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.error.unwrap().starts_with("Escalated to human"));
    assert_eq!(state.escalation.unwrap().status, EscalationStatus::Pending);

    assert!(matches!(
        f.runner.get_state("run_missing").await,
        Err(WorkflowError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn test_list_runs_by_owner_and_status() {
    let f = fixture().await;
    f.start().await;
    let waiting = f.at_gate().await.run_id;
    f.runner.start("w1_editing", "book_other").await.unwrap();

    let mine = f.runner.list_runs(RunFilter::owner("book_test")).await.unwrap();
    assert_eq!(mine.len(), 2);

    let awaiting = f
        .runner
        .list_runs(RunFilter::default().with_status(RunStatus::AwaitingHuman))
        .await
        .unwrap();
    assert_eq!(awaiting.len(), 1);
    assert_eq!(awaiting[0].id, waiting);
}

/// Plays back canned reports in order and records the requests it saw.
struct ScriptedExecutor {
    reports: Mutex<VecDeque<Result<StepReport, ExecutorError>>>,
    seen: Mutex<Vec<StepRequest>>,
}

impl ScriptedExecutor {
    fn new(reports: Vec<Result<StepReport, ExecutorError>>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<StepRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, request: &StepRequest) -> Result<StepReport, ExecutorError> {
        self.seen.lock().unwrap().push(request.clone());
        self.reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StepReport::failed("script exhausted")))
    }
}

#[tokio::test]
async fn test_drive_until_gate() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    let executor = ScriptedExecutor::new(vec![
        Ok(StepReport::failed("flaky")),
        Ok(StepReport::passed(json!({"words": 1000}))),
        Ok(StepReport::passed(json!({"decision": "approve"}))),
    ]);

    let state = f.runner.run_until_suspended(&run_id, &executor).await.unwrap();
    assert_eq!(state.status, RunStatus::AwaitingHuman);
    assert_eq!(state.current_step.as_deref(), Some("review"));

    let seen = executor.seen();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].attempt, 1);
    assert_eq!(seen[1].step, "step1");
    assert_eq!(seen[1].attempt, 2);
    assert_eq!(seen[2].step, "step2");
    assert_eq!(seen[2].command, "edit");
    assert_eq!(seen[2].prior_results["step1"], json!({"words": 1000}));
}

#[tokio::test]
async fn test_drive_treats_executor_error_as_failure() {
    let f = fixture().await;
    let run_id = f.start().await.run_id;
    let executor = ScriptedExecutor::new(vec![
        Err(ExecutorError::Timeout(600)),
        Err(ExecutorError::Spawn("no such shell".to_string())),
    ]);

    let state = f.runner.run_until_suspended(&run_id, &executor).await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.escalation.is_some());
    assert_eq!(executor.seen().len(), 2);
}

#[tokio::test]
async fn test_drive_respects_max_auto_steps() {
    let f = fixture_with(
        3,
        RunnerConfig {
            max_auto_steps: 2,
            ..Default::default()
        },
    )
    .await;
    let run_id = f.start().await.run_id;
    let executor = ScriptedExecutor::new(vec![
        Ok(StepReport::passed(json!({}))),
        Ok(StepReport::passed(json!({"decision": "revise"}))),
        Ok(StepReport::passed(json!({}))),
    ]);

    let state = f.runner.run_until_suspended(&run_id, &executor).await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("step1"));
    assert_eq!(executor.seen().len(), 2);
}

#[tokio::test]
async fn test_runner_rejects_unknown_default_category() {
    let db = Database::in_memory().await.unwrap();
    let result = WorkflowRunner::new(
        db,
        WorkflowCatalog::new(),
        EscalationConfig::default(),
        RunnerConfig {
            default_rejection_category: "vibes".to_string(),
            ..Default::default()
        },
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_parallel_step_fans_out_items() {
    let f = fixture().await;
    let state = f.at_fan_out(json!(["ch1", "ch2", "ch3"])).await;

    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step.as_deref(), Some("edit_chapters"));
    assert_eq!(state.parallel_items, vec!["ch1", "ch2", "ch3"]);
    let progress = state.resume_context.parallel.unwrap();
    assert_eq!(progress.step, "edit_chapters");
    assert_eq!(progress.status().total, 3);
}

#[tokio::test]
async fn test_parallel_step_without_items_rolls_back() {
    let f = fixture().await;
    let run_id = f.runner.start("w2_chapters", "book_test").await.unwrap().run_id;

    for chapters in [json!([]), json!("ch1"), json!([1, 2])] {
        let err = f
            .runner
            .process_step_result(&run_id, StepReport::passed(json!({ "chapters": chapters })))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::ParallelItemsMissing { ref step, ref key }
                if step == "edit_chapters" && key == "outline.chapters"
        ));
    }

    let run = f.runner.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.current_step.as_deref(), Some("outline"));
    assert!(run.checkpoint.completed_steps.is_empty());
}

#[tokio::test]
async fn test_parallel_items_complete_step() {
    let f = fixture().await;
    let run_id = f.at_fan_out(json!(["ch1", "ch2"])).await.run_id;

    let partial = f
        .item(&run_id, "ch1", StepReport::passed(json!({"words": 3100})))
        .await;
    assert_eq!(partial.current_step.as_deref(), Some("edit_chapters"));
    assert_eq!(partial.parallel_items, vec!["ch2"]);

    let done = f
        .item(&run_id, "ch2", StepReport::passed(json!({"words": 2800})))
        .await;
    assert_eq!(done.status, RunStatus::Running);
    assert_eq!(done.current_step.as_deref(), Some("assemble"));
    assert!(done.parallel_items.is_empty());
    assert!(done.resume_context.parallel.is_none());
    assert_eq!(
        done.resume_context.step_results["edit_chapters"],
        json!({"ch1": {"words": 3100}, "ch2": {"words": 2800}})
    );
}

#[tokio::test]
async fn test_failed_item_is_queued_again() {
    let f = fixture_with(3, RunnerConfig::default()).await;
    let run_id = f.at_fan_out(json!(["ch1", "ch2"])).await.run_id;

    let failed = f.item(&run_id, "ch1", StepReport::failed("tense shifts")).await;
    assert_eq!(failed.status, RunStatus::Running);
    assert_eq!(failed.error.as_deref(), Some("tense shifts"));
    assert_eq!(failed.parallel_items, vec!["ch2"]);

    let settled = f.item(&run_id, "ch2", StepReport::passed(json!("ok"))).await;
    assert_eq!(settled.current_step.as_deref(), Some("edit_chapters"));
    assert_eq!(settled.parallel_items, vec!["ch1"]);
    let progress = settled.resume_context.parallel.unwrap();
    let ch1 = progress.item("ch1").unwrap();
    assert_eq!(ch1.retry_count, 1);
    assert_eq!(ch1.handler.as_deref(), Some("mechanics-reviewer"));

    let done = f.item(&run_id, "ch1", StepReport::passed(json!("fixed"))).await;
    assert_eq!(done.current_step.as_deref(), Some("assemble"));
    assert_eq!(
        done.resume_context.step_results["edit_chapters"],
        json!({"ch1": "fixed", "ch2": "ok"})
    );
}

#[tokio::test]
async fn test_item_failures_escalate_and_resume_reports_pending() {
    let f = fixture().await;
    let run_id = f.at_fan_out(json!(["ch1", "ch2", "ch3"])).await.run_id;

    f.item(&run_id, "ch1", StepReport::passed(json!("ok"))).await;
    f.item(&run_id, "ch2", StepReport::failed("comma splices")).await;
    let paused = f.item(&run_id, "ch3", StepReport::failed("comma splices")).await;
    assert_eq!(paused.status, RunStatus::Paused);
    assert!(paused.error.as_deref().unwrap().contains("Escalated to human"));
    assert!(paused.parallel_items.is_empty());
    let escalation = paused.escalation.unwrap();
    assert_eq!(escalation.retry_count, 2);

    let err = f.runner.resume(&run_id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::EscalationUnresolved(_)));

    f.runner
        .escalations()
        .resolve_escalation(&escalation.id, "style sheet clarified")
        .await
        .unwrap();
    let resumed = f.runner.resume(&run_id).await.unwrap();
    assert_eq!(resumed.status, RunStatus::Running);
    assert_eq!(resumed.current_step.as_deref(), Some("edit_chapters"));
    assert_eq!(resumed.parallel_items, vec!["ch2", "ch3"]);

    let again = f.runner.resume(&run_id).await.unwrap();
    assert_eq!(again.parallel_items, vec!["ch2", "ch3"]);

    assert_eq!(
        f.event_types(&run_id).await,
        vec![
            EventType::Started,
            EventType::Rejected,
            EventType::Rejected,
            EventType::Escalated,
            EventType::Paused,
            EventType::Resumed,
        ]
    );
}

#[tokio::test]
async fn test_parallel_report_errors() {
    let f = fixture().await;
    let plain = f.start().await.run_id;
    let err = f
        .runner
        .record_parallel_item_result(&plain, "ch1", StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotParallelStep(step) if step == "step1"));

    let run_id = f.at_fan_out(json!(["ch1"])).await.run_id;
    let err = f
        .runner
        .process_step_result(&run_id, StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ParallelStep(step) if step == "edit_chapters"));

    let err = f
        .runner
        .record_parallel_item_result(&run_id, "ch9", StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownParallelItem { ref item, .. } if item == "ch9"));
}

#[tokio::test]
async fn test_settled_item_rejects_second_report() {
    let f = fixture_with(3, RunnerConfig::default()).await;
    let run_id = f.at_fan_out(json!(["ch1", "ch2"])).await.run_id;
    f.item(&run_id, "ch1", StepReport::failed("typos")).await;

    let err = f
        .runner
        .record_parallel_item_result(&run_id, "ch1", StepReport::passed(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ParallelItemSettled { ref item, .. } if item == "ch1"));
}

#[tokio::test]
async fn test_drive_parallel_step() {
    let f = fixture().await;
    let run_id = f.runner.start("w2_chapters", "book_test").await.unwrap().run_id;
    let executor = ScriptedExecutor::new(vec![
        Ok(StepReport::passed(json!({"chapters": ["ch1", "ch2"]}))),
        Ok(StepReport::passed(json!("ch1 edited"))),
        Ok(StepReport::failed("widows and orphans")),
        Ok(StepReport::passed(json!("ch2 edited"))),
        Ok(StepReport::passed(json!({"pages": 212}))),
    ]);

    let state = f.runner.run_until_suspended(&run_id, &executor).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let seen = executor.seen();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0].item, None);
    assert_eq!(seen[1].item.as_deref(), Some("ch1"));
    assert_eq!(seen[2].item.as_deref(), Some("ch2"));
    assert_eq!(seen[2].attempt, 1);
    assert_eq!(seen[3].item.as_deref(), Some("ch2"));
    assert_eq!(seen[3].attempt, 2);
    assert_eq!(seen[3].handler.as_deref(), Some("mechanics-reviewer"));
    assert_eq!(seen[4].step, "assemble");
    assert_eq!(
        seen[4].prior_results["edit_chapters"],
        json!({"ch1": "ch1 edited", "ch2": "ch2 edited"})
    );
}
