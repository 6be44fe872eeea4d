use super::*;
use crate::predicate::Predicate;

fn review_loop() -> WorkflowDefinition {
    WorkflowDefinition::new("review_loop", "Review loop", "draft")
        .with_step(StepDefinition::new("draft", "agents/writer").then("review"))
        .with_step(
            StepDefinition::new("review", "agents/editor").branch(
                Branch::new(Predicate::equals("decision", "revise"), "draft", "approve")
                    .max_iterations(3),
            ),
        )
        .with_step(
            StepDefinition::new("approve", "human").gate(
                HumanGate::new("Approve the draft?")
                    .with_context(["review.summary"])
                    .option(GateOption::to("Approve", "publish"))
                    .option(GateOption::to("Request Changes", "draft").requires_input())
                    .option(GateOption::end("Reject")),
            ),
        )
        .with_step(StepDefinition::new("publish", "agents/publisher"))
}

#[test]
fn test_valid_definition() {
    let def = review_loop();
    def.validate().unwrap();
    assert!(def.step("review").is_some());
    assert!(def.step("missing").is_none());
    assert!(def.step("approve").unwrap().human_gate().is_some());
    assert!(def.step("publish").unwrap().human_gate().is_none());
}

#[test]
fn test_require_step_reports_qualified_name() {
    let def = review_loop();
    let err = def.require_step("ghost").unwrap_err();
    assert!(matches!(err, WorkflowError::StepNotFound(ref name) if name == "review_loop.ghost"));
}

#[test]
fn test_validate_missing_initial_step() {
    let def = WorkflowDefinition::new("broken", "Broken", "nowhere")
        .with_step(StepDefinition::new("only", "noop"));
    let err = def.validate().unwrap_err().to_string();
    assert!(err.contains("initial step 'nowhere'"));
}

#[test]
fn test_validate_unknown_reference() {
    let def = WorkflowDefinition::new("broken", "Broken", "a")
        .with_step(StepDefinition::new("a", "noop").then("b"));
    let err = def.validate().unwrap_err().to_string();
    assert!(err.contains("unknown step 'b'"));
}

#[test]
fn test_validate_duplicate_steps_and_labels() {
    let def = WorkflowDefinition::new("broken", "Broken", "a")
        .with_step(StepDefinition::new("a", "noop"))
        .with_step(
            StepDefinition::new("a", "noop").gate(
                HumanGate::new("?")
                    .option(GateOption::end("Stop"))
                    .option(GateOption::end("Stop")),
            ),
        );
    let err = def.validate().unwrap_err().to_string();
    assert!(err.contains("duplicate step 'a'"));
    assert!(err.contains("repeats option 'Stop'"));
}

#[test]
fn test_validate_gate_without_options() {
    let def = WorkflowDefinition::new("broken", "Broken", "a")
        .with_step(StepDefinition::new("a", "noop").gate(HumanGate::new("?")));
    let err = def.validate().unwrap_err().to_string();
    assert!(err.contains("has no options"));
}

#[test]
fn test_validate_zero_max_iterations() {
    let def = WorkflowDefinition::new("broken", "Broken", "a").with_step(
        StepDefinition::new("a", "noop")
            .branch(Branch::new(Predicate::exists("x"), "a", "a").max_iterations(0)),
    );
    let err = def.validate().unwrap_err().to_string();
    assert!(err.contains("max_iterations = 0"));
}

#[test]
fn test_step_from_toml() {
    let toml_str = r#"
        workflow_type = "toml_flow"
        name = "TOML flow"
        initial_step = "write"

        [[steps]]
        name = "write"
        command = "agents/writer"
        preconditions = ["outline_exists"]
        next = "check"

        [[steps]]
        name = "check"
        command = "agents/checker"
        [steps.branch]
        on_true = "write"
        on_false = "done"
        max_iterations = 2
        [steps.branch.predicate]
        field = "decision"
        op = "eq"
        value = "revise"

        [[steps]]
        name = "done"
        command = "noop"
    "#;

    let def: WorkflowDefinition = toml::from_str(toml_str).unwrap();
    def.validate().unwrap();

    let write = def.step("write").unwrap();
    assert_eq!(write.preconditions, vec!["outline_exists"]);
    assert_eq!(write.next, StepNext::Fixed("check".to_string()));

    match &def.step("check").unwrap().next {
        StepNext::Branch(branch) => {
            assert_eq!(branch.max_iterations, Some(2));
            assert_eq!(branch.on_false, "done");
        }
        other => panic!("expected branch, got {other:?}"),
    }
    assert_eq!(def.step("done").unwrap().next, StepNext::Terminal);
}

#[test]
fn test_step_rejects_conflicting_next() {
    let toml_str = r#"
        name = "both"
        next = "a"
        [gate]
        prompt = "?"
        options = [{ label = "Go" }]
    "#;

    let result: Result<StepDefinition, _> = toml::from_str(toml_str);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("only one of next, branch or gate"));
}

#[test]
fn test_step_serializes_gate_in_file_form() {
    let def = review_loop();
    let json = serde_json::to_value(def.step("approve").unwrap()).unwrap();
    assert!(json.get("next").is_none());
    assert_eq!(json["gate"]["options"][1]["requires_input"], true);
    assert!(json["gate"]["options"][2].get("next_step").is_none());
}

#[test]
fn test_parallel_step_from_file() {
    let toml_str = r#"
        name = "edit_chapters"
        command = "agents/chapter-editor"
        parallel = "chapters"
        next = "assemble"
    "#;

    let step: StepDefinition = toml::from_str(toml_str).unwrap();
    assert!(step.is_parallel());
    assert_eq!(step.parallel_key.as_deref(), Some("chapters"));
    assert_eq!(step.next, StepNext::Fixed("assemble".to_string()));

    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(json["parallel"], "chapters");
}

#[test]
fn test_validate_rejects_gated_or_unkeyed_parallel_step() {
    let gated = WorkflowDefinition::new("fan", "Fan", "edit")
        .with_step(
            StepDefinition::new("edit", "agents/editor")
                .parallel("chapters")
                .gate(HumanGate::new("Done?").option(GateOption::end("Yes"))),
        );
    let err = gated.validate().unwrap_err().to_string();
    assert!(err.contains("cannot carry a gate"));

    let unkeyed = WorkflowDefinition::new("fan", "Fan", "edit")
        .with_step(StepDefinition::new("edit", "agents/editor").parallel(" "));
    let err = unkeyed.validate().unwrap_err().to_string();
    assert!(err.contains("empty key"));

    let ok = WorkflowDefinition::new("fan", "Fan", "edit")
        .with_step(StepDefinition::new("edit", "agents/editor").parallel("chapters"));
    ok.validate().unwrap();
}
