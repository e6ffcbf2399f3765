mod common;

use serde_json::json;

use common::{
    add_step, multiply_by_init_step, number_schema, pair_schema, scale_step, sum_of_steps,
};
use loomflow::flow::{MapSource, MapSpec, WorkflowBuilder, predicate};
use loomflow::run::StartOptions;
use loomflow::step::{Step, StepOutcome};
use loomflow::types::{RunStatus, StepResult, WorkflowResult};
use loomflow::workflow::CreateRunOptions;

#[tokio::test]
async fn sequential_arithmetic_runs_to_completion() {
    let workflow = WorkflowBuilder::new("arith")
        .input_schema(pair_schema())
        .output_schema(number_schema())
        .then(add_step())
        .then(multiply_by_init_step())
        .commit()
        .unwrap();

    let result = workflow.start(json!({"a": 2, "b": 3})).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            assert_eq!(result, json!(30.0));
            assert!(steps["add"].is_completed());
            assert!(steps["multiply"].is_completed());
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn parallel_with_reduction() {
    let workflow = WorkflowBuilder::new("parallel-sum")
        .parallel(vec![scale_step("s1", 2.0), scale_step("s2", 3.0)])
        .then(sum_of_steps("sum", &["s1", "s2"]))
        .commit()
        .unwrap();

    let result = workflow.start(json!(2)).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            assert_eq!(result, json!(10.0));
            assert_eq!(steps["s1"], StepResult::Completed { output: json!(4.0) });
            assert_eq!(steps["s2"], StepResult::Completed { output: json!(6.0) });
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn parallel_output_is_a_record_keyed_by_child_id() {
    let record = Step::builder("record")
        .handler(|ctx| async move { Ok(StepOutcome::Complete(ctx.input_data.clone())) })
        .build()
        .unwrap();
    let workflow = WorkflowBuilder::new("parallel-record")
        .parallel(vec![scale_step("s1", 2.0), scale_step("s2", 3.0)])
        .then(record)
        .commit()
        .unwrap();

    let result = workflow.start(json!(1)).await.unwrap();
    match result {
        WorkflowResult::Completed { result, .. } => {
            assert_eq!(result, json!({"s1": 2.0, "s2": 3.0}));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn do_while_loop_counts_to_three() {
    let counter = Step::builder("counter")
        .input_schema(number_schema())
        .output_schema(number_schema())
        .handler(|ctx| async move {
            let x = ctx.input_data.as_f64().unwrap_or_default();
            Ok(StepOutcome::Complete(json!(x + 1.0)))
        })
        .build()
        .unwrap();

    let workflow = WorkflowBuilder::new("loop")
        .dowhile(
            counter,
            predicate(|ctx| Ok(ctx.input_data.as_f64().unwrap_or_default() < 3.0)),
        )
        .commit()
        .unwrap();

    let result = workflow.start(json!(0)).await.unwrap();
    match result {
        WorkflowResult::Completed { result, .. } => assert_eq!(result, json!(3.0)),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn foreach_preserves_input_order() {
    let workflow = WorkflowBuilder::new("foreach")
        .foreach(scale_step("double", 2.0), 2)
        .commit()
        .unwrap();

    let result = workflow.start(json!([1, 2, 3, 4, 5])).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            assert_eq!(result, json!([2.0, 4.0, 6.0, 8.0, 10.0]));
            // The aggregate array is the step's outstanding result.
            assert_eq!(
                steps["double"],
                StepResult::Completed {
                    output: json!([2.0, 4.0, 6.0, 8.0, 10.0])
                }
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn foreach_rejects_non_array_input() {
    let workflow = WorkflowBuilder::new("foreach-shape")
        .foreach(scale_step("double", 2.0), 2)
        .commit()
        .unwrap();

    let result = workflow.start(json!({"not": "an array"})).await.unwrap();
    match result {
        WorkflowResult::Failed { error, steps } => {
            assert!(error.contains("expects an array"), "error was: {error}");
            assert!(steps["double"].is_failed());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn branch_takes_first_matching_arm() {
    let workflow = WorkflowBuilder::new("branchy")
        .branch(vec![
            (
                predicate(|ctx| Ok(ctx.input_data.as_f64().unwrap_or_default() < 0.0)),
                scale_step("negate", -1.0),
            ),
            (
                predicate(|ctx| Ok(ctx.input_data.as_f64().unwrap_or_default() >= 0.0)),
                scale_step("keep", 1.0),
            ),
        ])
        .commit()
        .unwrap();

    let result = workflow.start(json!(-4)).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            // The conditional's output is a record keyed by the executed child.
            assert_eq!(result, json!({"negate": 4.0}));
            assert!(steps["negate"].is_completed());
            assert!(!steps.contains_key("keep"));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn branch_without_match_completes_with_no_output() {
    let workflow = WorkflowBuilder::new("no-match")
        .branch(vec![(
            predicate(|_| Ok(false)),
            scale_step("unreachable", 1.0),
        )])
        .commit()
        .unwrap();

    let result = workflow.start(json!(1)).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            assert_eq!(result, json!(null));
            assert!(steps.is_empty());
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_condition_fails_the_entry() {
    let workflow = WorkflowBuilder::new("bad-condition")
        .branch(vec![(
            predicate(|_| Err(loomflow::step::StepError::message("boom"))),
            scale_step("unreachable", 1.0),
        )])
        .commit()
        .unwrap();

    let result = workflow.start(json!(1)).await.unwrap();
    match result {
        WorkflowResult::Failed { error, .. } => assert!(error.contains("boom")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn declarative_map_rebuilds_next_input() {
    let consume = Step::builder("consume")
        .handler(|ctx| async move {
            let sum = ctx.input_data["sum"].as_f64().unwrap_or_default();
            let factor = ctx.input_data["factor"].as_f64().unwrap_or_default();
            let seed = ctx.input_data["seed"].as_f64().unwrap_or_default();
            Ok(StepOutcome::Complete(json!(sum * factor + seed)))
        })
        .build()
        .unwrap();

    let workflow = WorkflowBuilder::new("mapped")
        .then(add_step())
        .map(MapSpec::Record(vec![
            (
                "sum".to_string(),
                MapSource::Step {
                    step: "add".to_string(),
                    path: String::new(),
                },
            ),
            ("factor".to_string(), MapSource::Value { value: json!(10) }),
            (
                "seed".to_string(),
                MapSource::InitData {
                    path: "a".to_string(),
                },
            ),
        ]))
        .then(consume)
        .commit()
        .unwrap();

    let result = workflow.start(json!({"a": 2, "b": 3})).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            // (2 + 3) * 10 + 2
            assert_eq!(result, json!(52.0));
            assert_eq!(
                steps["map@1"],
                StepResult::Completed {
                    output: json!({"sum": 5.0, "factor": 10, "seed": 2})
                }
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn functional_map_sees_the_step_context() {
    let workflow = WorkflowBuilder::new("fn-mapped")
        .then(add_step())
        .map_fn(|ctx| {
            let sum = ctx.input_data.as_f64().unwrap_or_default();
            Ok(json!(sum * 100.0))
        })
        .then(scale_step("halve", 0.5))
        .commit()
        .unwrap();

    let result = workflow.start(json!({"a": 1, "b": 1})).await.unwrap();
    match result {
        WorkflowResult::Completed { result, .. } => assert_eq!(result, json!(100.0)),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn map_fails_on_missing_path() {
    let workflow = WorkflowBuilder::new("bad-map")
        .then(add_step())
        .map(MapSpec::Record(vec![(
            "value".to_string(),
            MapSource::InitData {
                path: "missing.path".to_string(),
            },
        )]))
        .then(scale_step("after", 1.0))
        .commit()
        .unwrap();

    let result = workflow.start(json!({"a": 1, "b": 1})).await.unwrap();
    match result {
        WorkflowResult::Failed { error, steps } => {
            assert!(error.contains("missing"), "error was: {error}");
            assert!(steps["map@1"].is_failed());
            assert!(!steps.contains_key("after"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn workflow_input_violation_fails_without_step_results() {
    let workflow = WorkflowBuilder::new("validated")
        .input_schema(pair_schema())
        .then(add_step())
        .commit()
        .unwrap();

    let result = workflow.start(json!({"a": "nope"})).await.unwrap();
    match result {
        WorkflowResult::Failed { error, steps } => {
            assert!(error.contains("failed schema validation"), "error: {error}");
            assert!(steps.is_empty());
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let recovered = workflow.start(json!({"a": 1, "b": 2})).await.unwrap();
    assert!(recovered.is_completed());
}

#[tokio::test]
async fn step_input_violation_marks_the_step_failed() {
    let workflow = WorkflowBuilder::new("step-validated")
        .then(scale_step("double", 2.0))
        .commit()
        .unwrap();

    let result = workflow.start(json!("not a number")).await.unwrap();
    match result {
        WorkflowResult::Failed { error, steps } => {
            assert!(error.contains("input for step 'double'"), "error: {error}");
            assert!(steps["double"].is_failed());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn step_output_violation_marks_the_step_failed() {
    let lying = Step::builder("lying")
        .output_schema(number_schema())
        .handler(|_| async move { Ok(StepOutcome::Complete(json!("strings are not numbers"))) })
        .build()
        .unwrap();
    let workflow = WorkflowBuilder::new("output-validated")
        .then(lying)
        .commit()
        .unwrap();

    let result = workflow.start(json!(null)).await.unwrap();
    match result {
        WorkflowResult::Failed { error, steps } => {
            assert!(error.contains("output of step 'lying'"), "error: {error}");
            assert!(steps["lying"].is_failed());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn step_failure_short_circuits_later_entries() {
    let exploding = Step::builder("exploding")
        .handler(|_| async move {
            Err(loomflow::step::StepError::message("deliberate failure"))
        })
        .build()
        .unwrap();
    let workflow = WorkflowBuilder::new("short-circuit")
        .then(exploding)
        .then(scale_step("after", 1.0))
        .commit()
        .unwrap();

    let result = workflow.start(json!(1)).await.unwrap();
    match result {
        WorkflowResult::Failed { error, steps } => {
            assert!(error.contains("deliberate failure"));
            assert!(steps["exploding"].is_failed());
            assert!(!steps.contains_key("after"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn committed_workflow_is_usable_as_a_step() {
    let inner = WorkflowBuilder::new("inner-sum")
        .input_schema(pair_schema())
        .output_schema(number_schema())
        .then(add_step())
        .commit()
        .unwrap();

    let outer = WorkflowBuilder::new("outer")
        .then(inner.as_step())
        .then(scale_step("double", 2.0))
        .commit()
        .unwrap();

    let result = outer.start(json!({"a": 3, "b": 4})).await.unwrap();
    match result {
        WorkflowResult::Completed { result, steps } => {
            assert_eq!(result, json!(14.0));
            // The nested run's root-level result is recorded under the
            // workflow's id.
            assert_eq!(
                steps["inner-sum"],
                StepResult::Completed { output: json!(7.0) }
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn run_state_reflects_the_walk() {
    let workflow = WorkflowBuilder::new("observable")
        .then(add_step())
        .then(multiply_by_init_step())
        .commit()
        .unwrap();

    let run = workflow.create_run(CreateRunOptions {
        run_id: Some("run-observable".to_string()),
    });
    let result = run
        .start(StartOptions::input(json!({"a": 2, "b": 2})))
        .await
        .unwrap();
    assert!(result.is_completed());

    let state = run.get_run_state();
    assert_eq!(state.run_id, "run-observable");
    assert_eq!(state.workflow_id, "observable");
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.current_step, None);
    assert_eq!(state.execution_path, vec![1]);
    assert!(state.suspended_paths.is_empty());
    assert_eq!(state.result(), Some(&json!(16.0)));
    assert_eq!(state.execution_graph.len(), 2);
    assert!(!state.events.is_empty());
}
