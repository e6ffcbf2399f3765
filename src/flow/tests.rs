use serde_json::json;

use super::mapping::resolve_path;
use super::*;
use crate::step::{Step, StepOutcome};

fn noop_step(id: &str) -> Step {
    Step::builder(id)
        .handler(|ctx| async move { Ok(StepOutcome::Complete(ctx.input_data.clone())) })
        .build()
        .unwrap()
}

#[test]
fn commit_rejects_empty_flow() {
    let err = WorkflowBuilder::new("empty").commit().unwrap_err();
    assert!(matches!(err, BuildError::EmptyFlow { .. }));
    assert!(err.to_string().contains("empty"));
}

#[test]
fn step_build_requires_handler() {
    let err = Step::builder("orphan").build().unwrap_err();
    assert!(matches!(err, BuildError::MissingHandler { .. }));
}

#[test]
fn map_steps_get_deterministic_ids() {
    let workflow = WorkflowBuilder::new("mapped")
        .then(noop_step("first"))
        .map(MapSpec::Record(vec![(
            "value".to_string(),
            MapSource::Value { value: json!(1) },
        )]))
        .then(noop_step("second"))
        .commit()
        .unwrap();

    let ids: Vec<_> = workflow
        .graph()
        .iter()
        .map(|entry| match entry {
            GraphEntry::Step { step } => step.id.clone(),
            other => panic!("unexpected entry {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec!["first", "map@1", "second"]);
}

#[test]
fn serialized_graph_reduces_conditions_to_markers() {
    let workflow = WorkflowBuilder::new("branchy")
        .branch(vec![
            (
                predicate(|ctx| Ok(ctx.input_data.as_f64().unwrap_or_default() < 0.0)),
                noop_step("negative"),
            ),
            (predicate(|_| Ok(true)), noop_step("fallback")),
        ])
        .dountil(
            noop_step("body"),
            predicate(|ctx| Ok(ctx.input_data.as_f64().unwrap_or_default() > 3.0)),
        )
        .commit()
        .unwrap();

    match &workflow.graph()[0] {
        GraphEntry::Conditional { conditions, steps } => {
            assert_eq!(conditions, &vec![OPAQUE_CONDITION.to_string(); 2]);
            assert_eq!(steps.len(), 2);
        }
        other => panic!("unexpected entry {other:?}"),
    }
    match &workflow.graph()[1] {
        GraphEntry::Loop {
            condition, kind, ..
        } => {
            assert_eq!(condition, OPAQUE_CONDITION);
            assert_eq!(*kind, LoopKind::DoUntil);
        }
        other => panic!("unexpected entry {other:?}"),
    }
}

#[test]
fn graph_hash_is_stable_for_identical_flows() {
    let build = || {
        WorkflowBuilder::new("hashy")
            .then(noop_step("a"))
            .parallel(vec![noop_step("b"), noop_step("c")])
            .commit()
            .unwrap()
    };
    assert_eq!(build().graph_hash(), build().graph_hash());

    let different = WorkflowBuilder::new("hashy")
        .then(noop_step("a"))
        .commit()
        .unwrap();
    assert_ne!(build().graph_hash(), different.graph_hash());
}

#[test]
fn foreach_concurrency_is_clamped() {
    let workflow = WorkflowBuilder::new("clamped")
        .foreach(noop_step("item"), 0)
        .commit()
        .unwrap();
    match &workflow.graph()[0] {
        GraphEntry::Foreach { concurrency, .. } => assert_eq!(*concurrency, 1),
        other => panic!("unexpected entry {other:?}"),
    }
}

#[test]
fn resolve_path_descends_object_fields() {
    let value = json!({"a": {"b": {"c": 7}}});
    assert_eq!(resolve_path(&value, "a.b.c").unwrap(), json!(7));
    assert_eq!(resolve_path(&value, "").unwrap(), value);
}

#[test]
fn resolve_path_fails_on_missing_intermediate() {
    let value = json!({"a": {"b": 1}});
    let err = resolve_path(&value, "a.x.c").unwrap_err();
    assert!(err.to_string().contains("'x'"));
}
