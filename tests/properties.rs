mod common;

use proptest::prelude::*;
use rustc_hash::FxHashMap;
use serde_json::json;

use common::scale_step;
use loomflow::flow::WorkflowBuilder;
use loomflow::store::{LogEntry, RunStateStore};
use loomflow::types::{RunStatus, StepResult, WorkflowResult};

#[derive(Debug, Clone)]
enum Op {
    Status(u8),
    StepResult(u8, u8),
    CurrentStep(Option<u8>),
    Path(Vec<usize>),
}

fn status_from(tag: u8) -> RunStatus {
    match tag % 7 {
        0 => RunStatus::Initial,
        1 => RunStatus::Running,
        2 => RunStatus::Paused,
        3 => RunStatus::Resumed,
        4 => RunStatus::Completed,
        5 => RunStatus::Failed,
        _ => RunStatus::Suspended,
    }
}

fn result_from(tag: u8, seed: u8) -> StepResult {
    match tag % 4 {
        0 => StepResult::Running,
        1 => StepResult::Completed {
            output: json!(seed),
        },
        2 => StepResult::Failed {
            error: format!("error-{seed}"),
        },
        _ => StepResult::Suspended {
            output: json!({"seed": seed}),
            suspended_path: vec![seed as usize],
        },
    }
}

fn apply(store: &RunStateStore, op: &Op) {
    match op {
        Op::Status(tag) => store.set_status(status_from(*tag)),
        Op::StepResult(id, tag) => {
            store.update_step_result(format!("step-{id}"), result_from(*tag, *id));
        }
        Op::CurrentStep(id) => store.set_current_step(id.map(|id| format!("step-{id}"))),
        Op::Path(path) => store.update_execution_path(path.clone()),
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..7).prop_map(Op::Status),
        ((0u8..3), (0u8..4)).prop_map(|(id, tag)| Op::StepResult(id, tag)),
        proptest::option::of(0u8..3).prop_map(Op::CurrentStep),
        proptest::collection::vec(0usize..5, 0..4).prop_map(Op::Path),
    ]
}

proptest! {
    // For any sequence of store mutations, the log grows monotonically and
    // never loses earlier entries.
    #[test]
    fn logs_are_append_only(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let store = RunStateStore::new("run-prop", "demo");
        let mut previous: Vec<LogEntry> = Vec::new();
        for op in &ops {
            apply(&store, op);
            let logs = store.get_state().logs;
            prop_assert_eq!(logs.len(), previous.len() + 1);
            prop_assert_eq!(&logs[..previous.len()], &previous[..]);
            prop_assert!(logs.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
            previous = logs;
        }
    }

    // The outstanding result per step id is the last write for that id.
    #[test]
    fn step_results_match_the_last_write(
        writes in proptest::collection::vec(((0u8..4), (0u8..4)), 1..30)
    ) {
        let store = RunStateStore::new("run-prop", "demo");
        let mut expected: FxHashMap<String, StepResult> = FxHashMap::default();
        for (id, tag) in &writes {
            let step_id = format!("step-{id}");
            let result = result_from(*tag, *id);
            store.update_step_result(step_id.clone(), result.clone());
            expected.insert(step_id, result);
        }
        prop_assert_eq!(store.get_state().step_results, expected);
    }

    // Foreach output has the input's length and element i corresponds to
    // input[i], for any concurrency.
    #[test]
    fn foreach_output_matches_input_order(
        items in proptest::collection::vec(-1000i64..1000, 0..12),
        concurrency in 1usize..4,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            let workflow = WorkflowBuilder::new("prop-foreach")
                .foreach(scale_step("double", 2.0), concurrency)
                .commit()
                .unwrap();
            workflow.start(json!(items)).await.unwrap()
        });

        let expected: Vec<f64> = items.iter().map(|x| *x as f64 * 2.0).collect();
        match result {
            WorkflowResult::Completed { result, .. } => {
                prop_assert_eq!(result, json!(expected));
            }
            other => prop_assert!(false, "expected completion, got {:?}", other),
        }
    }
}
