use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;
use serde_json::json;

use loomflow::events::{RunEvent, WorkflowStateView};
use loomflow::store::{LogKind, RunStateStore};
use loomflow::types::{RunStatus, StepResult};

#[test]
fn mutations_append_ordered_logs() {
    let store = RunStateStore::new("run-1", "demo");
    store.set_status(RunStatus::Running);
    store.update_step_result("a", StepResult::Running);
    store.update_step_result("a", StepResult::Completed { output: json!(1) });
    store.set_current_step(Some("a".to_string()));
    store.set_current_step(None);

    let state = store.get_state();
    assert_eq!(state.logs.len(), 5);
    assert!(
        state
            .logs
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );
    assert_eq!(state.logs[0].kind, LogKind::StatusChange);
    assert_eq!(state.logs[1].kind, LogKind::StepUpdate);
    assert!(state.logs[2].message.contains("completed"));
}

#[test]
fn add_watch_event_logs_with_payload() {
    let store = RunStateStore::new("run-1", "demo");
    store.add_watch_event("observer attached", json!({"observer": "test"}));

    let state = store.get_state();
    assert_eq!(state.logs.len(), 1);
    assert_eq!(state.logs[0].kind, LogKind::WatchEvent);
    assert_eq!(state.logs[0].data, Some(json!({"observer": "test"})));
}

#[test]
fn reset_preserves_only_durable_identifiers() {
    let store = RunStateStore::new("run-1", "demo");
    store.set_status(RunStatus::Running);
    store.update_step_result("a", StepResult::Completed { output: json!(1) });
    let mut bag = FxHashMap::default();
    bag.insert("key".to_string(), json!("value"));
    store.update_state(bag);

    store.reset();
    let state = store.get_state();
    assert_eq!(state.run_id, "run-1");
    assert_eq!(state.workflow_id, "demo");
    assert_eq!(state.status, RunStatus::Initial);
    assert!(state.step_results.is_empty());
    assert!(state.state.is_empty());
    // The reset itself is the first entry of the fresh log.
    assert_eq!(state.logs.len(), 1);
}

#[test]
fn subscribers_see_new_and_previous_states() {
    let store = RunStateStore::new("run-1", "demo");
    let seen: Arc<parking_lot::Mutex<Vec<(RunStatus, RunStatus)>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = store.subscribe(Arc::new(move |next, previous| {
        sink.lock().push((previous.status, next.status));
    }));

    store.set_status(RunStatus::Running);
    store.set_status(RunStatus::Completed);

    let transitions = seen.lock().clone();
    assert_eq!(transitions, vec![
        (RunStatus::Initial, RunStatus::Running),
        (RunStatus::Running, RunStatus::Completed),
    ]);
}

#[test]
fn subscriber_registered_later_misses_earlier_mutations() {
    let store = RunStateStore::new("run-1", "demo");
    store.set_status(RunStatus::Running);

    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let _subscription = store.subscribe(Arc::new(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));

    store.set_status(RunStatus::Completed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn unsubscribed_callbacks_stop_firing() {
    let store = RunStateStore::new("run-1", "demo");
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let subscription = store.subscribe(Arc::new(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));

    store.set_status(RunStatus::Running);
    subscription.unsubscribe();
    store.set_status(RunStatus::Completed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn reentrant_mutation_from_subscriber_is_delivered_in_order() {
    let store = RunStateStore::new("run-1", "demo");
    let statuses: Arc<parking_lot::Mutex<Vec<RunStatus>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));

    let sink = Arc::clone(&statuses);
    let reentrant = Arc::clone(&store);
    let _subscription = store.subscribe(Arc::new(move |next, _| {
        sink.lock().push(next.status);
        // Mutating from inside a callback must enqueue, not deadlock.
        if next.status == RunStatus::Running {
            reentrant.set_status(RunStatus::Suspended);
        }
    }));

    store.set_status(RunStatus::Running);

    let observed = statuses.lock().clone();
    assert_eq!(observed, vec![RunStatus::Running, RunStatus::Suspended]);
    assert_eq!(store.status(), RunStatus::Suspended);
}

#[tokio::test]
async fn emitted_events_reach_the_event_feed() {
    let store = RunStateStore::new("run-1", "demo");
    let mut feed = store.subscribe_events();

    store.emit_workflow_status_update(RunEvent::workflow_status(
        "run-1",
        "demo",
        "status changed to RUNNING",
        WorkflowStateView {
            status: RunStatus::Running,
            ..Default::default()
        },
    ));

    let event = feed.recv().await.unwrap();
    assert_eq!(event.description, "status changed to RUNNING");
    assert_eq!(event.payload.workflow_state.status, RunStatus::Running);

    // The event is also part of the durable state.
    let state = store.get_state();
    assert_eq!(state.events.len(), 1);
    assert_eq!(state.events[0], event);
}

#[test]
fn step_result_accessor_returns_most_recent() {
    let store = RunStateStore::new("run-1", "demo");
    store.update_step_result("a", StepResult::Running);
    store.update_step_result("a", StepResult::Suspended {
        output: json!({"reason": "hold"}),
        suspended_path: vec![0],
    });

    let result = store.step_result("a").unwrap();
    assert!(result.is_suspended());
    assert_eq!(result.output(), Some(&json!({"reason": "hold"})));
    assert!(store.step_result("missing").is_none());
}
