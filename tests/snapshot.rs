mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::suspendable_step;
use loomflow::flow::WorkflowBuilder;
use loomflow::run::StartOptions;
use loomflow::snapshot::{AutoSnapshot, SNAPSHOT_VERSION, SnapshotError, SnapshotManager};
use loomflow::store::RunStateStore;
use loomflow::types::{RunStatus, StepResult};
use loomflow::workflow::CreateRunOptions;

async fn suspended_run() -> (loomflow::run::WorkflowRun, SnapshotManager) {
    let workflow = WorkflowBuilder::new("snapshot-demo")
        .then(suspendable_step("gate", 2.0))
        .commit()
        .unwrap();
    let run = workflow.create_run(CreateRunOptions {
        run_id: Some("run-snap".to_string()),
    });
    let result = run
        .start(StartOptions::input(json!({"value": -1})))
        .await
        .unwrap();
    assert!(result.is_suspended());
    (run, SnapshotManager::new())
}

#[tokio::test]
async fn capture_reflects_the_store() {
    let (run, manager) = suspended_run().await;
    let snapshot = manager.capture(run.store()).unwrap();

    assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    assert_eq!(snapshot.run_id, "run-snap");
    assert_eq!(snapshot.workflow_id, "snapshot-demo");
    assert_eq!(snapshot.status, RunStatus::Suspended);
    assert!(snapshot.step_results["gate"].is_suspended());
    assert_eq!(snapshot.suspended_paths["gate"], vec![0]);
    assert_eq!(snapshot.execution_graph.len(), 1);
    assert!(!snapshot.logs.is_empty());
    assert!(!snapshot.events.is_empty());
}

#[tokio::test]
async fn restore_round_trips_observable_state() {
    let (run, manager) = suspended_run().await;
    let original = manager.capture(run.store()).unwrap();

    let fresh = RunStateStore::new("run-snap", "snapshot-demo");
    manager.restore(&original, &fresh).unwrap();

    let restored = fresh.get_state();
    let source = run.store().get_state();
    assert_eq!(restored.status, source.status);
    assert_eq!(restored.step_results, source.step_results);
    assert_eq!(restored.execution_path, source.execution_path);
    assert_eq!(restored.suspended_paths, source.suspended_paths);
    assert_eq!(restored.execution_graph, source.execution_graph);
    assert_eq!(restored.logs, source.logs);
    assert_eq!(restored.events, source.events);
    assert_eq!(restored.execution_context, source.execution_context);

    // Capturing the restored store reproduces the snapshot, timestamp aside.
    let mut recaptured = manager.capture(&fresh).unwrap();
    recaptured.timestamp = original.timestamp;
    assert_eq!(recaptured, original);
}

#[tokio::test]
async fn export_import_round_trips() {
    let (run, manager) = suspended_run().await;
    let snapshot = manager.capture(run.store()).unwrap();

    let exported = manager.export(&snapshot).unwrap();
    // Pretty-printed JSON, one field per line.
    assert!(exported.contains("\n  \"version\""));

    let imported = manager.import(&exported).unwrap();
    assert_eq!(imported, snapshot);
}

#[tokio::test]
async fn import_rejects_garbage_and_incompatible_versions() {
    let (run, manager) = suspended_run().await;
    let snapshot = manager.capture(run.store()).unwrap();

    assert!(matches!(
        manager.import("not json at all"),
        Err(SnapshotError::Parse(_))
    ));

    let exported = manager.export(&snapshot).unwrap();
    let doctored = exported.replacen("\"1.0.0\"", "\"2.0.0\"", 1);
    assert!(matches!(
        manager.import(&doctored),
        Err(SnapshotError::IncompatibleVersion { .. })
    ));
}

#[test]
fn capture_validates_against_the_snapshot_schema() {
    // An empty run id violates the fixed schema.
    let store = RunStateStore::new("", "demo");
    let manager = SnapshotManager::new();
    assert!(matches!(
        manager.capture(&store),
        Err(SnapshotError::Validation { .. })
    ));
}

#[test]
fn retention_keeps_only_the_newest() {
    let manager = SnapshotManager::with_retention(3);
    let store = RunStateStore::new("run-retained", "demo");

    for step in 0..5 {
        store.update_step_result(
            format!("step-{step}"),
            StepResult::Completed { output: json!(step) },
        );
        manager.capture(&store).unwrap();
    }

    let retained = manager.snapshots("run-retained");
    assert_eq!(retained.len(), 3);
    // Oldest first; the newest snapshot has all five step results.
    assert_eq!(retained[0].step_results.len(), 3);
    assert_eq!(manager.latest("run-retained").unwrap().step_results.len(), 5);
}

#[test]
fn diff_is_sparse_and_per_step() {
    let manager = SnapshotManager::new();
    let store = RunStateStore::new("run-diff", "demo");
    store.set_status(RunStatus::Running);
    store.update_step_result("a", StepResult::Running);
    let before = manager.capture(&store).unwrap();

    store.update_step_result("a", StepResult::Completed { output: json!(1) });
    store.update_step_result("b", StepResult::Running);
    store.set_status(RunStatus::Suspended);
    let after = manager.capture(&store).unwrap();

    let diff = manager.diff(&before, &after);
    assert!(!diff.is_empty());
    assert_eq!(diff.status.as_ref().unwrap().after, RunStatus::Suspended);
    assert_eq!(diff.step_results.len(), 2);
    assert!(diff.step_results["b"].before.is_none());
    assert!(diff.execution_path.is_none());
    assert!(diff.logs_appended > 0);

    let same = manager.diff(&after, &after);
    assert!(same.is_empty());
}

#[tokio::test]
async fn replaying_events_reproduces_the_stream() {
    let (run, manager) = suspended_run().await;
    let snapshot = manager.capture(run.store()).unwrap();

    let fresh = RunStateStore::new("run-snap", "snapshot-demo");
    let mut feed = fresh.subscribe_events();
    manager.restore(&snapshot, &fresh).unwrap();

    let mut replayed = Vec::new();
    while let Some(event) = feed.try_recv() {
        replayed.push(event);
    }
    assert_eq!(replayed, snapshot.events);
}

#[tokio::test]
async fn auto_capture_runs_on_an_interval_and_stops_cleanly() {
    let manager = Arc::new(SnapshotManager::new());
    let store = RunStateStore::new("run-auto", "demo");
    store.set_status(RunStatus::Running);

    let auto = AutoSnapshot::attach(
        Arc::clone(&manager),
        Arc::clone(&store),
        Duration::from_millis(10),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    auto.stop();

    let captured = manager.snapshots("run-auto").len();
    assert!(captured >= 1, "expected at least one automatic capture");

    // The timer is cleared: no further captures after stop.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(manager.snapshots("run-auto").len(), captured);
}
