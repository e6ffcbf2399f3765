//! Point-in-time serialization and restoration of run state.
//!
//! A [`Snapshot`] is a validated, round-trip-stable view of everything the
//! store observes: status, step results, paths, ordered logs and events,
//! and the serialized execution graph. [`SnapshotManager`] captures them
//! with bounded per-run retention, restores them into a store, compares
//! them, and exports/imports a portable pretty-printed JSON form.
//!
//! Snapshots are schema-validated before storage and before restoration;
//! restore additionally checks version compatibility (same major as
//! [`SNAPSHOT_VERSION`]).

mod auto;

pub use auto::AutoSnapshot;

use chrono::Utc;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;
use thiserror::Error;

use crate::flow::GraphEntry;
use crate::schema::Schema;
use crate::store::{LogEntry, RunState, RunStateStore, STATE_KEY_ERROR, STATE_KEY_RESULT};
use crate::events::RunEvent;
use crate::types::{ExecutionPath, RunStatus, StepResult};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Default number of snapshots retained per run.
pub const DEFAULT_RETENTION: usize = 10;

static SNAPSHOT_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::compile(json!({
        "type": "object",
        "required": [
            "version", "timestamp", "runId", "workflowId", "status",
            "stepResults", "executionPath", "suspendedPaths", "events",
            "executionGraph", "logs", "executionContext",
        ],
        "properties": {
            "version": {"type": "string", "pattern": "^\\d+\\.\\d+\\.\\d+$"},
            "timestamp": {"type": "integer"},
            "runId": {"type": "string", "minLength": 1},
            "workflowId": {"type": "string", "minLength": 1},
            "status": {
                "enum": [
                    "INITIAL", "RUNNING", "PAUSED", "RESUMED",
                    "COMPLETED", "FAILED", "SUSPENDED",
                ],
            },
            "stepResults": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "required": ["status"],
                    "properties": {
                        "status": {"enum": ["running", "completed", "failed", "suspended"]},
                        "error": {"type": "string"},
                        "suspendedPath": {
                            "type": "array",
                            "items": {"type": "integer", "minimum": 0},
                        },
                    },
                },
            },
            "executionPath": {"type": "array", "items": {"type": "integer", "minimum": 0}},
            "suspendedPaths": {
                "type": "object",
                "additionalProperties": {
                    "type": "array",
                    "items": {"type": "integer", "minimum": 0},
                },
            },
            "events": {"type": "array", "items": {"type": "object"}},
            "executionGraph": {"type": "array", "items": {"type": "object"}},
            "logs": {"type": "array", "items": {"type": "object"}},
            "executionContext": {"type": "object"},
            "error": {"type": "string"},
        },
    }))
    .expect("snapshot schema compiles")
});

/// Errors raised by snapshot capture, restoration, or import.
#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    /// The snapshot does not satisfy the fixed snapshot schema.
    #[error("snapshot failed validation: {detail}")]
    #[diagnostic(
        code(loomflow::snapshot::validation),
        help("The snapshot was produced by an incompatible or corrupted writer.")
    )]
    Validation { detail: String },

    /// The snapshot's format version is not restorable by this build.
    #[error("snapshot version '{found}' is incompatible with '{SNAPSHOT_VERSION}'")]
    #[diagnostic(
        code(loomflow::snapshot::version),
        help("Only snapshots sharing the current major version can be restored.")
    )]
    IncompatibleVersion { found: String },

    /// The exported form could not be parsed.
    #[error("snapshot failed to parse: {0}")]
    #[diagnostic(code(loomflow::snapshot::parse))]
    Parse(#[from] serde_json::Error),
}

/// Validated, portable serialization of a run's observable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: String,
    /// Capture time, milliseconds since epoch.
    pub timestamp: i64,
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub step_results: FxHashMap<String, StepResult>,
    pub execution_path: ExecutionPath,
    pub suspended_paths: FxHashMap<String, ExecutionPath>,
    pub events: Vec<RunEvent>,
    pub execution_graph: Vec<GraphEntry>,
    pub logs: Vec<LogEntry>,
    pub execution_context: FxHashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    /// Build a snapshot from a store's current values (unvalidated).
    #[must_use]
    pub fn from_state(state: RunState) -> Self {
        let result = state.result().cloned();
        let error = state.error();
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            run_id: state.run_id,
            workflow_id: state.workflow_id,
            status: state.status,
            step_results: state.step_results,
            execution_path: state.execution_path,
            suspended_paths: state.suspended_paths,
            events: state.events,
            execution_graph: state.execution_graph,
            logs: state.logs,
            execution_context: state.execution_context,
            result,
            error,
        }
    }

    /// Validate against the fixed snapshot schema.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let value = serde_json::to_value(self)?;
        SNAPSHOT_SCHEMA
            .validate("snapshot", &value)
            .map_err(|err| SnapshotError::Validation {
                detail: err.to_string(),
            })
    }

    fn check_version(&self) -> Result<(), SnapshotError> {
        let found_major = self.version.split('.').next().unwrap_or_default();
        let current_major = SNAPSHOT_VERSION.split('.').next().unwrap_or_default();
        if found_major != current_major {
            return Err(SnapshotError::IncompatibleVersion {
                found: self.version.clone(),
            });
        }
        Ok(())
    }
}

/// Change of one field between two snapshots.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldChange<T> {
    pub before: T,
    pub after: T,
}

/// Sparse record of differences between two snapshots.
///
/// `step_results` is diffed per step id; absent fields were equal.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FieldChange<RunStatus>>,
    #[serde(skip_serializing_if = "FxHashMap::is_empty")]
    pub step_results: FxHashMap<String, FieldChange<Option<StepResult>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_path: Option<FieldChange<ExecutionPath>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_paths: Option<FieldChange<FxHashMap<String, ExecutionPath>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FieldChange<Option<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FieldChange<Option<String>>>,
    pub events_appended: usize,
    pub logs_appended: usize,
}

impl SnapshotDiff {
    /// True when the two snapshots were observably identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.step_results.is_empty()
            && self.execution_path.is_none()
            && self.suspended_paths.is_none()
            && self.result.is_none()
            && self.error.is_none()
            && self.events_appended == 0
            && self.logs_appended == 0
    }
}

/// Captures, restores, compares, and retains snapshots per run.
///
/// # Examples
///
/// ```rust
/// use loomflow::snapshot::SnapshotManager;
/// use loomflow::store::RunStateStore;
/// use loomflow::types::RunStatus;
///
/// let manager = SnapshotManager::new();
/// let store = RunStateStore::new("run-1", "demo");
/// store.set_status(RunStatus::Running);
///
/// let snapshot = manager.capture(&store).unwrap();
/// assert_eq!(snapshot.status, RunStatus::Running);
///
/// let exported = manager.export(&snapshot).unwrap();
/// let imported = manager.import(&exported).unwrap();
/// assert_eq!(imported, snapshot);
/// ```
pub struct SnapshotManager {
    snapshots: Mutex<FxHashMap<String, Vec<Snapshot>>>,
    max_per_run: usize,
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotManager {
    /// Manager with the default retention of [`DEFAULT_RETENTION`] per run.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Manager keeping at most `max_per_run` snapshots per run (newest
    /// win); clamped to at least 1.
    #[must_use]
    pub fn with_retention(max_per_run: usize) -> Self {
        Self {
            snapshots: Mutex::new(FxHashMap::default()),
            max_per_run: max_per_run.max(1),
        }
    }

    #[must_use]
    pub fn retention(&self) -> usize {
        self.max_per_run
    }

    /// Capture a validated snapshot of the store's current state.
    pub fn capture(&self, store: &RunStateStore) -> Result<Snapshot, SnapshotError> {
        let snapshot = Snapshot::from_state(store.get_state());
        snapshot.validate()?;

        let mut retained = self.snapshots.lock();
        let entry = retained.entry(snapshot.run_id.clone()).or_default();
        entry.push(snapshot.clone());
        if entry.len() > self.max_per_run {
            let excess = entry.len() - self.max_per_run;
            entry.drain(..excess);
        }
        Ok(snapshot)
    }

    /// Restore a snapshot into a store, replaying its history.
    ///
    /// The store is reset first; fields are then applied through ordinary
    /// store operations, and the recorded log/event history replaces the
    /// transcript those operations produced, so a follow-up
    /// [`capture`](Self::capture) round-trips (timestamp aside).
    pub fn restore(
        &self,
        snapshot: &Snapshot,
        store: &RunStateStore,
    ) -> Result<(), SnapshotError> {
        snapshot.validate()?;
        snapshot.check_version()?;

        store.reset();
        store.set_status(snapshot.status);

        let mut step_ids: Vec<&String> = snapshot.step_results.keys().collect();
        step_ids.sort();
        for step_id in step_ids {
            store.update_step_result(step_id.clone(), snapshot.step_results[step_id].clone());
        }

        store.update_execution_path(snapshot.execution_path.clone());
        store.update_suspended_paths(snapshot.suspended_paths.clone());
        store.set_execution_graph(snapshot.execution_graph.clone());
        store.update_execution_context(snapshot.execution_context.clone());

        let mut terminal = FxHashMap::default();
        if let Some(result) = &snapshot.result {
            terminal.insert(STATE_KEY_RESULT.to_string(), result.clone());
        }
        if let Some(error) = &snapshot.error {
            terminal.insert(STATE_KEY_ERROR.to_string(), json!(error));
        }
        if !terminal.is_empty() {
            store.update_state(terminal);
        }

        store.restore_logs(snapshot.logs.clone());
        store.replay_events(snapshot.events.clone());
        Ok(())
    }

    /// Pretty-printed portable form.
    pub fn export(&self, snapshot: &Snapshot) -> Result<String, SnapshotError> {
        snapshot.validate()?;
        Ok(serde_json::to_string_pretty(snapshot)?)
    }

    /// Parse and validate a portable form.
    pub fn import(&self, raw: &str) -> Result<Snapshot, SnapshotError> {
        let snapshot: Snapshot = serde_json::from_str(raw)?;
        snapshot.validate()?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Sparse comparison of two snapshots.
    #[must_use]
    pub fn diff(&self, before: &Snapshot, after: &Snapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        if before.status != after.status {
            diff.status = Some(FieldChange {
                before: before.status,
                after: after.status,
            });
        }

        let step_ids: std::collections::BTreeSet<&String> = before
            .step_results
            .keys()
            .chain(after.step_results.keys())
            .collect();
        for step_id in step_ids {
            let old = before.step_results.get(step_id);
            let new = after.step_results.get(step_id);
            if old != new {
                diff.step_results.insert(step_id.clone(), FieldChange {
                    before: old.cloned(),
                    after: new.cloned(),
                });
            }
        }

        if before.execution_path != after.execution_path {
            diff.execution_path = Some(FieldChange {
                before: before.execution_path.clone(),
                after: after.execution_path.clone(),
            });
        }
        if before.suspended_paths != after.suspended_paths {
            diff.suspended_paths = Some(FieldChange {
                before: before.suspended_paths.clone(),
                after: after.suspended_paths.clone(),
            });
        }
        if before.result != after.result {
            diff.result = Some(FieldChange {
                before: before.result.clone(),
                after: after.result.clone(),
            });
        }
        if before.error != after.error {
            diff.error = Some(FieldChange {
                before: before.error.clone(),
                after: after.error.clone(),
            });
        }
        diff.events_appended = after.events.len().saturating_sub(before.events.len());
        diff.logs_appended = after.logs.len().saturating_sub(before.logs.len());
        diff
    }

    /// Retained snapshots for a run, oldest first.
    #[must_use]
    pub fn snapshots(&self, run_id: &str) -> Vec<Snapshot> {
        self.snapshots
            .lock()
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Most recent retained snapshot for a run.
    #[must_use]
    pub fn latest(&self, run_id: &str) -> Option<Snapshot> {
        self.snapshots
            .lock()
            .get(run_id)
            .and_then(|entries| entries.last().cloned())
    }
}
