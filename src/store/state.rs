//! Observable per-run state owned by the store.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{RunEvent, WorkflowStateView};
use crate::flow::GraphEntry;
use crate::types::{ExecutionPath, RunStatus, StepResult};

/// Kinds of entries in a run's ordered log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    StatusChange,
    StepUpdate,
    WatchEvent,
}

/// One timestamped entry of the run's append-only log.
///
/// Timestamps are clamped nondecreasing by the store; the log is never
/// reordered or truncated while the run lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub kind: LogKind,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// State bag keys the façade reserves for durable run metadata.
pub(crate) const STATE_KEY_INPUT: &str = "input";
pub(crate) const STATE_KEY_RESULT: &str = "result";
pub(crate) const STATE_KEY_ERROR: &str = "error";

/// The authoritative, observable record of a run's progress.
///
/// Mutated only through [`RunStateStore`](crate::store::RunStateStore)
/// methods; subscribers receive `(new, previous)` clones per mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Mapping from step id to its most recent result.
    pub step_results: FxHashMap<String, StepResult>,
    /// Step whose execute is currently in flight, if any.
    pub current_step: Option<String>,
    /// Position of the engine inside nested entries.
    pub execution_path: ExecutionPath,
    /// Execution path captured per step id at the moment of suspension.
    pub suspended_paths: FxHashMap<String, ExecutionPath>,
    /// Ordered, timestamped log of everything that happened.
    pub logs: Vec<LogEntry>,
    /// Ordered structured events for replay and snapshots.
    pub events: Vec<RunEvent>,
    /// Opaque key–value bag available to callers for free-form data.
    pub state: FxHashMap<String, Value>,
    /// Engine metadata (reserved retry config and the like). Distinct from
    /// the runtime context, which is never persisted.
    pub execution_context: FxHashMap<String, Value>,
    /// Serialized diagnostic view of the committed flow.
    pub execution_graph: Vec<GraphEntry>,
}

impl RunState {
    pub(crate) fn initial(run_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Initial,
            step_results: FxHashMap::default(),
            current_step: None,
            execution_path: Vec::new(),
            suspended_paths: FxHashMap::default(),
            logs: Vec::new(),
            events: Vec::new(),
            state: FxHashMap::default(),
            execution_context: FxHashMap::default(),
            execution_graph: Vec::new(),
        }
    }

    /// True when at least one step result is suspended.
    #[must_use]
    pub fn has_suspended_steps(&self) -> bool {
        self.step_results
            .values()
            .any(|result| result.is_suspended())
    }

    /// The run's terminal result value, once recorded by the façade.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.state.get(STATE_KEY_RESULT)
    }

    /// The run's terminal error message, once recorded by the façade.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state
            .get(STATE_KEY_ERROR)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    /// Condensed view carried inside event payloads.
    #[must_use]
    pub fn state_view(&self, include_steps: bool) -> WorkflowStateView {
        WorkflowStateView {
            status: self.status,
            result: self.result().cloned(),
            error: self.error(),
            steps: include_steps.then(|| self.step_results.clone()),
        }
    }
}
