//! Structured run events recorded by the store and fanned out to observers.

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{RunStatus, StepResult};

/// Discriminates the two event families a run produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEventKind {
    /// The run's overall status moved.
    WorkflowStatusUpdate,
    /// A single step's result moved.
    StepStatusUpdate,
}

impl RunEventKind {
    /// Kebab-case label used by watch v2 and stream consumers.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RunEventKind::WorkflowStatusUpdate => "workflow-status-update",
            RunEventKind::StepStatusUpdate => "step-status-update",
        }
    }
}

/// Condensed view of the run carried inside every event payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStateView {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<FxHashMap<String, StepResult>>,
}

/// Event payload: step-level fields are present on step updates only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_result: Option<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub workflow_state: WorkflowStateView,
}

/// A store-mutation notification delivered to subscribers, strictly ordered
/// per run.
///
/// # Examples
///
/// ```rust
/// use loomflow::events::{RunEvent, WorkflowStateView};
/// use loomflow::types::RunStatus;
///
/// let event = RunEvent::workflow_status(
///     "run-1",
///     "wf",
///     "status changed to RUNNING",
///     WorkflowStateView {
///         status: RunStatus::Running,
///         ..Default::default()
///     },
/// );
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["type"], "WorkflowStatusUpdate");
/// assert_eq!(json["payload"]["workflowState"]["status"], "RUNNING");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub kind: RunEventKind,
    pub run_id: String,
    pub workflow_id: String,
    /// Milliseconds since epoch; clamped nondecreasing by the store.
    pub timestamp: i64,
    pub description: String,
    pub payload: EventPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FxHashMap<String, Value>>,
}

impl RunEvent {
    /// Build a workflow-level status event.
    pub fn workflow_status(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        description: impl Into<String>,
        workflow_state: WorkflowStateView,
    ) -> Self {
        Self {
            kind: RunEventKind::WorkflowStatusUpdate,
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            description: description.into(),
            payload: EventPayload {
                workflow_state,
                ..Default::default()
            },
            metadata: None,
        }
    }

    /// Build a step-level status event.
    pub fn step_status(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        step_result: StepResult,
        workflow_state: WorkflowStateView,
    ) -> Self {
        let step_id = step_id.into();
        let status = step_result.status_label().to_string();
        Self {
            kind: RunEventKind::StepStatusUpdate,
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            description: format!("step '{step_id}' {status}"),
            payload: EventPayload {
                step_id: Some(step_id.clone()),
                step_status: Some(status),
                step_result: Some(step_result),
                current_step: Some(step_id),
                workflow_state,
            },
            metadata: None,
        }
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: FxHashMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether this event settles the run (terminal, non-suspended status).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind == RunEventKind::WorkflowStatusUpdate
            && self.payload.workflow_state.status.is_terminal()
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload.step_id {
            Some(step_id) => write!(f, "[{}/{step_id}] {}", self.run_id, self.description),
            None => write!(f, "[{}] {}", self.run_id, self.description),
        }
    }
}
