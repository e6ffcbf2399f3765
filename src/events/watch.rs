//! Callback-mode watch events.
//!
//! Watch callbacks fire synchronously on the store's mutation path. Two
//! event shapes are supported; both carry the event type, the current step
//! (when one is involved), a condensed workflow state, and a timestamp.

use chrono::Utc;
use serde::Serialize;

use super::event::{EventPayload, RunEventKind, WorkflowStateView};
use crate::store::RunState;

/// Selects the event shape delivered to a watch callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchVersion {
    /// Legacy shape: every transition arrives as a single `watch` event.
    V1,
    /// Typed shape: transitions arrive as `workflow-status-update` /
    /// `step-status-update` events carrying the full event payload.
    V2,
}

/// Event handed to a watch callback.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub workflow_state: WorkflowStateView,
    pub timestamp: i64,
    /// Full event payload; populated by [`WatchVersion::V2`] only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

/// Map one store transition to the watch events it produces.
///
/// A single mutation can touch at most the status and one step result, so
/// the output is small; it is empty for mutations with nothing watch-worthy
/// (log appends, scratchpad updates).
pub(crate) fn transitions(
    previous: &RunState,
    next: &RunState,
    version: WatchVersion,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let timestamp = Utc::now().timestamp_millis();

    if previous.status != next.status {
        events.push(match version {
            WatchVersion::V1 => WatchEvent {
                event_type: "watch".to_string(),
                current_step: next.current_step.clone(),
                workflow_state: next.state_view(true),
                timestamp,
                payload: None,
            },
            WatchVersion::V2 => WatchEvent {
                event_type: RunEventKind::WorkflowStatusUpdate.label().to_string(),
                current_step: next.current_step.clone(),
                workflow_state: next.state_view(true),
                timestamp,
                payload: Some(EventPayload {
                    current_step: next.current_step.clone(),
                    workflow_state: next.state_view(true),
                    ..Default::default()
                }),
            },
        });
    }

    let mut changed: Vec<&String> = next
        .step_results
        .iter()
        .filter(|(id, result)| previous.step_results.get(*id) != Some(result))
        .map(|(id, _)| id)
        .collect();
    changed.sort();

    for step_id in changed {
        let result = next.step_results[step_id].clone();
        let current_step = next.current_step.clone().or_else(|| Some(step_id.clone()));
        events.push(match version {
            WatchVersion::V1 => WatchEvent {
                event_type: "watch".to_string(),
                current_step,
                workflow_state: next.state_view(true),
                timestamp,
                payload: None,
            },
            WatchVersion::V2 => WatchEvent {
                event_type: RunEventKind::StepStatusUpdate.label().to_string(),
                current_step: current_step.clone(),
                workflow_state: next.state_view(true),
                timestamp,
                payload: Some(EventPayload {
                    step_id: Some(step_id.clone()),
                    step_status: Some(result.status_label().to_string()),
                    step_result: Some(result),
                    current_step,
                    workflow_state: next.state_view(false),
                }),
            },
        });
    }

    events
}
