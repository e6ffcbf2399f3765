//! Core types for the loomflow workflow engine.
//!
//! This module defines the fundamental value types shared across the system:
//! run lifecycle status, per-step results, execution paths, and the terminal
//! result returned by `start`/`resume`. These are the core domain concepts
//! that define what a run *is*.
//!
//! # Key Types
//!
//! - [`RunStatus`]: Lifecycle state of a run
//! - [`StepResult`]: Most-recent result recorded for a step id
//! - [`WorkflowResult`]: Terminal outcome of `start`/`resume`
//! - [`ExecutionPath`]: Integer sequence locating the engine inside nested
//!   entries (e.g. `[2, 0]` = entry 2 → its child 0)
//!
//! # Examples
//!
//! ```rust
//! use loomflow::types::{RunStatus, StepResult};
//! use serde_json::json;
//!
//! let result = StepResult::Completed { output: json!(42) };
//! assert!(result.is_completed());
//! assert_eq!(result.output(), Some(&json!(42)));
//!
//! // Wire form uses the documented status tags
//! let encoded = serde_json::to_value(&RunStatus::Suspended).unwrap();
//! assert_eq!(encoded, json!("SUSPENDED"));
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Position of the engine inside nested flow entries.
///
/// The first element indexes the top-level entry; subsequent elements index
/// children within composite entries (parallel siblings, foreach items).
pub type ExecutionPath = Vec<usize>;

/// Lifecycle status of a workflow run.
///
/// Transitions: `Initial → Running`, then `Running → Completed | Failed |
/// Suspended`. A suspended run moves `Suspended → Resumed → Running` on
/// resume. `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run constructed but not yet started.
    #[default]
    Initial,
    /// The engine is walking the flow.
    Running,
    /// Execution halted by the caller (reserved for interrupt-style hosts).
    Paused,
    /// A resume call has been accepted; the run re-enters `Running` next.
    Resumed,
    /// Terminal: the flow ran to the end.
    Completed,
    /// Terminal: a step failure or validation error propagated.
    Failed,
    /// At least one step is awaiting external input.
    Suspended,
}

impl RunStatus {
    /// Returns `true` for states no further execution can leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// The wire label used in events and snapshots.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Initial => "INITIAL",
            RunStatus::Running => "RUNNING",
            RunStatus::Paused => "PAUSED",
            RunStatus::Resumed => "RESUMED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most-recent result recorded for one step id within a run.
///
/// A step moves monotonically through `Running → Completed | Failed |
/// Suspended`; a suspended step may later transition back to `Running` (via
/// resume) and from there to `Completed` or `Failed`.
///
/// # Examples
///
/// ```rust
/// use loomflow::types::StepResult;
/// use serde_json::json;
///
/// let suspended = StepResult::Suspended {
///     output: json!({"reason": "needs_approval"}),
///     suspended_path: vec![1, 0],
/// };
/// let encoded = serde_json::to_value(&suspended).unwrap();
/// assert_eq!(encoded["status"], "suspended");
/// assert_eq!(encoded["suspendedPath"], json!([1, 0]));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StepResult {
    /// The step's execute is in flight.
    Running,
    /// Normal completion with a validated output payload.
    Completed { output: Value },
    /// The step raised an error or failed validation.
    Failed { error: String },
    /// The step voluntarily halted; `output` is its suspend payload and
    /// `suspended_path` the execution path captured at suspension.
    Suspended {
        output: Value,
        suspended_path: ExecutionPath,
    },
}

impl StepResult {
    /// Lowercase status label matching the serialized `status` tag.
    #[must_use]
    pub fn status_label(&self) -> &'static str {
        match self {
            StepResult::Running => "running",
            StepResult::Completed { .. } => "completed",
            StepResult::Failed { .. } => "failed",
            StepResult::Suspended { .. } => "suspended",
        }
    }

    /// The payload most recently produced by the step: the output of a
    /// completed step, or the suspend payload of a suspended one.
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        match self {
            StepResult::Completed { output } | StepResult::Suspended { output, .. } => Some(output),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, StepResult::Running)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, StepResult::Completed { .. })
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, StepResult::Failed { .. })
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, StepResult::Suspended { .. })
    }
}

/// A suspended step reference surfaced by [`WorkflowResult::Suspended`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendedStep {
    /// Id of the suspended step.
    pub step_id: String,
    /// Execution path captured at the moment of suspension.
    pub path: ExecutionPath,
    /// The suspend payload the step surfaced to callers.
    pub output: Value,
}

/// Terminal outcome of `start`/`resume`, also exposed by a stream's
/// `final_state`.
///
/// `steps` always carries the full step-result map at the time the engine
/// returned, so observers can see *why* independently of the status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkflowResult {
    /// The flow ran to the end; `result` is the last entry's output.
    Completed {
        result: Value,
        steps: FxHashMap<String, StepResult>,
    },
    /// A step failure (or validation error) propagated.
    Failed {
        error: String,
        steps: FxHashMap<String, StepResult>,
    },
    /// One or more steps are awaiting external input.
    Suspended {
        suspended: Vec<SuspendedStep>,
        steps: FxHashMap<String, StepResult>,
    },
}

impl WorkflowResult {
    /// Run status this result settles the run into.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            WorkflowResult::Completed { .. } => RunStatus::Completed,
            WorkflowResult::Failed { .. } => RunStatus::Failed,
            WorkflowResult::Suspended { .. } => RunStatus::Suspended,
        }
    }

    /// The step-result map captured when the engine returned.
    #[must_use]
    pub fn steps(&self) -> &FxHashMap<String, StepResult> {
        match self {
            WorkflowResult::Completed { steps, .. }
            | WorkflowResult::Failed { steps, .. }
            | WorkflowResult::Suspended { steps, .. } => steps,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowResult::Completed { .. })
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, WorkflowResult::Failed { .. })
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, WorkflowResult::Suspended { .. })
    }
}

/// Retry knobs accepted on workflow construction.
///
/// Carried through the engine's execution context for forward compatibility;
/// the walking code never actuates them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum retry attempts per step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Delay between attempts, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}
