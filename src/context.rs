//! Execution contexts handed to steps, predicates, and mapping functions.
//!
//! Two kinds of context live here:
//!
//! - [`RuntimeContext`]: a per-run key–value scratchpad for side-channel
//!   data. It is mutable, shared across every step of the run, and is never
//!   persisted in snapshots; callers reconstruct it when they resume.
//! - [`StepContext`]: the per-invocation view a step's execute receives:
//!   its input, the run's original input, peer step outputs, resume state,
//!   and the suspension primitive.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::step::{StepError, StepOutcome};
use crate::store::RunStateStore;

/// Per-run key–value scratchpad available to every step.
///
/// Cloning is cheap: clones share the same underlying map. The scratchpad
/// is deliberately excluded from snapshots, so anything stored here must be
/// reconstructible by the caller on resume.
///
/// # Examples
///
/// ```rust
/// use loomflow::context::RuntimeContext;
/// use serde_json::json;
///
/// let ctx = RuntimeContext::new();
/// ctx.set("tenant", json!("acme"));
/// assert!(ctx.has("tenant"));
/// assert_eq!(ctx.get("tenant"), Some(json!("acme")));
/// assert_eq!(ctx.delete("tenant"), Some(json!("acme")));
/// assert!(!ctx.has("tenant"));
/// ```
#[derive(Clone, Default)]
pub struct RuntimeContext {
    values: Arc<Mutex<FxHashMap<String, Value>>>,
}

impl RuntimeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a value by key (cloned).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Insert or replace a value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().insert(key.into(), value);
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Remove a key, returning the previous value if any.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.values.lock().remove(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.values.lock().clear();
    }

    /// Cloned view of the full map.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.values.lock().clone()
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("values", &self.values.lock())
            .finish()
    }
}

/// The view of the run a step's execute (and conditional predicates and
/// mapping functions) observes.
///
/// Constructed by the engine for every invocation. Peer results resolve
/// through the run's state store, so `get_step_result` always reflects the
/// most recent recorded output.
#[derive(Clone)]
pub struct StepContext {
    /// Input derived from the previous entry (or the run's initial input).
    pub input_data: Value,
    run_id: String,
    workflow_id: String,
    init_data: Value,
    store: Arc<RunStateStore>,
    runtime_context: RuntimeContext,
    resume_data: Option<Value>,
    is_resuming: bool,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        input_data: Value,
        run_id: String,
        workflow_id: String,
        init_data: Value,
        store: Arc<RunStateStore>,
        runtime_context: RuntimeContext,
        resume_data: Option<Value>,
        is_resuming: bool,
    ) -> Self {
        Self {
            input_data,
            run_id,
            workflow_id,
            init_data,
            store,
            runtime_context,
            resume_data,
            is_resuming,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The run's original input, regardless of how far the walk has moved.
    #[must_use]
    pub fn init_data(&self) -> &Value {
        &self.init_data
    }

    /// Most recent recorded output for a peer step: the output of a
    /// completed step, or the suspend payload of a suspended one.
    #[must_use]
    pub fn get_step_result(&self, step_id: &str) -> Option<Value> {
        self.store
            .step_result(step_id)
            .and_then(|result| result.output().cloned())
    }

    /// True when this invocation was triggered by a resume targeting this
    /// step.
    #[must_use]
    pub fn is_resuming(&self) -> bool {
        self.is_resuming
    }

    /// The resume payload, present only when [`is_resuming`](Self::is_resuming)
    /// is true. Already validated against the step's resume schema.
    #[must_use]
    pub fn resume_data(&self) -> Option<&Value> {
        self.resume_data.as_ref()
    }

    /// The run's mutable scratchpad.
    #[must_use]
    pub fn runtime_context(&self) -> &RuntimeContext {
        &self.runtime_context
    }

    /// Halt this invocation, surfacing `payload` to callers until resumed.
    ///
    /// Suspension is a value, not an error: return the result of this call
    /// directly and the invocation terminates by construction:
    ///
    /// ```ignore
    /// return ctx.suspend(json!({"reason": "needs_approval"}));
    /// ```
    ///
    /// The engine records the suspension, captures the execution path, and
    /// short-circuits the walk. No further work by the invocation is
    /// observed after the value is returned.
    pub fn suspend(&self, payload: Value) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::Suspend(payload))
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run_id)
            .field("workflow_id", &self.workflow_id)
            .field("input_data", &self.input_data)
            .field("is_resuming", &self.is_resuming)
            .finish_non_exhaustive()
    }
}
