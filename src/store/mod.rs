//! Run state store: the single source of truth for a run's in-flight state.
//!
//! Every mutation goes through a store method; no caller holds direct
//! references to internal collections. The store totally orders mutations,
//! appends a log entry per mutation, and fans each transition out to
//! subscribers as `(new_state, previous_state)` clones, so for any two
//! subscribers, the earlier-registered one's event sequence is a prefix
//! order-consistent with the later one's.
//!
//! # Reentrancy
//!
//! Subscriber callbacks run from a post-mutation drain loop guarded by a
//! dispatch lock. A callback that mutates the store enqueues a fresh
//! notification instead of deadlocking; whoever holds the dispatch lock
//! delivers it next, preserving the total order.
//!
//! # Examples
//!
//! ```rust
//! use loomflow::store::RunStateStore;
//! use loomflow::types::{RunStatus, StepResult};
//! use serde_json::json;
//!
//! let store = RunStateStore::new("run-1", "demo");
//! store.set_status(RunStatus::Running);
//! store.update_step_result("fetch", StepResult::Completed { output: json!(7) });
//!
//! let state = store.get_state();
//! assert_eq!(state.status, RunStatus::Running);
//! assert_eq!(state.logs.len(), 2);
//! assert!(state.step_results["fetch"].is_completed());
//! ```

mod state;

pub use state::{LogEntry, LogKind, RunState};

pub(crate) use state::{STATE_KEY_ERROR, STATE_KEY_INPUT, STATE_KEY_RESULT};

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::{EventHub, EventStream, RunEvent};
use crate::flow::GraphEntry;
use crate::types::{ExecutionPath, RunStatus, StepResult};

/// Callback receiving `(new_state, previous_state)` per mutation.
pub type StateSubscriber = Arc<dyn Fn(&RunState, &RunState) + Send + Sync>;

type SubscriberList = Arc<Mutex<Vec<(u64, StateSubscriber)>>>;

/// Handle deregistering a store subscription.
///
/// Dropping the handle does *not* deregister; call
/// [`unsubscribe`](Self::unsubscribe) explicitly.
pub struct Subscription {
    id: u64,
    subscribers: SubscriberList,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.subscribers.lock().retain(|(id, _)| *id != self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct StoreInner {
    state: RunState,
    last_timestamp: i64,
    pending: VecDeque<Notification>,
}

struct Notification {
    previous: RunState,
    current: RunState,
    event: Option<RunEvent>,
}

/// Event-sourced per-run state with subscribe/snapshot support.
pub struct RunStateStore {
    inner: Mutex<StoreInner>,
    dispatch: Mutex<()>,
    subscribers: SubscriberList,
    hub: EventHub,
    next_subscriber_id: AtomicU64,
}

impl RunStateStore {
    #[must_use]
    pub fn new(run_id: impl Into<String>, workflow_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StoreInner {
                state: RunState::initial(run_id, workflow_id),
                last_timestamp: 0,
                pending: VecDeque::new(),
            }),
            dispatch: Mutex::new(()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            hub: EventHub::default(),
            next_subscriber_id: AtomicU64::new(1),
        })
    }

    // =========================================================================
    // Mutators: each records a log entry and, where appropriate, an event.
    // =========================================================================

    /// Move the run's overall status.
    pub fn set_status(&self, status: RunStatus) {
        self.mutate(
            LogKind::StatusChange,
            format!("status changed to {status}"),
            None,
            |state| state.status = status,
        );
    }

    /// Record the most recent result for a step id.
    pub fn update_step_result(&self, step_id: impl Into<String>, result: StepResult) {
        let step_id = step_id.into();
        self.mutate(
            LogKind::StepUpdate,
            format!("step '{step_id}' {}", result.status_label()),
            None,
            move |state| {
                state.step_results.insert(step_id, result);
            },
        );
    }

    /// Set or clear the step whose execute is currently in flight.
    pub fn set_current_step(&self, step_id: Option<String>) {
        let message = match &step_id {
            Some(id) => format!("current step set to '{id}'"),
            None => "current step cleared".to_string(),
        };
        self.mutate(LogKind::StepUpdate, message, None, move |state| {
            state.current_step = step_id;
        });
    }

    /// Record the engine's position inside nested entries.
    pub fn update_execution_path(&self, path: ExecutionPath) {
        self.mutate(
            LogKind::StepUpdate,
            format!("execution path {path:?}"),
            None,
            move |state| state.execution_path = path,
        );
    }

    /// Replace the suspended-path map.
    pub fn update_suspended_paths(&self, paths: FxHashMap<String, ExecutionPath>) {
        self.mutate(
            LogKind::StepUpdate,
            format!("suspended paths updated ({} entries)", paths.len()),
            None,
            move |state| state.suspended_paths = paths,
        );
    }

    /// Record a watch-event log entry with an arbitrary payload.
    pub fn add_watch_event(&self, message: impl Into<String>, data: Value) {
        self.mutate(LogKind::WatchEvent, message.into(), Some(data), |_| {});
    }

    /// Append a workflow-level status event and fan it out.
    pub fn emit_workflow_status_update(&self, event: RunEvent) {
        self.emit_event(event);
    }

    /// Append a step-level status event and fan it out.
    pub fn emit_step_status_update(&self, event: RunEvent) {
        self.emit_event(event);
    }

    /// Merge key–value pairs into the caller-facing state bag.
    pub fn update_state(&self, values: FxHashMap<String, Value>) {
        self.mutate(
            LogKind::StepUpdate,
            format!("state updated ({} keys)", values.len()),
            None,
            move |state| state.state.extend(values),
        );
    }

    /// Merge key–value pairs into the engine's execution context.
    pub fn update_execution_context(&self, values: FxHashMap<String, Value>) {
        self.mutate(
            LogKind::StepUpdate,
            format!("execution context updated ({} keys)", values.len()),
            None,
            move |state| state.execution_context.extend(values),
        );
    }

    /// Attach the serialized diagnostic view of the committed flow.
    pub fn set_execution_graph(&self, graph: Vec<GraphEntry>) {
        self.mutate(
            LogKind::StepUpdate,
            format!("execution graph attached ({} entries)", graph.len()),
            None,
            move |state| state.execution_graph = graph,
        );
    }

    /// Restore the initial state; only `run_id`/`workflow_id` survive.
    pub fn reset(&self) {
        self.mutate(
            LogKind::StatusChange,
            "store reset".to_string(),
            None,
            |state| {
                let fresh = RunState::initial(state.run_id.clone(), state.workflow_id.clone());
                *state = fresh;
            },
        );
    }

    // =========================================================================
    // Snapshot-restore support
    // =========================================================================

    /// Replace the log history wholesale (snapshot restoration).
    ///
    /// Unlike the mutators above this appends no log entry of its own; the
    /// replaced history *is* the record. Subscribers still observe the
    /// transition in order.
    pub fn restore_logs(&self, logs: Vec<LogEntry>) {
        let last = logs.last().map_or(0, |entry| entry.timestamp);
        {
            let mut inner = self.inner.lock();
            let previous = inner.state.clone();
            inner.state.logs = logs;
            inner.last_timestamp = inner.last_timestamp.max(last);
            let current = inner.state.clone();
            inner.pending.push_back(Notification {
                previous,
                current,
                event: None,
            });
        }
        self.drain();
    }

    /// Replace the event history and republish each event in order
    /// (snapshot restoration).
    pub fn replay_events(&self, events: Vec<RunEvent>) {
        {
            let mut inner = self.inner.lock();
            let previous = inner.state.clone();
            inner.state.events = events.clone();
            let current = inner.state.clone();
            inner.pending.push_back(Notification {
                previous,
                current,
                event: None,
            });
        }
        for event in events {
            let _ = self.hub.publish(event);
        }
        self.drain();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Cloned view of the full run state.
    #[must_use]
    pub fn get_state(&self) -> RunState {
        self.inner.lock().state.clone()
    }

    #[must_use]
    pub fn run_id(&self) -> String {
        self.inner.lock().state.run_id.clone()
    }

    #[must_use]
    pub fn workflow_id(&self) -> String {
        self.inner.lock().state.workflow_id.clone()
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.inner.lock().state.status
    }

    /// Most recent result recorded for a step id.
    #[must_use]
    pub fn step_result(&self, step_id: &str) -> Option<StepResult> {
        self.inner.lock().state.step_results.get(step_id).cloned()
    }

    #[must_use]
    pub fn suspended_paths(&self) -> FxHashMap<String, ExecutionPath> {
        self.inner.lock().state.suspended_paths.clone()
    }

    /// One value from the caller-facing state bag.
    #[must_use]
    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.inner.lock().state.state.get(key).cloned()
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Register a subscriber observing every mutation after this call.
    pub fn subscribe(&self, subscriber: StateSubscriber) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, subscriber));
        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Subscribe to the run's structured event feed (stream mode).
    #[must_use]
    pub fn subscribe_events(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Metrics of the underlying event hub (capacity, dropped count).
    #[must_use]
    pub fn event_metrics(&self) -> crate::events::EventHubMetrics {
        self.hub.metrics()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn emit_event(&self, mut event: RunEvent) {
        self.mutate_with_event(
            LogKind::WatchEvent,
            event.description.clone(),
            None,
            move |state, timestamp| {
                event.timestamp = timestamp;
                state.events.push(event.clone());
                Some(event)
            },
        );
    }

    fn mutate<F>(&self, kind: LogKind, message: String, data: Option<Value>, apply: F)
    where
        F: FnOnce(&mut RunState),
    {
        self.mutate_with_event(kind, message, data, move |state, _| {
            apply(state);
            None
        });
    }

    fn mutate_with_event<F>(&self, kind: LogKind, message: String, data: Option<Value>, apply: F)
    where
        F: FnOnce(&mut RunState, i64) -> Option<RunEvent>,
    {
        {
            let mut inner = self.inner.lock();
            // Clamp timestamps so log and event order is nondecreasing even
            // across clock adjustments.
            let timestamp = Utc::now().timestamp_millis().max(inner.last_timestamp);
            inner.last_timestamp = timestamp;

            let previous = inner.state.clone();
            let event = apply(&mut inner.state, timestamp);
            inner.state.logs.push(LogEntry {
                kind,
                timestamp,
                message,
                data,
            });
            let current = inner.state.clone();
            inner.pending.push_back(Notification {
                previous,
                current,
                event,
            });
        }
        self.drain();
    }

    fn drain(&self) {
        // Whoever holds the dispatch lock delivers everything pending; a
        // reentrant or concurrent mutator just enqueues and returns.
        let Some(_guard) = self.dispatch.try_lock() else {
            return;
        };
        loop {
            let notification = { self.inner.lock().pending.pop_front() };
            let Some(notification) = notification else {
                break;
            };
            if let Some(event) = &notification.event {
                let _ = self.hub.publish(event.clone());
            }
            let subscribers: Vec<(u64, StateSubscriber)> = self.subscribers.lock().clone();
            for (_, subscriber) in subscribers {
                subscriber(&notification.current, &notification.previous);
            }
        }
    }
}

impl std::fmt::Debug for RunStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RunStateStore")
            .field("run_id", &inner.state.run_id)
            .field("workflow_id", &inner.state.workflow_id)
            .field("status", &inner.state.status)
            .field("steps", &inner.state.step_results.len())
            .finish_non_exhaustive()
    }
}
