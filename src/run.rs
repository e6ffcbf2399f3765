//! Run façade: binds a committed workflow to a store and engine instance.
//!
//! A [`WorkflowRun`] is a cheap-clone handle over one run's store, engine,
//! and terminal-result cell. It validates input, drives the engine, settles
//! terminal status, and exposes the two observation modes (callback watch
//! and one-shot stream).

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::context::RuntimeContext;
use crate::engine::{ExecutionEngine, ResumePlan};
use crate::events::{
    RunEvent, StreamEvent, WatchEvent, WatchVersion, WorkflowStream, transitions,
};
use crate::store::{
    RunState, RunStateStore, STATE_KEY_ERROR, STATE_KEY_INPUT, STATE_KEY_RESULT, Subscription,
};
use crate::types::{RunStatus, WorkflowResult};
use crate::workflow::Workflow;

/// Errors raised by the run façade for structural misuse.
///
/// Ordinary step failures never surface here; they come back as a failed
/// [`WorkflowResult`].
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    /// `resume` was called with nothing suspended.
    #[error("no suspended steps to resume")]
    #[diagnostic(
        code(loomflow::run::no_suspended_steps),
        help("Resume requires at least one step result with status 'suspended'.")
    )]
    NoSuspendedSteps,

    /// The workflow no longer references a run with this id.
    #[error("run not found: {run_id}")]
    #[diagnostic(
        code(loomflow::run::not_found),
        help("Completed and failed runs are retired; only active or suspended runs resolve.")
    )]
    RunNotFound { run_id: String },

    /// The run handle backing a stream's final state was dropped.
    #[error("final state unavailable: run handle dropped")]
    #[diagnostic(code(loomflow::run::final_state))]
    FinalStateUnavailable,
}

/// Input to [`WorkflowRun::start`] and [`WorkflowRun::stream`].
#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    pub input_data: Value,
    pub runtime_context: Option<RuntimeContext>,
}

impl StartOptions {
    /// Options carrying only input data.
    #[must_use]
    pub fn input(input_data: Value) -> Self {
        Self {
            input_data,
            runtime_context: None,
        }
    }

    #[must_use]
    pub fn runtime_context(mut self, runtime_context: RuntimeContext) -> Self {
        self.runtime_context = Some(runtime_context);
        self
    }
}

/// Input to [`WorkflowRun::resume`].
///
/// `steps` names the suspended step(s) to re-enter; when empty, every
/// currently suspended step is targeted.
#[derive(Clone, Debug, Default)]
pub struct ResumeOptions {
    pub steps: Vec<String>,
    pub resume_data: Value,
    pub runtime_context: Option<RuntimeContext>,
}

impl ResumeOptions {
    /// Target a single suspended step.
    #[must_use]
    pub fn step(step_id: impl Into<String>, resume_data: Value) -> Self {
        Self {
            steps: vec![step_id.into()],
            resume_data,
            runtime_context: None,
        }
    }

    /// Target a set of suspended steps with one shared payload.
    #[must_use]
    pub fn steps<I, S>(step_ids: I, resume_data: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: step_ids.into_iter().map(Into::into).collect(),
            resume_data,
            runtime_context: None,
        }
    }

    #[must_use]
    pub fn runtime_context(mut self, runtime_context: RuntimeContext) -> Self {
        self.runtime_context = Some(runtime_context);
        self
    }
}

struct RunInner {
    workflow: Workflow,
    run_id: String,
    store: Arc<RunStateStore>,
    engine: ExecutionEngine,
    final_state: watch::Sender<Option<WorkflowResult>>,
}

/// One execution of a workflow, addressable by run id.
///
/// # Examples
///
/// ```rust
/// use loomflow::flow::WorkflowBuilder;
/// use loomflow::run::StartOptions;
/// use loomflow::step::{Step, StepOutcome};
/// use loomflow::workflow::CreateRunOptions;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let shout = Step::builder("shout")
///     .handler(|ctx| async move {
///         let text = ctx.input_data.as_str().unwrap_or_default().to_uppercase();
///         Ok(StepOutcome::Complete(json!(text)))
///     })
///     .build()
///     .unwrap();
///
/// let workflow = WorkflowBuilder::new("shouter").then(shout).commit().unwrap();
/// let run = workflow.create_run(CreateRunOptions::default());
/// let result = run.start(StartOptions::input(json!("hey"))).await.unwrap();
/// assert!(result.is_completed());
/// # }
/// ```
#[derive(Clone)]
pub struct WorkflowRun {
    inner: Arc<RunInner>,
}

impl WorkflowRun {
    pub(crate) fn bind(workflow: Workflow, run_id: String) -> Self {
        let store = RunStateStore::new(run_id.clone(), workflow.id());
        store.set_execution_graph(workflow.graph().to_vec());
        let engine = ExecutionEngine::new(workflow.clone(), Arc::clone(&store));
        let (final_state, _) = watch::channel(None);
        Self {
            inner: Arc::new(RunInner {
                workflow,
                run_id,
                store,
                engine,
                final_state,
            }),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.inner.workflow.id()
    }

    /// The run's state store, the authoritative record of its progress.
    #[must_use]
    pub fn store(&self) -> &Arc<RunStateStore> {
        &self.inner.store
    }

    /// Validate input, reset the store, and drive the engine to a result.
    pub async fn start(&self, options: StartOptions) -> Result<WorkflowResult, WorkflowError> {
        let StartOptions {
            input_data,
            runtime_context,
        } = options;
        let store = &self.inner.store;

        // Each start call begins from a clean store; only the durable
        // identifiers survive the reset.
        store.reset();
        store.set_execution_graph(self.inner.workflow.graph().to_vec());

        if let Some(schema) = self.inner.workflow.input_schema() {
            let subject = format!("input for workflow '{}'", self.workflow_id());
            if let Err(err) = schema.validate(&subject, &input_data) {
                let result = WorkflowResult::Failed {
                    error: err.to_string(),
                    steps: FxHashMap::default(),
                };
                self.settle(&result);
                return Ok(result);
            }
        }

        let mut init = FxHashMap::default();
        init.insert(STATE_KEY_INPUT.to_string(), input_data.clone());
        store.update_state(init);

        self.transition(RunStatus::Running);
        let result = self
            .inner
            .engine
            .run(input_data, runtime_context.unwrap_or_default(), None)
            .await;
        self.settle(&result);
        Ok(result)
    }

    /// Restart the walk from the head, re-entering the suspended step(s)
    /// with the given payload.
    pub async fn resume(&self, options: ResumeOptions) -> Result<WorkflowResult, WorkflowError> {
        let ResumeOptions {
            mut steps,
            resume_data,
            runtime_context,
        } = options;
        let store = &self.inner.store;

        let state = store.get_state();
        if !state.has_suspended_steps() {
            return Err(WorkflowError::NoSuspendedSteps);
        }
        if steps.is_empty() {
            steps = state
                .step_results
                .iter()
                .filter(|(_, result)| result.is_suspended())
                .map(|(step_id, _)| step_id.clone())
                .collect();
            steps.sort();
        }

        self.transition(RunStatus::Resumed);
        self.transition(RunStatus::Running);

        let init_data = store.state_value(STATE_KEY_INPUT).unwrap_or(Value::Null);
        let result = self
            .inner
            .engine
            .run(
                init_data,
                runtime_context.unwrap_or_default(),
                Some(ResumePlan { steps, resume_data }),
            )
            .await;
        self.settle(&result);
        Ok(result)
    }

    /// One-shot streaming consumption of this run.
    ///
    /// Subscribes before starting, synthesizes a `start` event, forwards
    /// every store event in order, and closes with a `finish` event on the
    /// first non-suspended terminal state. Suspension leaves the sequence
    /// open: a later `resume` feeds the same subscription.
    #[must_use]
    pub fn stream(&self, options: StartOptions) -> WorkflowStream {
        let (sender, receiver) = flume::unbounded();
        let mut events = self.inner.store.subscribe_events();

        let run_id = self.inner.run_id.clone();
        let workflow_id = self.workflow_id().to_string();
        let _ = sender.send(StreamEvent::Start {
            run_id: run_id.clone(),
            workflow_id: workflow_id.clone(),
            timestamp: Utc::now().timestamp_millis(),
        });

        let forward = sender.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let finish = event.is_terminal().then(|| StreamEvent::Finish {
                    run_id: run_id.clone(),
                    workflow_id: workflow_id.clone(),
                    timestamp: event.timestamp,
                    status: event.payload.workflow_state.status,
                });
                if forward.send(StreamEvent::Update { event }).is_err() {
                    break;
                }
                if let Some(finish) = finish {
                    let _ = forward.send(finish);
                    break;
                }
            }
        });

        let run = self.clone();
        tokio::spawn(async move {
            let _ = run.start(options).await;
        });

        WorkflowStream::new(receiver, self.inner.final_state.subscribe())
    }

    /// Register a callback observing this run's transitions.
    ///
    /// The callback fires synchronously on the store's mutation path;
    /// deregister with the returned subscription handle.
    pub fn watch<F>(&self, callback: F, version: WatchVersion) -> Subscription
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        self.inner.store.subscribe(Arc::new(move |next, previous| {
            for event in transitions(previous, next, version) {
                callback(event);
            }
        }))
    }

    /// Cloned view of the full run state.
    #[must_use]
    pub fn get_run_state(&self) -> RunState {
        self.inner.store.get_state()
    }

    /// The caller-facing state bag.
    #[must_use]
    pub fn get_state(&self) -> FxHashMap<String, Value> {
        self.inner.store.get_state().state
    }

    /// Merge key–value pairs into the caller-facing state bag.
    pub fn update_state(&self, values: FxHashMap<String, Value>) {
        self.inner.store.update_state(values);
    }

    fn transition(&self, status: RunStatus) {
        let store = &self.inner.store;
        store.set_status(status);
        let view = store.get_state().state_view(false);
        store.emit_workflow_status_update(RunEvent::workflow_status(
            self.inner.run_id.clone(),
            self.workflow_id(),
            format!("status changed to {status}"),
            view,
        ));
    }

    /// Record the terminal result, emit the closing event, and for
    /// non-suspended terminal states resolve `final_state` and retire the
    /// run from the workflow's registry.
    fn settle(&self, result: &WorkflowResult) {
        let store = &self.inner.store;
        match result {
            WorkflowResult::Completed { result, .. } => {
                let mut terminal = FxHashMap::default();
                terminal.insert(STATE_KEY_RESULT.to_string(), result.clone());
                store.update_state(terminal);
            }
            WorkflowResult::Failed { error, .. } => {
                let mut terminal = FxHashMap::default();
                terminal.insert(STATE_KEY_ERROR.to_string(), json!(error));
                store.update_state(terminal);
            }
            WorkflowResult::Suspended { .. } => {}
        }

        let status = result.status();
        store.set_status(status);
        let view = store.get_state().state_view(true);
        store.emit_workflow_status_update(RunEvent::workflow_status(
            self.inner.run_id.clone(),
            self.workflow_id(),
            format!("status changed to {status}"),
            view,
        ));

        if status.is_terminal() {
            let _ = self.inner.final_state.send(Some(result.clone()));
            self.inner.workflow.retire_run(&self.inner.run_id);
        }
    }
}

impl std::fmt::Debug for WorkflowRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRun")
            .field("run_id", &self.inner.run_id)
            .field("workflow_id", &self.workflow_id())
            .field("status", &self.inner.store.status())
            .finish_non_exhaustive()
    }
}
