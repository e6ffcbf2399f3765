//! Committed workflows: immutable, runnable, and embeddable as steps.
//!
//! A [`Workflow`] is produced by
//! [`WorkflowBuilder::commit`](crate::flow::WorkflowBuilder::commit) and is
//! a cheap-clone handle over shared immutable structure. It owns the
//! registry of its active runs: a run stays referenced until its engine
//! settles on a non-suspended terminal state, then a cleanup callback
//! retires it.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::StepContext;
use crate::flow::{BuildError, FlowEntry, GraphEntry};
use crate::run::{ResumeOptions, StartOptions, WorkflowError, WorkflowRun};
use crate::schema::Schema;
use crate::step::{Step, StepError, StepHandler, StepOutcome};
use crate::types::{RetryConfig, WorkflowResult};
use crate::utils::ids;

/// Options for [`Workflow::create_run`].
#[derive(Clone, Debug, Default)]
pub struct CreateRunOptions {
    /// Explicit run id; a v4 UUID is generated when absent.
    pub run_id: Option<String>,
}

struct WorkflowInner {
    id: String,
    description: Option<String>,
    input_schema: Option<Schema>,
    output_schema: Option<Schema>,
    input_schema_raw: Option<Value>,
    output_schema_raw: Option<Value>,
    retry_config: Option<RetryConfig>,
    entries: Vec<FlowEntry>,
    execution_graph: Vec<GraphEntry>,
    graph_hash: String,
    runs: Mutex<FxHashMap<String, WorkflowRun>>,
}

/// A committed, immutable workflow.
///
/// # Examples
///
/// ```rust
/// use loomflow::flow::WorkflowBuilder;
/// use loomflow::step::{Step, StepOutcome};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let echo = Step::builder("echo")
///     .handler(|ctx| async move { Ok(StepOutcome::Complete(ctx.input_data.clone())) })
///     .build()
///     .unwrap();
///
/// let workflow = WorkflowBuilder::new("echoer").then(echo).commit().unwrap();
/// let result = workflow.start(json!("hello")).await.unwrap();
/// assert!(result.is_completed());
/// # }
/// ```
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

impl Workflow {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn committed(
        id: String,
        description: Option<String>,
        input_schema_raw: Option<Value>,
        output_schema_raw: Option<Value>,
        retry_config: Option<RetryConfig>,
        entries: Vec<FlowEntry>,
        execution_graph: Vec<GraphEntry>,
        graph_hash: String,
    ) -> Result<Self, BuildError> {
        let input_schema = input_schema_raw
            .clone()
            .map(Schema::compile)
            .transpose()?;
        let output_schema = output_schema_raw
            .clone()
            .map(Schema::compile)
            .transpose()?;
        Ok(Self {
            inner: Arc::new(WorkflowInner {
                id,
                description,
                input_schema,
                output_schema,
                input_schema_raw,
                output_schema_raw,
                retry_config,
                entries,
                execution_graph,
                graph_hash,
                runs: Mutex::new(FxHashMap::default()),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    #[must_use]
    pub fn retry_config(&self) -> Option<&RetryConfig> {
        self.inner.retry_config.as_ref()
    }

    /// Serialized diagnostic view of the committed flow.
    #[must_use]
    pub fn graph(&self) -> &[GraphEntry] {
        &self.inner.execution_graph
    }

    /// Stable hash of the serialized graph (see
    /// [`crate::flow::graph_hash`]).
    #[must_use]
    pub fn graph_hash(&self) -> &str {
        &self.inner.graph_hash
    }

    pub(crate) fn entries(&self) -> &[FlowEntry] {
        &self.inner.entries
    }

    pub(crate) fn input_schema(&self) -> Option<&Schema> {
        self.inner.input_schema.as_ref()
    }

    #[allow(dead_code)]
    pub(crate) fn output_schema(&self) -> Option<&Schema> {
        self.inner.output_schema.as_ref()
    }

    /// Bind a fresh store and engine to this workflow's graph.
    ///
    /// The run is registered with the workflow until it settles on a
    /// non-suspended terminal state.
    #[must_use]
    pub fn create_run(&self, options: CreateRunOptions) -> WorkflowRun {
        let run_id = options.run_id.unwrap_or_else(ids::generate_run_id);
        let run = WorkflowRun::bind(self.clone(), run_id.clone());
        self.inner.runs.lock().insert(run_id, run.clone());
        run
    }

    /// Look up a still-registered (active or suspended) run.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<WorkflowRun> {
        self.inner.runs.lock().get(run_id).cloned()
    }

    /// Ids of currently registered runs.
    #[must_use]
    pub fn run_ids(&self) -> Vec<String> {
        self.inner.runs.lock().keys().cloned().collect()
    }

    pub(crate) fn retire_run(&self, run_id: &str) {
        self.inner.runs.lock().remove(run_id);
    }

    /// Create an anonymous run and start it with `input`.
    pub async fn start(&self, input: Value) -> Result<WorkflowResult, WorkflowError> {
        self.create_run(CreateRunOptions::default())
            .start(StartOptions::input(input))
            .await
    }

    /// Resume a registered suspended run by id.
    pub async fn resume(
        &self,
        run_id: &str,
        options: ResumeOptions,
    ) -> Result<WorkflowResult, WorkflowError> {
        let run = self.get_run(run_id).ok_or_else(|| WorkflowError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        run.resume(options).await
    }

    /// Expose this committed workflow as a step.
    ///
    /// The pseudo-step carries the workflow's id and I/O schemas; its
    /// execute performs a nested run via the same façade and returns the
    /// nested run's result value. Nested runs that suspend or fail surface
    /// as step failures.
    #[must_use]
    pub fn as_step(&self) -> Step {
        let step = Step::from_parts(
            self.inner.id.clone(),
            self.inner.description.clone(),
            Arc::new(NestedWorkflowHandler {
                workflow: self.clone(),
            }),
        );
        step.with_raw_schemas(
            self.inner.input_schema_raw.clone(),
            self.inner.output_schema_raw.clone(),
        )
        .expect("schemas were already compiled at commit")
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.inner.id)
            .field("entries", &self.inner.entries.len())
            .field("graph_hash", &self.inner.graph_hash)
            .finish_non_exhaustive()
    }
}

struct NestedWorkflowHandler {
    workflow: Workflow,
}

#[async_trait]
impl StepHandler for NestedWorkflowHandler {
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let run = self.workflow.create_run(CreateRunOptions::default());
        let result = run
            .start(StartOptions {
                input_data: ctx.input_data.clone(),
                runtime_context: Some(ctx.runtime_context().clone()),
            })
            .await
            .map_err(|err| StepError::Execution(err.to_string()))?;
        match result {
            WorkflowResult::Completed { result, .. } => Ok(StepOutcome::Complete(result)),
            WorkflowResult::Failed { error, .. } => Err(StepError::Execution(format!(
                "nested run of workflow '{}' failed: {error}",
                self.workflow.id()
            ))),
            WorkflowResult::Suspended { .. } => Err(StepError::Execution(format!(
                "nested run of workflow '{}' suspended; resume it through its own run",
                self.workflow.id()
            ))),
        }
    }
}
