//! WorkflowBuilder: the fluent, append-only draft side of a workflow.
//!
//! A draft is mutable (builder methods append entries to the flow) and
//! cannot be run. `commit` consumes the draft, validates it, derives the
//! serializable execution graph, and yields the immutable, runnable
//! [`Workflow`](crate::workflow::Workflow). The draft/committed split is
//! enforced by the type system: only a committed workflow has
//! `create_run`/`start`.

use serde_json::Value;
use std::sync::Arc;

use super::mapping::{MapFn, MapSpec, MappingHandler};
use super::{BuildError, FlowEntry, LoopKind, Predicate, graph_hash};
use crate::context::StepContext;
use crate::step::{Step, StepError};
use crate::types::RetryConfig;
use crate::workflow::Workflow;

/// Builder for a workflow draft.
///
/// # Examples
///
/// ```rust
/// use loomflow::flow::WorkflowBuilder;
/// use loomflow::step::{Step, StepOutcome};
/// use serde_json::json;
///
/// let double = Step::builder("double")
///     .handler(|ctx| async move {
///         let x = ctx.input_data.as_f64().unwrap_or_default();
///         Ok(StepOutcome::Complete(json!(x * 2.0)))
///     })
///     .build()
///     .unwrap();
///
/// let workflow = WorkflowBuilder::new("doubler")
///     .input_schema(json!({"type": "number"}))
///     .output_schema(json!({"type": "number"}))
///     .then(double)
///     .commit()
///     .unwrap();
///
/// assert_eq!(workflow.id(), "doubler");
/// ```
pub struct WorkflowBuilder {
    id: String,
    description: Option<String>,
    input_schema: Option<Value>,
    output_schema: Option<Value>,
    retry_config: Option<RetryConfig>,
    entries: Vec<FlowEntry>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            retry_config: None,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Schema validated against `start` input before the walk begins.
    #[must_use]
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Declared output schema; also used when the committed workflow is
    /// embedded as a step.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Retry knobs, carried but not actuated by the engine.
    #[must_use]
    pub fn retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = Some(retry_config);
        self
    }

    /// Append a single step entry.
    #[must_use]
    pub fn then(mut self, step: Step) -> Self {
        self.entries.push(FlowEntry::Step { step });
        self
    }

    /// Append a parallel entry whose children all receive the same
    /// upstream input.
    #[must_use]
    pub fn parallel(mut self, steps: Vec<Step>) -> Self {
        self.entries.push(FlowEntry::Parallel { steps });
        self
    }

    /// Append an ordered if/else-if chain; first matching predicate wins.
    #[must_use]
    pub fn branch(mut self, arms: Vec<(Predicate, Step)>) -> Self {
        let (predicates, steps) = arms.into_iter().unzip();
        self.entries.push(FlowEntry::Conditional { predicates, steps });
        self
    }

    /// Append a loop executing `step` while `predicate` holds.
    #[must_use]
    pub fn dowhile(mut self, step: Step, predicate: Predicate) -> Self {
        self.entries.push(FlowEntry::Loop {
            step,
            predicate,
            kind: LoopKind::DoWhile,
        });
        self
    }

    /// Append a loop executing `step` until `predicate` holds.
    #[must_use]
    pub fn dountil(mut self, step: Step, predicate: Predicate) -> Self {
        self.entries.push(FlowEntry::Loop {
            step,
            predicate,
            kind: LoopKind::DoUntil,
        });
        self
    }

    /// Append a foreach entry; `concurrency` is clamped to at least 1.
    #[must_use]
    pub fn foreach(mut self, step: Step, concurrency: usize) -> Self {
        self.entries.push(FlowEntry::Foreach {
            step,
            concurrency: concurrency.max(1),
        });
        self
    }

    /// Append a declarative mapping rebuilding the next entry's input.
    ///
    /// The synthetic step's id is `map@<entryIndex>`, deterministic so
    /// snapshots and tests are reproducible.
    #[must_use]
    pub fn map(mut self, spec: MapSpec) -> Self {
        let id = format!("map@{}", self.entries.len());
        let step = Step::from_parts(id, None, Arc::new(MappingHandler::new(spec)));
        self.entries.push(FlowEntry::Step { step });
        self
    }

    /// Append a functional mapping from a closure.
    #[must_use]
    pub fn map_fn<F>(self, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        self.map(MapSpec::Fn(Arc::new(f) as MapFn))
    }

    /// Freeze the flow and flip the workflow from draft to committed.
    ///
    /// Builds the execution-graph adjacency view for diagnostics and its
    /// stable hash. Fails with [`BuildError::EmptyFlow`] when nothing was
    /// appended.
    pub fn commit(self) -> Result<Workflow, BuildError> {
        if self.entries.is_empty() {
            return Err(BuildError::EmptyFlow {
                workflow_id: self.id,
            });
        }
        let graph: Vec<_> = self.entries.iter().map(FlowEntry::to_graph_entry).collect();
        let hash = graph_hash(&graph);
        Workflow::committed(
            self.id,
            self.description,
            self.input_schema,
            self.output_schema,
            self.retry_config,
            self.entries,
            graph,
            hash,
        )
    }
}
