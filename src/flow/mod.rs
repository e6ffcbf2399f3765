//! Flow graph model: the composable tree of entries a workflow executes.
//!
//! A flow is an ordered list of [`FlowEntry`] values built by the fluent
//! [`WorkflowBuilder`] and frozen by `commit`. Entries compose steps five
//! ways: a single step, an unordered parallel fan-out, an ordered
//! if/else-if chain, an unbounded loop, and a bounded-parallelism foreach.
//!
//! Committing also derives a serializable diagnostic view of the graph
//! ([`GraphEntry`]) in which predicates and mapping functions are reduced
//! to opaque markers, since functions are not portable across snapshot
//! boundaries, plus a stable hash of that view so restored runs can be
//! sanity-checked against the graph they were captured from.

mod builder;
mod mapping;
#[cfg(test)]
mod tests;

pub use builder::WorkflowBuilder;
pub use mapping::{MapFn, MapSource, MapSpec};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::context::StepContext;
use crate::schema::SchemaError;
use crate::step::{Step, StepError};

/// Marker substituted for predicates and conditions in serialized graphs.
pub const OPAQUE_CONDITION: &str = "<condition>";

/// Errors raised while assembling steps or committing a workflow.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    /// `commit` was invoked with no entries in the flow.
    #[error("workflow '{workflow_id}' has no entries to commit")]
    #[diagnostic(
        code(loomflow::flow::empty),
        help("Append at least one entry (then/parallel/branch/loop/foreach) before committing.")
    )]
    EmptyFlow { workflow_id: String },

    /// A step was built without an execute handler.
    #[error("step '{step_id}' has no execute handler")]
    #[diagnostic(
        code(loomflow::flow::missing_handler),
        help("Provide a handler closure or a StepHandler implementation before building.")
    )]
    MissingHandler { step_id: String },

    /// A schema attached to a step or workflow failed to compile.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),
}

/// Loop flavor: both execute the body at least once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopKind {
    /// Continue while the predicate is true.
    DoWhile,
    /// Continue while the predicate is false.
    DoUntil,
}

/// Predicate evaluated by conditional and loop entries.
///
/// Predicates run to completion and cannot suspend; an `Err` fails the
/// enclosing entry.
pub type Predicate = Arc<dyn Fn(&StepContext) -> Result<bool, StepError> + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(&StepContext) -> Result<bool, StepError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One node in the committed flow.
#[derive(Clone)]
pub enum FlowEntry {
    /// A single unit of work.
    Step { step: Step },
    /// Unordered fan-out over a fixed set of steps; all children may start.
    Parallel { steps: Vec<Step> },
    /// Ordered if/else-if chain; `predicates[i]` gates `steps[i]`, first
    /// match wins, no match completes with no output.
    Conditional {
        predicates: Vec<Predicate>,
        steps: Vec<Step>,
    },
    /// Do-X-while body execution against a predicate evaluated after each
    /// iteration.
    Loop {
        step: Step,
        predicate: Predicate,
        kind: LoopKind,
    },
    /// The step executed once per element of an array input with bounded
    /// parallelism.
    Foreach { step: Step, concurrency: usize },
}

impl FlowEntry {
    /// Serializable diagnostic form; predicates become opaque markers.
    #[must_use]
    pub fn to_graph_entry(&self) -> GraphEntry {
        match self {
            FlowEntry::Step { step } => GraphEntry::Step {
                step: GraphStep::from(step),
            },
            FlowEntry::Parallel { steps } => GraphEntry::Parallel {
                steps: steps.iter().map(GraphStep::from).collect(),
            },
            FlowEntry::Conditional { predicates, steps } => GraphEntry::Conditional {
                steps: steps.iter().map(GraphStep::from).collect(),
                conditions: vec![OPAQUE_CONDITION.to_string(); predicates.len()],
            },
            FlowEntry::Loop { step, kind, .. } => GraphEntry::Loop {
                step: GraphStep::from(step),
                kind: *kind,
                condition: OPAQUE_CONDITION.to_string(),
            },
            FlowEntry::Foreach { step, concurrency } => GraphEntry::Foreach {
                step: GraphStep::from(step),
                concurrency: *concurrency,
            },
        }
    }
}

impl fmt::Debug for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowEntry::Step { step } => f.debug_struct("Step").field("id", &step.id()).finish(),
            FlowEntry::Parallel { steps } => f
                .debug_struct("Parallel")
                .field("steps", &steps.iter().map(Step::id).collect::<Vec<_>>())
                .finish(),
            FlowEntry::Conditional { steps, .. } => f
                .debug_struct("Conditional")
                .field("steps", &steps.iter().map(Step::id).collect::<Vec<_>>())
                .finish(),
            FlowEntry::Loop { step, kind, .. } => f
                .debug_struct("Loop")
                .field("step", &step.id())
                .field("kind", kind)
                .finish(),
            FlowEntry::Foreach { step, concurrency } => f
                .debug_struct("Foreach")
                .field("step", &step.id())
                .field("concurrency", concurrency)
                .finish(),
        }
    }
}

/// Step reduced to identity for serialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStep {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&Step> for GraphStep {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id().to_string(),
            description: step.description().map(str::to_string),
        }
    }
}

/// Serialized form of one flow entry, safe to persist in snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum GraphEntry {
    Step {
        step: GraphStep,
    },
    Parallel {
        steps: Vec<GraphStep>,
    },
    Conditional {
        steps: Vec<GraphStep>,
        conditions: Vec<String>,
    },
    Loop {
        step: GraphStep,
        #[serde(rename = "loopKind")]
        kind: LoopKind,
        condition: String,
    },
    Foreach {
        step: GraphStep,
        concurrency: usize,
    },
}

/// Stable hex digest of a serialized graph.
///
/// Computed at commit and stored alongside snapshots; a restored run whose
/// workflow hashes differently was captured from another graph.
#[must_use]
pub fn graph_hash(entries: &[GraphEntry]) -> String {
    let serialized =
        serde_json::to_string(entries).expect("graph entries serialize infallibly");
    let digest = Sha256::digest(serialized.as_bytes());
    format!("{digest:x}")
}
