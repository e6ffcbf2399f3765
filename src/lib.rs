//! # Loomflow: Durable Workflow Execution Engine
//!
//! Loomflow runs a graph of user-defined computational steps, coordinates
//! parallel, conditional, and iterative composition of those steps, and
//! supports mid-flight suspension (a voluntary pause awaiting external
//! input) with resumption from persisted state. Each invocation of a
//! workflow is a **run**, addressable by identifier and observable as an
//! ordered event stream.
//!
//! ## Core Concepts
//!
//! - **Steps**: Async units of work with typed (schema-validated) I/O
//! - **Flow**: Composable entries (`then`, `parallel`, `branch`,
//!   `dowhile`/`dountil`, `foreach`, `map`) frozen by `commit`
//! - **Store**: Event-sourced per-run state, the single source of truth
//! - **Engine**: Serial primary queue walking the flow, bounded per-entry
//!   parallelism
//! - **Snapshots**: Validated, round-trip-stable serialization of a run
//!
//! ## Quick Start
//!
//! ```rust
//! use loomflow::flow::WorkflowBuilder;
//! use loomflow::step::{Step, StepOutcome};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let add = Step::builder("add")
//!     .input_schema(json!({
//!         "type": "object",
//!         "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!         "required": ["a", "b"],
//!     }))
//!     .output_schema(json!({"type": "number"}))
//!     .handler(|ctx| async move {
//!         let a = ctx.input_data["a"].as_f64().unwrap_or_default();
//!         let b = ctx.input_data["b"].as_f64().unwrap_or_default();
//!         Ok(StepOutcome::Complete(json!(a + b)))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let workflow = WorkflowBuilder::new("adder").then(add).commit().unwrap();
//! let result = workflow.start(json!({"a": 2, "b": 3})).await.unwrap();
//! assert!(result.is_completed());
//! # }
//! ```
//!
//! ## Suspension
//!
//! A step halts its run by returning the value built by
//! [`StepContext::suspend`](context::StepContext::suspend):
//!
//! ```rust,no_run
//! # use loomflow::step::{Step, StepOutcome};
//! # use serde_json::json;
//! let approval = Step::builder("approval")
//!     .handler(|ctx| async move {
//!         if ctx.is_resuming() {
//!             return Ok(StepOutcome::Complete(json!({"approved": true})));
//!         }
//!         ctx.suspend(json!({"reason": "needs_human_approval"}))
//!     })
//!     .build()
//!     .unwrap();
//! ```
//!
//! The run comes back `suspended`; a later
//! [`resume`](run::WorkflowRun::resume) restarts the walk at the head of
//! the flow, reuses every completed step's cached output, validates the
//! resume payload, and re-enters the target step with `is_resuming` set.
//!
//! ## Module Guide
//!
//! - [`step`] - Step definition and execute handlers
//! - [`flow`] - Flow entries, mapping, and the workflow builder
//! - [`workflow`] - Committed workflows and workflow-as-step embedding
//! - [`run`] - The run façade: start, resume, stream, watch
//! - [`store`] - Event-sourced run state store
//! - [`events`] - Event shapes, broadcast hub, stream and watch modes
//! - [`engine`] - Scheduling queue and the flow walk
//! - [`snapshot`] - Capture/restore/diff with bounded retention
//! - [`context`] - Step and runtime contexts
//! - [`schema`] - Payload schema validation seam
//! - [`types`] - Statuses, step results, and workflow results

pub mod context;
pub mod engine;
pub mod events;
pub mod flow;
pub mod run;
pub mod schema;
pub mod snapshot;
pub mod step;
pub mod store;
pub mod types;
pub mod utils;
pub mod workflow;
