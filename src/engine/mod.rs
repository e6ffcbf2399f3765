//! Run execution engine.
//!
//! The engine walks a committed flow entry-by-entry through a serial
//! primary queue ([`TaskQueue`] with concurrency 1), so all top-level entry
//! side effects on the store are serialised per run. Parallel and foreach
//! entries dispatch their children on separate bounded queues.

mod executor;
mod queue;

pub use queue::TaskQueue;

pub(crate) use executor::{ExecutionEngine, ResumePlan};
