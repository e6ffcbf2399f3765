//! One-shot streaming consumption of a run.

use futures_util::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;

use super::event::RunEvent;
use crate::run::WorkflowError;
use crate::types::{RunStatus, WorkflowResult};

/// Items yielded by [`WorkflowStream`].
///
/// A `start` event (status `RUNNING`) and a `finish` event bracket the
/// sequence; every intermediate item wraps one ordered [`RunEvent`]. The
/// sequence stays open across suspension (the same subscription keeps
/// yielding once the run is resumed) and closes after the first
/// non-suspended terminal state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Start {
        run_id: String,
        workflow_id: String,
        timestamp: i64,
    },
    Update {
        event: RunEvent,
    },
    Finish {
        run_id: String,
        workflow_id: String,
        timestamp: i64,
        status: RunStatus,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn is_finish(&self) -> bool {
        matches!(self, StreamEvent::Finish { .. })
    }
}

/// Handle returned by [`crate::run::WorkflowRun::stream`].
///
/// Yields the bracketed event sequence and resolves the run's terminal
/// [`WorkflowResult`] via [`final_state`](Self::final_state). The final
/// state never resolves while the run is merely suspended awaiting resume.
#[derive(Debug)]
pub struct WorkflowStream {
    events: flume::Receiver<StreamEvent>,
    final_state: watch::Receiver<Option<WorkflowResult>>,
}

impl WorkflowStream {
    pub(crate) fn new(
        events: flume::Receiver<StreamEvent>,
        final_state: watch::Receiver<Option<WorkflowResult>>,
    ) -> Self {
        Self {
            events,
            final_state,
        }
    }

    /// Await the next stream event; `None` once the sequence has closed.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv_async().await.ok()
    }

    /// Drain whatever is currently buffered without awaiting.
    #[must_use]
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.events.try_iter().collect()
    }

    /// Convert into a boxed async stream for combinator pipelines.
    pub fn into_stream(self) -> BoxStream<'static, StreamEvent> {
        self.events.into_stream().boxed()
    }

    /// Resolve with the same [`WorkflowResult`] `start`/`resume` returns.
    ///
    /// Pending while the run executes or sits suspended; resolves on the
    /// first non-suspended terminal state.
    pub async fn final_state(&mut self) -> Result<WorkflowResult, WorkflowError> {
        let settled = self
            .final_state
            .wait_for(|state| state.is_some())
            .await
            .map_err(|_| WorkflowError::FinalStateUnavailable)?;
        Ok(settled
            .clone()
            .expect("wait_for guarantees a settled result"))
    }
}
