//! Per-run fan-out of [`RunEvent`]s to stream consumers.
//!
//! The store publishes every recorded event into its hub; each stream
//! consumer gets an independent, buffered view of that feed. Runs are
//! usually consumed by at most a handful of streams, so the hub favors a
//! simple shape: one broadcast channel, a shared counter for events a slow
//! consumer missed, and `Option`-based receive calls (`None` means the feed
//! is done, there is no error to handle).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;

use super::event::RunEvent;

/// Events buffered per subscriber before a slow consumer starts missing
/// some.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Health counters for a run's event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHubMetrics {
    /// Per-subscriber buffer size this hub was built with.
    pub capacity: usize,
    /// Events skipped so far across all slow subscribers.
    pub dropped: usize,
}

/// Error returned when publishing to a hub that was already closed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event hub closed")]
    Closed,
}

/// Broadcast point for one run's ordered event feed.
///
/// Stays open across suspension so a resume keeps feeding the same
/// subscriptions; a run with no stream consumers publishes into the void,
/// which is fine. Only an explicitly [`close`](Self::close)d hub rejects
/// publishes.
#[derive(Debug)]
pub struct EventHub {
    sender: Mutex<Option<broadcast::Sender<RunEvent>>>,
    dropped: Arc<AtomicUsize>,
    capacity: usize,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventHub {
    /// Hub with a per-subscriber buffer of `capacity` events.
    ///
    /// The broadcast channel refuses a zero capacity, so zero is bumped to
    /// one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            dropped: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Fan an event out to every live subscriber.
    pub fn publish(&self, event: RunEvent) -> Result<(), PublishError> {
        let guard = self.sender.lock();
        match guard.as_ref() {
            // A send error just means nobody is streaming this run right
            // now; the event is still durable in the store.
            Some(sender) => {
                let _ = sender.send(event);
                Ok(())
            }
            None => Err(PublishError::Closed),
        }
    }

    /// Open an independent view of the feed, starting at the next publish.
    ///
    /// Subscribing to a closed hub yields a stream that is immediately
    /// done.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.lock().as_ref().map(broadcast::Sender::subscribe),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Stop accepting publishes and let existing subscribers drain.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events skipped so far because a subscriber fell behind.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn metrics(&self) -> EventHubMetrics {
        EventHubMetrics {
            capacity: self.capacity,
            dropped: self.dropped(),
        }
    }
}

/// One subscriber's view of a run's event feed.
///
/// Receive calls return `None` once the feed is done (hub closed and
/// buffer drained, or the hub was closed before subscribing). A subscriber
/// that falls more than the hub's capacity behind loses the oldest unseen
/// events; the loss is counted and logged, and receiving simply continues
/// from the oldest event still buffered.
#[derive(Debug)]
pub struct EventStream {
    receiver: Option<broadcast::Receiver<RunEvent>>,
    dropped: Arc<AtomicUsize>,
}

impl EventStream {
    /// Await the next event; `None` when the feed is done.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            let outcome = match self.receiver.as_mut() {
                None => return None,
                Some(receiver) => receiver.recv().await,
            };
            match outcome {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Self::record_lag(&self.dropped, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing
    /// is buffered or the feed is done.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        loop {
            let outcome = match self.receiver.as_mut() {
                None => return None,
                Some(receiver) => receiver.try_recv(),
            };
            match outcome {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    Self::record_lag(&self.dropped, skipped);
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Await the next event, giving up after `wait`.
    pub async fn next_timeout(&mut self, wait: Duration) -> Option<RunEvent> {
        timeout(wait, self.recv()).await.ok().flatten()
    }

    /// Adapt into a boxed [`futures_util::Stream`] for combinator
    /// pipelines.
    pub fn into_async_stream(self) -> BoxStream<'static, RunEvent> {
        stream::unfold(self, |mut feed| async move {
            feed.recv().await.map(|event| (event, feed))
        })
        .boxed()
    }

    fn record_lag(dropped: &AtomicUsize, skipped: u64) {
        let skipped_count = usize::try_from(skipped).unwrap_or(usize::MAX);
        dropped.fetch_add(skipped_count, Ordering::Relaxed);
        tracing::warn!(
            target: "loomflow::events",
            skipped,
            "event subscriber fell behind its buffer; continuing past the missed events"
        );
    }
}
