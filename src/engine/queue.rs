//! Priority FIFO task queue with bounded concurrency.
//!
//! Tasks acquire a slot before running and hand it to the next waiter when
//! done. Within a priority, dispatch order is submission order; the engine
//! guarantees nothing fairer than that.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

struct Waiter {
    priority: i32,
    seq: u64,
    permit: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then FIFO by sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    concurrency: usize,
    active: usize,
    seq: u64,
    waiting: BinaryHeap<Waiter>,
}

/// Bounded-concurrency task queue.
///
/// Cloning shares the queue. A queue of concurrency 1 serialises its tasks
/// and gives a clear happens-before between them.
///
/// # Examples
///
/// ```rust
/// use loomflow::engine::TaskQueue;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = TaskQueue::new(1);
/// let a = queue.run(async { 1 }).await;
/// let b = queue.run(async { 2 }).await;
/// assert_eq!(a + b, 3);
/// # }
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl TaskQueue {
    /// Create a queue; `concurrency` is clamped to at least 1.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                concurrency: concurrency.max(1),
                active: 0,
                seq: 0,
                waiting: BinaryHeap::new(),
            })),
        }
    }

    /// Run a task at the default priority (0).
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        self.run_with_priority(0, task).await
    }

    /// Run a task once a slot is available; higher priorities dispatch
    /// first, FIFO within a priority.
    pub async fn run_with_priority<F, T>(&self, priority: i32, task: F) -> T
    where
        F: Future<Output = T>,
    {
        self.acquire(priority).await;
        let output = task.await;
        self.release();
        output
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.lock().concurrency
    }

    /// Number of tasks currently waiting for a slot.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    async fn acquire(&self, priority: i32) {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.active < inner.concurrency {
                inner.active += 1;
                None
            } else {
                let (permit, slot) = oneshot::channel();
                inner.seq += 1;
                let seq = inner.seq;
                inner.waiting.push(Waiter {
                    priority,
                    seq,
                    permit,
                });
                Some(slot)
            }
        };
        if let Some(slot) = waiter {
            // The sender is only dropped if the queue itself goes away.
            let _ = slot.await;
        }
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        // Hand the slot to the next live waiter; skip any whose future was
        // dropped while queued.
        while let Some(waiter) = inner.waiting.pop() {
            if waiter.permit.send(()).is_ok() {
                return;
            }
        }
        inner.active -= 1;
    }
}
