//! Automatic snapshot capture on a wall-clock interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SnapshotManager;
use crate::store::RunStateStore;

/// Wraps a run's store so snapshots are taken on a best-effort interval.
///
/// Capture failures are logged and tolerated; the timer keeps running. The
/// timer is cleared when [`stop`](Self::stop) is called or the wrapper is
/// dropped. Capture cadence is best-effort, not guaranteed.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use loomflow::snapshot::{AutoSnapshot, SnapshotManager};
/// use loomflow::store::RunStateStore;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let manager = Arc::new(SnapshotManager::new());
/// let store = RunStateStore::new("run-1", "demo");
///
/// let auto = AutoSnapshot::attach(manager, Arc::clone(&store), Duration::from_secs(30));
/// // ... run the workflow ...
/// auto.stop();
/// # }
/// ```
#[derive(Debug)]
pub struct AutoSnapshot {
    handle: JoinHandle<()>,
}

impl AutoSnapshot {
    /// Start capturing snapshots of `store` every `interval`.
    #[must_use]
    pub fn attach(
        manager: Arc<SnapshotManager>,
        store: Arc<RunStateStore>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the initial
            // capture lands one interval after attach.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = manager.capture(&store) {
                    tracing::warn!(
                        target: "loomflow::snapshot",
                        run_id = %store.run_id(),
                        error = %err,
                        "automatic snapshot capture failed"
                    );
                }
            }
        });
        Self { handle }
    }

    /// Clear the timer. Idempotent; also happens on drop.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for AutoSnapshot {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
