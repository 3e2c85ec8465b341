//! Background visibility/retention sweeper

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use queuestack_core::SharedClock;

use crate::registry::QueueRegistry;

/// What a single sweep did, summed over all queues
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// In-flight messages whose visibility timeout elapsed
    pub returned: usize,
    /// Messages dropped for exceeding retention
    pub expired: usize,
    /// Deduplication records past their window
    pub dedup_purged: usize,
}

impl SweepStats {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ExpiryScheduler {
    registry: Arc<QueueRegistry>,
    clock: SharedClock,
    tick: Duration,
}

impl ExpiryScheduler {
    pub fn new(registry: Arc<QueueRegistry>, clock: SharedClock, tick: Duration) -> Self {
        Self {
            registry,
            clock,
            tick,
        }
    }

    /// Run one pass over every queue. Each queue is locked on its own, so a
    /// sweep never blocks traffic on more than one queue at a time.
    pub fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        for queue in self.registry.snapshot() {
            let now = self.clock.now_millis();
            let retention_ms = queue.config().retention_millis();

            let (returned, expired, dedup_purged) = {
                let mut store = queue.lock();
                (
                    store.return_expired(now),
                    store.purge_retained(retention_ms, now),
                    store.purge_dedup(now),
                )
            };

            if returned > 0 {
                debug!(
                    queue = %queue.name(),
                    count = returned,
                    "Visibility timeout elapsed, messages available again"
                );
                queue.wake_receivers();
            }
            if expired > 0 {
                info!(
                    queue = %queue.name(),
                    count = expired,
                    "Deleted messages past retention period"
                );
            }

            stats.returned += returned;
            stats.expired += expired;
            stats.dedup_purged += dedup_purged;
        }
        stats
    }

    /// Start sweeping on the current tokio runtime.
    pub fn spawn(self) -> ExpiryHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        ExpiryHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let tick_ms = u64::try_from(self.tick.as_millis()).unwrap_or(u64::MAX);
        info!(tick_ms, "Expiry scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.sweep();
                    if !stats.is_empty() {
                        debug!(
                            returned = stats.returned,
                            expired = stats.expired,
                            dedup_purged = stats.dedup_purged,
                            "Sweep finished"
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("Expiry scheduler stopped");
                    return;
                }
            }
        }
    }
}

/// Handle to a running scheduler; aborts the task if dropped
#[derive(Debug)]
pub struct ExpiryHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ExpiryHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Expiry scheduler task ended abnormally");
        }
    }
}

impl Drop for ExpiryHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
