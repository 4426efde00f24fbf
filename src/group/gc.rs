use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::group::{GroupKey, GroupRegistry};

/// Periodic sweep that evicts group records which have stayed marked for
/// deletion longer than the expiration window. It is the only component
/// that removes records from the registry.
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    registry: Arc<GroupRegistry>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    expiration: Duration,
}

impl GarbageCollector {
    pub fn new(
        registry: Arc<GroupRegistry>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        expiration: Duration,
    ) -> Self {
        Self {
            registry,
            clock,
            interval,
            expiration,
        }
    }

    /// Run a single sweep and return the evicted keys.
    pub fn sweep(&self) -> Vec<GroupKey> {
        let removed = self
            .registry
            .remove_expired(self.clock.now(), self.expiration);
        for key in &removed {
            tracing::info!(group = %key, "Group record expired and removed");
        }
        tracing::trace!(
            removed = removed.len(),
            remaining = self.registry.len(),
            "Group GC sweep finished"
        );
        removed
    }

    /// Sweep on every interval tick until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Group GC stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
