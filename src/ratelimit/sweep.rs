//! Background eviction of stale client windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::limiter::Limiter;

/// Handle to a running sweep task.
///
/// The task stops when the handle is shut down or dropped.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `limiter` every `interval`, evicting windows older than `retention`.
    ///
    /// Must be called from within a tokio runtime. Panics if `interval` is zero.
    pub fn spawn(limiter: Arc<Limiter>, interval: Duration, retention: Duration) -> Self {
        info!(
            interval_secs = interval.as_secs_f64(),
            retention_secs = retention.as_secs_f64(),
            "Starting window sweep"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let now = time::Instant::now().into_std();
                let evicted = limiter.evict_stale(now, retention);
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.len(), "Evicted stale windows");
                }
            }
        });

        Self { handle }
    }

    /// Stop the sweep task.
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
