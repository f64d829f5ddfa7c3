use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::UpdatePropagator;
use crate::metrics::UPDATE_LOG_COMPACTED;
use crate::utils::time::now_ms;
use crate::Result;
use crate::UpdateLogRepository;

/// Trims the shared update log.
///
/// A record is only removed once it is older than the retention window and
/// older than this broker's checkpoint, so nothing the local propagator has
/// yet to read goes away.
pub struct LogCompactor {
    update_log: Arc<dyn UpdateLogRepository>,
    propagator: Arc<UpdatePropagator>,
    retention: Duration,
}

impl LogCompactor {
    pub fn new(
        update_log: Arc<dyn UpdateLogRepository>,
        propagator: Arc<UpdatePropagator>,
        retention: Duration,
    ) -> Self {
        Self {
            update_log,
            propagator,
            retention,
        }
    }

    pub fn cutoff(
        &self,
        now: i64,
    ) -> i64 {
        let by_retention = now - self.retention.as_millis() as i64;
        by_retention.min(self.propagator.checkpoint_time())
    }

    /// Returns the number of removed records.
    pub fn compact_once(&self) -> Result<usize> {
        let cutoff = self.cutoff(now_ms());
        let removed = self.update_log.delete_older_than(cutoff)?;
        if removed > 0 {
            UPDATE_LOG_COMPACTED.inc_by(removed as u64);
            debug!(cutoff, removed, "update log compacted");
        }
        Ok(removed)
    }

    pub async fn run(
        self,
        every: Duration,
        mut shutdown: watch::Receiver<()>,
    ) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?every, retention = ?self.retention, "Log compactor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.compact_once() {
                        warn!(error = ?e, "update log compaction failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Log compactor shutting down");
                    break;
                }
            }
        }
    }
}
