//! Replays other brokers' node events to local watchers.
//!
//! Each poll asks the update log for everything at or after the checkpoint
//! time. Records sharing the checkpoint time are fetched again on the next
//! poll, so the checkpoint also remembers which of them were already
//! delivered. Once a poll returns nothing newer, the checkpoint moves one
//! millisecond past that time and the remembered set is dropped.
//!
//! Timestamps come from each origin broker's wall clock. A record stamped
//! behind a peer's checkpoint (clock skew) is never delivered to that peer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::metrics::REMOTE_UPDATES_DELIVERED;
use crate::metrics::UPDATE_FETCH_FAILURES;
use crate::utils::time::now_ms;
use crate::EventDispatcher;
use crate::NodeUpdate;
use crate::Result;
use crate::SystemError;
use crate::UpdateLogRepository;

/// Read position in the shared update log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Lower bound, inclusive, of the next fetch
    pub time: i64,
    /// Records at `time` already delivered
    pub seen: HashSet<NodeUpdate>,
}

impl Checkpoint {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            seen: HashSet::new(),
        }
    }

    /// Feeds every record not yet seen to `deliver` and returns the next
    /// checkpoint.
    ///
    /// `fetched` must be what the log returned for `since = self.time`.
    pub fn advance<'a>(
        &self,
        fetched: impl IntoIterator<Item = &'a NodeUpdate>,
        mut deliver: impl FnMut(&NodeUpdate),
    ) -> Checkpoint {
        let mut fetched = fetched.into_iter().peekable();
        if fetched.peek().is_none() {
            return self.clone();
        }

        let mut newest = self.time;
        let mut at_newest: HashSet<NodeUpdate> = HashSet::new();

        for update in fetched {
            if self.seen.contains(update) {
                continue;
            }
            deliver(update);

            if update.timestamp > newest {
                newest = update.timestamp;
                at_newest.clear();
            }
            if update.timestamp == newest {
                at_newest.insert(update.clone());
            }
        }

        if newest == self.time {
            // everything at `time` is delivered; nothing older can appear
            // once the origin clock has moved on
            Checkpoint::new(self.time + 1)
        } else {
            Checkpoint {
                time: newest,
                seen: at_newest,
            }
        }
    }
}

pub struct UpdatePropagator {
    broker_id: u32,
    update_log: Arc<dyn UpdateLogRepository>,
    dispatcher: EventDispatcher,
    checkpoint: ArcSwap<Checkpoint>,
}

impl UpdatePropagator {
    /// Starts reading at the current wall clock; earlier records are
    /// considered already applied.
    pub fn new(
        broker_id: u32,
        update_log: Arc<dyn UpdateLogRepository>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self::with_checkpoint(broker_id, update_log, dispatcher, Checkpoint::new(now_ms()))
    }

    pub fn with_checkpoint(
        broker_id: u32,
        update_log: Arc<dyn UpdateLogRepository>,
        dispatcher: EventDispatcher,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            broker_id,
            update_log,
            dispatcher,
            checkpoint: ArcSwap::from_pointee(checkpoint),
        }
    }

    pub fn checkpoint(&self) -> Arc<Checkpoint> {
        self.checkpoint.load_full()
    }

    /// Oldest timestamp this broker may still need from the log
    pub fn checkpoint_time(&self) -> i64 {
        self.checkpoint.load().time
    }

    /// One poll of the update log.
    ///
    /// On a fetch failure the checkpoint is left untouched and the same
    /// range is asked for again next time.
    pub fn pull_updates(&self) -> Result<()> {
        let current = self.checkpoint.load_full();

        let fetched = self
            .update_log
            .query_updates(self.broker_id, current.time)
            .map_err(|e| SystemError::TransientFetchFailure(format!("{e:?}")))?;
        trace!(since = current.time, fetched = fetched.len(), "update log polled");

        let next = current.advance(&fetched, |update| self.deliver(update));
        if next != *current {
            debug!(from = current.time, to = next.time, seen = next.seen.len(), "checkpoint advanced");
            self.checkpoint.store(Arc::new(next));
        }
        Ok(())
    }

    fn deliver(
        &self,
        update: &NodeUpdate,
    ) {
        if !update.event_type.is_node_event() {
            warn!(?update, "ignoring non node event in update log");
            return;
        }

        match self.dispatcher.dispatch(update.to_event()) {
            Ok(_) => {
                REMOTE_UPDATES_DELIVERED
                    .with_label_values(&[&update.origin_broker.to_string()])
                    .inc();
            }
            Err(e) => warn!(?update, error = ?e, "failed to dispatch remote update"),
        }
    }

    /// Polls every `poll_interval` until shutdown.
    pub async fn run(
        self: Arc<Self>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<()>,
    ) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(broker_id = self.broker_id, ?poll_interval, "Update propagator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.pull_updates() {
                        UPDATE_FETCH_FAILURES.inc();
                        warn!(error = ?e, "update log poll failed, retrying next tick");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Update propagator shutting down");
                    break;
                }
            }
        }
    }
}
