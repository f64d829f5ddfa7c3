//! Ordered delivery of materialized watch events.
//!
//! The dispatcher is cheap to clone and shared by every producer
//! (`NodeStore`, `UpdatePropagator`). Producers only pay for the
//! materialization and an unbounded channel push; callbacks run on the
//! single [`DispatchLoop`] task in enqueue order.

use std::any::Any;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::KeeperState;
use super::WatchRegistry;
use super::WatchedEvent;
use super::WatcherHandle;
use crate::metrics::WATCHER_CALLBACK_FAILURES;
use crate::metrics::WATCH_EVENTS_DELIVERED;
use crate::Result;

struct Delivery {
    watcher: WatcherHandle,
    event: WatchedEvent,
}

#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<WatchRegistry>,
    queue: mpsc::UnboundedSender<Delivery>,

    /// Watchers whose callback panicked, by watcher id, with their session.
    /// Never invoked again.
    closed_watchers: Arc<DashMap<u64, i64>>,
}

/// Consumer side of the delivery queue
pub struct DispatchLoop {
    queue: mpsc::UnboundedReceiver<Delivery>,
    closed_watchers: Arc<DashMap<u64, i64>>,
}

impl EventDispatcher {
    /// Returns (dispatcher, consumer) pair. Events queue up until
    /// [`DispatchLoop::run`] is spawned.
    pub fn new(registry: Arc<WatchRegistry>) -> (Self, DispatchLoop) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let closed_watchers = Arc::new(DashMap::new());

        let dispatcher = Self {
            registry,
            queue,
            closed_watchers: closed_watchers.clone(),
        };
        let consumer = DispatchLoop {
            queue: receiver,
            closed_watchers,
        };
        (dispatcher, consumer)
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Whether the watcher was closed after a panicking callback.
    pub fn is_closed(
        &self,
        watcher: &WatcherHandle,
    ) -> bool {
        self.closed_watchers.contains_key(&watcher.id())
    }

    /// Forgets everything held for a session: its registrations, its default
    /// watcher and its closed watchers.
    pub fn remove_session(
        &self,
        session_id: i64,
    ) {
        self.registry.remove_session(session_id);
        self.closed_watchers.retain(|_, owner| *owner != session_id);
    }

    /// Materializes a node event and queues it for every owed watcher.
    ///
    /// Returns the number of queued deliveries.
    pub fn dispatch(
        &self,
        event: WatchedEvent,
    ) -> Result<usize> {
        let watchers = self.registry.materialize(&event)?;
        Ok(self.enqueue(watchers, event))
    }

    /// Materializes a node event and delivers it before returning.
    pub fn dispatch_sync(
        &self,
        event: WatchedEvent,
    ) -> Result<usize> {
        let watchers = self.registry.materialize(&event)?;
        Ok(self.deliver_now(watchers, &event))
    }

    /// Queues a connection-state event for one session.
    pub fn dispatch_connection(
        &self,
        session_id: i64,
        state: KeeperState,
    ) -> usize {
        let watchers = self.registry.materialize_connection(session_id, state);
        self.enqueue(watchers, WatchedEvent::connection(state))
    }

    /// Delivers a connection-state event on the calling thread. Used when
    /// the connection is about to go away and nothing may stay queued.
    pub fn dispatch_connection_sync(
        &self,
        session_id: i64,
        state: KeeperState,
    ) -> usize {
        let watchers = self.registry.materialize_connection(session_id, state);
        self.deliver_now(watchers, &WatchedEvent::connection(state))
    }

    fn enqueue(
        &self,
        watchers: Vec<WatcherHandle>,
        event: WatchedEvent,
    ) -> usize {
        let mut queued = 0;
        for watcher in watchers {
            let delivery = Delivery {
                watcher,
                event: event.clone(),
            };
            if self.queue.send(delivery).is_err() {
                warn!(?event, "dispatch loop stopped, dropping watch event");
                break;
            }
            queued += 1;
        }
        trace!(?event, queued, "watch event queued");
        queued
    }

    fn deliver_now(
        &self,
        watchers: Vec<WatcherHandle>,
        event: &WatchedEvent,
    ) -> usize {
        watchers
            .iter()
            .filter(|w| deliver(w, event, &self.closed_watchers))
            .count()
    }
}

impl DispatchLoop {
    /// Delivers queued events until shutdown or until every dispatcher
    /// clone is dropped.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<()>,
    ) {
        info!("Watch dispatch loop started");

        loop {
            tokio::select! {
                next = self.queue.recv() => {
                    match next {
                        Some(Delivery { watcher, event }) => {
                            deliver(&watcher, &event, &self.closed_watchers);
                        }
                        None => {
                            debug!("All dispatchers dropped");
                            break;
                        }
                    }
                }

                _ = shutdown.changed() => {
                    info!("Watch dispatch loop shutting down");
                    break;
                }
            }
        }

        info!("Watch dispatch loop stopped");
    }
}

/// Invokes one callback, isolating panics. Returns whether the callback ran
/// to completion.
fn deliver(
    watcher: &WatcherHandle,
    event: &WatchedEvent,
    closed_watchers: &DashMap<u64, i64>,
) -> bool {
    if closed_watchers.contains_key(&watcher.id()) {
        trace!(watcher_id = watcher.id(), "skipping closed watcher");
        return false;
    }

    match catch_unwind(AssertUnwindSafe(|| watcher.process(event))) {
        Ok(()) => {
            WATCH_EVENTS_DELIVERED
                .with_label_values(&[event.event_type.as_str()])
                .inc();
            true
        }
        Err(panic) => {
            error!(
                watcher_id = watcher.id(),
                session_id = watcher.session_id(),
                ?event,
                reason = panic_message(&panic),
                "watcher callback panicked, closing its delivery"
            );
            WATCHER_CALLBACK_FAILURES.inc();
            closed_watchers.insert(watcher.id(), watcher.session_id());
            false
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown"
    }
}
