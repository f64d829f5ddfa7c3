//! Pending one-shot watches, indexed by path.
//!
//! Each watch category lives in its own `DashMap`, so registrations and
//! materializations on different categories (or different shards of one
//! category) never contend. A watch is removed from its map in the same
//! step that hands it out for delivery, which makes delivery at-most-once.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::EventType;
use super::KeeperState;
use super::WatchKind;
use super::WatchPaths;
use super::WatchedEvent;
use super::WatcherHandle;
use crate::Error;
use crate::Result;

/// Watchers registered on one path, keyed by watcher id
type WatcherSet = HashMap<u64, WatcherHandle>;

#[derive(Debug)]
pub struct WatchRegistry {
    data_watches: DashMap<String, WatcherSet>,
    child_watches: DashMap<String, WatcherSet>,
    exist_watches: DashMap<String, WatcherSet>,

    /// session id -> watcher receiving connection-state events
    default_watchers: DashMap<i64, WatcherHandle>,

    /// Keep registrations across a disconnect so they can be re-armed
    auto_watch_reset: bool,
}

impl WatchRegistry {
    pub fn new(auto_watch_reset: bool) -> Self {
        Self {
            data_watches: DashMap::new(),
            child_watches: DashMap::new(),
            exist_watches: DashMap::new(),
            default_watchers: DashMap::new(),
            auto_watch_reset,
        }
    }

    fn map(
        &self,
        kind: WatchKind,
    ) -> &DashMap<String, WatcherSet> {
        match kind {
            WatchKind::Data => &self.data_watches,
            WatchKind::Child => &self.child_watches,
            WatchKind::Exist => &self.exist_watches,
        }
    }

    /// Arms a one-shot watch. Registering the same watcher twice on the
    /// same (path, kind) keeps a single entry.
    pub fn register(
        &self,
        watcher: &WatcherHandle,
        kind: WatchKind,
        path: &str,
    ) {
        self.map(kind)
            .entry(path.to_string())
            .or_default()
            .insert(watcher.id(), watcher.clone());

        trace!(watcher_id = watcher.id(), ?kind, path, "watch registered");
    }

    pub fn register_all(
        &self,
        watcher: &WatcherHandle,
        paths: &WatchPaths,
    ) {
        for path in &paths.data {
            self.register(watcher, WatchKind::Data, path);
        }
        for path in &paths.exist {
            self.register(watcher, WatchKind::Exist, path);
        }
        for path in &paths.child {
            self.register(watcher, WatchKind::Child, path);
        }
    }

    /// Installs the watcher that receives connection-state events for its
    /// session. Replaces any previous default watcher of that session.
    pub fn set_default_watcher(
        &self,
        watcher: WatcherHandle,
    ) {
        self.default_watchers.insert(watcher.session_id(), watcher);
    }

    pub fn default_watcher(
        &self,
        session_id: i64,
    ) -> Option<WatcherHandle> {
        self.default_watchers.get(&session_id).map(|w| w.clone())
    }

    /// Consumes and returns every watcher owed delivery of a node event.
    ///
    /// # Errors
    /// `Error::Fatal` for event types no mutation produces. Reaching that
    /// branch means the caller is broken.
    pub fn materialize(
        &self,
        event: &WatchedEvent,
    ) -> Result<Vec<WatcherHandle>> {
        let path = match (&event.path, event.event_type.is_node_event()) {
            (Some(path), true) => path.as_str(),
            _ => {
                error!(?event, "unexpected event type for node watch materialization");
                return Err(Error::Fatal(format!(
                    "can not materialize {} event on path {:?}",
                    event.event_type.as_str(),
                    event.path
                )));
            }
        };

        let mut result = WatcherSet::new();
        match event.event_type {
            EventType::NodeCreated | EventType::NodeDataChanged => {
                Self::take(&self.data_watches, path, &mut result);
                Self::take(&self.exist_watches, path, &mut result);
            }
            EventType::NodeChildrenChanged => {
                Self::take(&self.child_watches, path, &mut result);
            }
            EventType::NodeDeleted => {
                Self::take(&self.data_watches, path, &mut result);
                Self::take(&self.child_watches, path, &mut result);

                let before = result.len();
                Self::take(&self.exist_watches, path, &mut result);
                if result.len() > before {
                    warn!(path, "exist watches fired on delete of an existing node");
                }
            }
            _ => unreachable!("filtered by is_node_event"),
        }

        debug!(
            path,
            event_type = event.event_type.as_str(),
            watchers = result.len(),
            "watches materialized"
        );
        Ok(result.into_values().collect())
    }

    /// Connection-state counterpart of [`materialize`](Self::materialize).
    ///
    /// Returns every watcher the session has armed plus its default watcher;
    /// nothing is consumed. Without auto watch reset a non-connected state
    /// invalidates the session's watches.
    pub fn materialize_connection(
        &self,
        session_id: i64,
        state: KeeperState,
    ) -> Vec<WatcherHandle> {
        let mut result = WatcherSet::new();
        if let Some(default) = self.default_watchers.get(&session_id) {
            result.insert(default.id(), default.clone());
        }

        for map in [&self.data_watches, &self.child_watches, &self.exist_watches] {
            for entry in map.iter() {
                for (id, w) in entry.value() {
                    if w.session_id() == session_id {
                        result.insert(*id, w.clone());
                    }
                }
            }
        }

        if !self.auto_watch_reset && state != KeeperState::SyncConnected {
            debug!(session_id, ?state, "auto watch reset disabled, dropping session watches");
            self.clear_session_watches(session_id);
        }

        result.into_values().collect()
    }

    /// Forgets every watch and the default watcher of a session.
    pub fn remove_session(
        &self,
        session_id: i64,
    ) {
        self.clear_session_watches(session_id);
        self.default_watchers.remove(&session_id);
    }

    fn clear_session_watches(
        &self,
        session_id: i64,
    ) {
        for map in [&self.data_watches, &self.child_watches, &self.exist_watches] {
            map.retain(|_, set| {
                set.retain(|_, w| w.session_id() != session_id);
                !set.is_empty()
            });
        }
    }

    fn take(
        map: &DashMap<String, WatcherSet>,
        path: &str,
        into: &mut WatcherSet,
    ) {
        if let Some((_, set)) = map.remove(path) {
            into.extend(set);
        }
    }

    /// Paths with pending watches of the given kind
    pub fn watched_paths(
        &self,
        kind: WatchKind,
    ) -> Vec<String> {
        self.map(kind).iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(
        &self,
        watcher: &WatcherHandle,
        kind: WatchKind,
        path: &str,
    ) -> bool {
        self.map(kind)
            .get(path)
            .map(|set| set.contains_key(&watcher.id()))
            .unwrap_or(false)
    }

    /// Number of pending (path, watcher) registrations across all kinds
    pub fn len(&self) -> usize {
        [&self.data_watches, &self.child_watches, &self.exist_watches]
            .iter()
            .map(|m| m.iter().map(|e| e.value().len()).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
