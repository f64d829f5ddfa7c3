//! Node-tree semantics on top of a [`NodeRepository`].
//!
//! Every check here is optimistic: the store reads, validates versions,
//! then issues a conditional write. A conditional write that touches no
//! record means somebody else changed the node in between, which surfaces
//! as `BadVersion`.
//!
//! Each successful mutation
//! 1. materializes and queues local watch events, then
//! 2. appends the same events to the shared update log so other brokers
//!    can replay them to their own watchers.

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::constants::ANY_VERSION;
use crate::constants::ROOT_PATH;
use crate::metrics::EPHEMERAL_NODES_REAPED;
use crate::utils::path::parent_path;
use crate::utils::path::sequential_path;
use crate::utils::path::validate_path;
use crate::utils::time::now_ms;
use crate::CreateMode;
use crate::Error;
use crate::EventDispatcher;
use crate::EventType;
use crate::KeeperState;
use crate::Node;
use crate::NodeError;
use crate::NodeRepository;
use crate::NodeUpdate;
use crate::Result;
use crate::Stat;
use crate::StorageError;
use crate::SystemError;
use crate::UpdateLogRepository;
use crate::WatchKind;
use crate::WatchPaths;
use crate::WatchRegistry;
use crate::WatchedEvent;
use crate::WatcherHandle;

pub struct NodeStore {
    broker_id: u32,
    nodes: Arc<dyn NodeRepository>,
    update_log: Arc<dyn UpdateLogRepository>,
    dispatcher: EventDispatcher,
}

impl NodeStore {
    pub fn new(
        broker_id: u32,
        nodes: Arc<dyn NodeRepository>,
        update_log: Arc<dyn UpdateLogRepository>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            broker_id,
            nodes,
            update_log,
            dispatcher,
        }
    }

    pub fn broker_id(&self) -> u32 {
        self.broker_id
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Creates a node and returns its final path.
    ///
    /// Sequential modes append the parent's current cversion, zero padded
    /// to ten digits, to `path`.
    #[instrument(skip(self, data), fields(broker_id = self.broker_id))]
    pub fn create(
        &self,
        session_id: i64,
        path: &str,
        data: Option<Vec<u8>>,
        mode: CreateMode,
    ) -> Result<String> {
        // a sequential base name may end with '/'
        let checked = if mode.is_sequential() {
            format!("{path}1")
        } else {
            path.to_string()
        };
        validate_path(&checked)?;
        if mode.is_ephemeral() && session_id == 0 {
            return Err(NodeError::EphemeralWithoutSession(path.to_string()).into());
        }

        let parent = match parent_path(&checked) {
            Some(parent) => parent.to_string(),
            None => return Err(NodeError::NodeExists(path.to_string()).into()),
        };

        let parent_node = self.get_node(&parent).map_err(|e| match e {
            Error::Node(NodeError::NoNode(_)) => NodeError::NoNode(path.to_string()).into(),
            e => e,
        })?;
        if parent_node.is_ephemeral() {
            return Err(NodeError::NoChildrenForEphemerals(path.to_string()).into());
        }

        let final_path = if mode.is_sequential() {
            sequential_path(path, parent_node.stat.cversion)
        } else {
            path.to_string()
        };
        let owner = if mode.is_ephemeral() { session_id } else { 0 };

        let node = Node::new(final_path.clone(), data, mode, owner, now_ms());
        self.nodes.create(node).map_err(|e| match e {
            Error::System(SystemError::Storage(StorageError::AlreadyExists(_))) => {
                NodeError::NodeExists(final_path.clone()).into()
            }
            e => e,
        })?;

        if parent != ROOT_PATH {
            self.bump_child_counter(&parent);
        }

        debug!(path = %final_path, ?mode, session_id, "node created");
        self.publish(EventType::NodeCreated, &final_path)?;
        self.publish(EventType::NodeChildrenChanged, &parent)?;
        Ok(final_path)
    }

    /// Deletes a childless node. `expected_version` of -1 matches any version.
    #[instrument(skip(self), fields(broker_id = self.broker_id))]
    pub fn delete(
        &self,
        path: &str,
        expected_version: i32,
    ) -> Result<()> {
        validate_path(path)?;
        let parent = parent_path(path).ok_or_else(|| NodeError::InvalidPath {
            path: path.to_string(),
            reason: "root can not be deleted",
        })?;

        let node = self.get_node(path)?;
        if expected_version >= 0 && expected_version != node.stat.version {
            return Err(NodeError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
            }
            .into());
        }
        if node.stat.num_children > 0 {
            return Err(NodeError::NotEmpty(path.to_string()).into());
        }

        if self.nodes.delete(path, node.stat.version)? == 0 {
            // version check passed above, so the node moved under us
            return Err(NodeError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
            }
            .into());
        }

        if parent != ROOT_PATH {
            self.bump_child_counter(parent);
        }

        debug!(path, "node deleted");
        self.publish(EventType::NodeDeleted, path)?;
        self.publish(EventType::NodeChildrenChanged, parent)?;
        Ok(())
    }

    /// Replaces a node's data and returns the new stat.
    #[instrument(skip(self, data), fields(broker_id = self.broker_id))]
    pub fn set_data(
        &self,
        path: &str,
        data: Option<Vec<u8>>,
        expected_version: i32,
    ) -> Result<Stat> {
        validate_path(path)?;
        let node = self.get_node(path)?;
        if expected_version >= 0 && expected_version != node.stat.version {
            return Err(NodeError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
            }
            .into());
        }

        let mtime = now_ms();
        let data_length = data.as_ref().map(|d| d.len() as i32).unwrap_or(0);
        if self.nodes.update_data(path, data, node.stat.version, mtime)? == 0 {
            return Err(NodeError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
            }
            .into());
        }

        self.publish(EventType::NodeDataChanged, path)?;
        Ok(Stat {
            version: node.stat.version + 1,
            mtime,
            data_length,
            ..node.stat
        })
    }

    /// Stat of the node, or `None` if missing.
    ///
    /// With a watcher, arms a Data watch on an existing node and an Exist
    /// watch on a missing one.
    pub fn exists(
        &self,
        path: &str,
        watcher: Option<&WatcherHandle>,
    ) -> Result<Option<Stat>> {
        validate_path(path)?;
        let node = match self.get_node(path) {
            Ok(node) => Some(node),
            Err(Error::Node(NodeError::NoNode(_))) => None,
            Err(e) => return Err(e),
        };

        if let Some(w) = watcher {
            let kind = if node.is_some() {
                WatchKind::Data
            } else {
                WatchKind::Exist
            };
            self.registry().register(w, kind, path);
        }
        Ok(node.map(|n| n.stat))
    }

    pub fn get_data(
        &self,
        path: &str,
        watcher: Option<&WatcherHandle>,
    ) -> Result<(Option<Vec<u8>>, Stat)> {
        validate_path(path)?;
        let node = self.get_node(path)?;
        if let Some(w) = watcher {
            self.registry().register(w, WatchKind::Data, path);
        }
        Ok((node.data, node.stat))
    }

    /// Child names in lexical order.
    pub fn get_children(
        &self,
        path: &str,
        watcher: Option<&WatcherHandle>,
    ) -> Result<Vec<String>> {
        validate_path(path)?;
        let node = self.get_node(path)?;
        if let Some(w) = watcher {
            self.registry().register(w, WatchKind::Child, path);
        }
        Ok(node.children.into_iter().collect())
    }

    /// Re-arms watches in bulk, e.g. after a reconnect.
    pub fn register_watch(
        &self,
        watcher: &WatcherHandle,
        paths: &WatchPaths,
    ) {
        self.registry().register_all(watcher, paths);
    }

    /// Deletes every ephemeral node of the session. Returns how many this
    /// call removed; nodes already gone are skipped.
    #[instrument(skip(self), fields(broker_id = self.broker_id))]
    pub fn remove_ephemeral_nodes_of(
        &self,
        session_id: i64,
    ) -> Result<usize> {
        let paths = self.nodes.ephemeral_paths(session_id)?;
        let mut removed = 0;

        for path in paths {
            match self.delete(&path, ANY_VERSION) {
                Ok(()) => {
                    removed += 1;
                    EPHEMERAL_NODES_REAPED.inc();
                }
                Err(Error::Node(e)) => {
                    // usually another broker reaped it first
                    warn!(path, session_id, error = %e, "skip ephemeral node cleanup");
                }
                Err(e) => {
                    warn!(path, session_id, error = ?e, "failed to remove ephemeral node");
                }
            }
        }

        if removed > 0 {
            info!(session_id, removed, "ephemeral nodes removed");
        }
        Ok(removed)
    }

    /// Tears a session down: reaps its ephemeral nodes, tells its watchers
    /// the connection is closed and forgets their registrations.
    pub fn close(
        &self,
        session_id: i64,
    ) -> Result<()> {
        let result = self.remove_ephemeral_nodes_of(session_id);

        self.dispatcher
            .dispatch_connection_sync(session_id, KeeperState::Closed);
        self.dispatcher.remove_session(session_id);

        result.map(|_| ())
    }

    fn get_node(
        &self,
        path: &str,
    ) -> Result<Node> {
        self.nodes.get(path).map_err(|e| match e {
            Error::System(SystemError::Storage(StorageError::NotFound(_))) => {
                NodeError::NoNode(path.to_string()).into()
            }
            e => e,
        })
    }

    fn bump_child_counter(
        &self,
        parent: &str,
    ) {
        // the child mutation is already committed
        if let Err(e) = self.nodes.update_child_counter(parent) {
            error!(parent, error = ?e, "failed to update child counter");
        }
    }

    /// Delivers locally and records the event for the other brokers.
    fn publish(
        &self,
        event_type: EventType,
        path: &str,
    ) -> Result<()> {
        self.dispatcher.dispatch(WatchedEvent::node(event_type, path))?;

        let update = NodeUpdate::new(event_type, path, now_ms(), self.broker_id);
        if let Err(e) = self.update_log.append(&update) {
            warn!(?update, error = ?e, "failed to record node update");
        }
        Ok(())
    }
}
