use std::collections::BTreeMap;
use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::trace;

use super::super::child_names;
use super::super::child_prefix;
use crate::constants::ROOT_PATH;
use crate::utils::time::now_ms;
use crate::CreateMode;
use crate::Node;
use crate::NodeRepository;
use crate::NodeUpdate;
use crate::Result;
use crate::Session;
use crate::SessionRepository;
use crate::StorageError;
use crate::UpdateLogRepository;

/// In-memory backend implementing every repository.
///
/// Each table sits behind its own lock; a conditional write holds the
/// write lock across check and update.
#[derive(Debug)]
pub struct MemoryStorage {
    nodes: RwLock<BTreeMap<String, Node>>,
    sessions: RwLock<HashMap<String, Session>>,
    updates: RwLock<Vec<NodeUpdate>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// An empty tree holding only the root node.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_PATH.to_string(),
            Node::new(ROOT_PATH, None, CreateMode::Persistent, 0, now_ms()),
        );
        Self {
            nodes: RwLock::new(nodes),
            sessions: RwLock::new(HashMap::new()),
            updates: RwLock::new(Vec::new()),
        }
    }

    fn children(
        nodes: &BTreeMap<String, Node>,
        parent: &str,
    ) -> std::collections::BTreeSet<String> {
        let prefix = child_prefix(parent);
        child_names(
            parent,
            nodes
                .range(prefix.clone()..)
                .map(|(k, _)| k.as_str())
                .take_while(|k| k.starts_with(&prefix)),
        )
    }

    pub fn update_log_len(&self) -> usize {
        self.updates.read().len()
    }
}

impl NodeRepository for MemoryStorage {
    fn create(
        &self,
        node: Node,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.path) {
            return Err(StorageError::AlreadyExists(node.path).into());
        }
        trace!(path = %node.path, "mem: node inserted");
        nodes.insert(node.path.clone(), node);
        Ok(())
    }

    fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<usize> {
        let mut nodes = self.nodes.write();
        let removable = match nodes.get(path) {
            Some(node) => node.stat.version == version && Self::children(&nodes, path).is_empty(),
            None => false,
        };
        if !removable {
            return Ok(0);
        }
        nodes.remove(path);
        Ok(1)
    }

    fn get(
        &self,
        path: &str,
    ) -> Result<Node> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(node.with_children(Self::children(&nodes, path)))
    }

    fn update_data(
        &self,
        path: &str,
        data: Option<Vec<u8>>,
        version: i32,
        mtime: i64,
    ) -> Result<usize> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(path) {
            Some(node) if node.stat.version == version => {
                node.stat.data_length = data.as_ref().map(|d| d.len() as i32).unwrap_or(0);
                node.data = data;
                node.stat.version = version + 1;
                node.stat.mtime = mtime;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn update_child_counter(
        &self,
        path: &str,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        node.stat.cversion += 1;
        Ok(())
    }

    fn ephemeral_paths(
        &self,
        session_id: i64,
    ) -> Result<Vec<String>> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.stat.ephemeral_owner == session_id && n.is_ephemeral())
            .map(|n| n.path.clone())
            .collect())
    }
}

impl SessionRepository for MemoryStorage {
    fn insert(
        &self,
        session: &Session,
    ) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.uuid) {
            return Err(StorageError::AlreadyExists(session.uuid.clone()).into());
        }
        sessions.insert(session.uuid.clone(), session.clone());
        Ok(())
    }

    fn update(
        &self,
        session: &Session,
    ) -> Result<()> {
        match self.sessions.write().get_mut(&session.uuid) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(session.uuid.clone()).into()),
        }
    }

    fn delete(
        &self,
        uuid: &str,
    ) -> Result<()> {
        self.sessions.write().remove(uuid);
        Ok(())
    }

    fn list_stale(
        &self,
        max_last_seen: i64,
    ) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.last_seen < max_last_seen)
            .cloned()
            .collect())
    }
}

impl UpdateLogRepository for MemoryStorage {
    fn append(
        &self,
        update: &NodeUpdate,
    ) -> Result<()> {
        self.updates.write().push(update.clone());
        Ok(())
    }

    fn query_updates(
        &self,
        exclude_broker: u32,
        since: i64,
    ) -> Result<Vec<NodeUpdate>> {
        Ok(self
            .updates
            .read()
            .iter()
            .filter(|u| u.timestamp >= since && u.origin_broker != exclude_broker)
            .cloned()
            .collect())
    }

    fn delete_older_than(
        &self,
        timestamp: i64,
    ) -> Result<usize> {
        let mut updates = self.updates.write();
        let before = updates.len();
        updates.retain(|u| u.timestamp >= timestamp);
        Ok(before - updates.len())
    }
}
