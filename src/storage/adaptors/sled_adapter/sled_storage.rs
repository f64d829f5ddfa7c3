//! sled backend.
//!
//! Layout, one tree per table:
//! - `_nodes`: path -> bincode(Node)
//! - `_ephemerals`: session_id (BE) ++ path -> ()
//! - `_sessions`: uuid -> bincode(Session)
//! - `_update_log`: timestamp (BE) ++ broker (BE) ++ unique id -> bincode(NodeUpdate)
//!
//! Conditional writes are compare-and-swap loops on the stored bytes. A
//! swap that loses to an unrelated change (e.g. a cversion bump) re-reads
//! and re-checks.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Batch;
use sled::IVec;
use sled::Tree;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::super::child_names;
use super::super::child_prefix;
use crate::constants::EPHEMERAL_INDEX_TREE;
use crate::constants::NODE_TREE;
use crate::constants::ROOT_PATH;
use crate::constants::SESSION_TREE;
use crate::constants::UPDATE_LOG_TREE;
use crate::utils::time::now_ms;
use crate::CreateMode;
use crate::Error;
use crate::Node;
use crate::NodeRepository;
use crate::NodeUpdate;
use crate::Result;
use crate::Session;
use crate::SessionRepository;
use crate::StorageError;
use crate::UpdateLogRepository;

pub struct SledStorage {
    db: sled::Db,
    nodes: Tree,
    ephemerals: Tree,
    sessions: Tree,
    update_log: Tree,
}

impl std::fmt::Debug for SledStorage {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStorage")
            .field("nodes", &self.nodes.len())
            .field("sessions", &self.sessions.len())
            .field("update_log", &self.update_log.len())
            .finish()
    }
}

impl Drop for SledStorage {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush sled storage: {}", e);
        }
    }
}

impl SledStorage {
    /// Opens (or creates) the database under `path` and makes sure the root
    /// node exists.
    pub fn open(
        path: impl AsRef<Path> + std::fmt::Debug,
        cache_capacity: u64,
    ) -> Result<Self> {
        debug!("open sled storage from path: {:?}", &path);

        let db = sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(cache_capacity)
            .flush_every_ms(Some(10))
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
                Error::from(e)
            })?;

        Self::from_db(db)
    }

    /// Uses an already opened database, e.g. a temporary one in tests.
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let storage = Self {
            nodes: db.open_tree(NODE_TREE)?,
            ephemerals: db.open_tree(EPHEMERAL_INDEX_TREE)?,
            sessions: db.open_tree(SESSION_TREE)?,
            update_log: db.open_tree(UPDATE_LOG_TREE)?,
            db,
        };

        let root = Node::new(ROOT_PATH, None, CreateMode::Persistent, 0, now_ms());
        if storage
            .nodes
            .compare_and_swap(ROOT_PATH, None::<&[u8]>, Some(encode(&root)?))?
            .is_ok()
        {
            debug!("sled storage initialized with root node");
        }
        Ok(storage)
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    fn children(
        &self,
        parent: &str,
    ) -> Result<std::collections::BTreeSet<String>> {
        let mut paths = Vec::new();
        for entry in self.nodes.scan_prefix(child_prefix(parent)) {
            let (key, _) = entry?;
            paths.push(utf8(&key, NODE_TREE)?);
        }
        Ok(child_names(parent, paths.iter().map(String::as_str)))
    }

    /// Reads, transforms and swaps a node until the swap sticks. `f`
    /// returning `None` aborts without writing.
    fn swap_node(
        &self,
        path: &str,
        mut f: impl FnMut(Node) -> Result<Option<Node>>,
    ) -> Result<Option<Node>> {
        loop {
            let Some(old) = self.nodes.get(path)? else {
                return Ok(None);
            };
            let Some(new) = f(decode(&old)?)? else {
                return Ok(None);
            };
            let swapped = self
                .nodes
                .compare_and_swap(path, Some(&old), Some(encode(&new)?))?;
            match swapped {
                Ok(()) => return Ok(Some(new)),
                Err(_) => trace!(path, "sled: node changed concurrently, retrying"),
            }
        }
    }
}

impl NodeRepository for SledStorage {
    fn create(
        &self,
        node: Node,
    ) -> Result<()> {
        let swapped = self
            .nodes
            .compare_and_swap(&node.path, None::<&[u8]>, Some(encode(&node)?))?;
        if swapped.is_err() {
            return Err(StorageError::AlreadyExists(node.path).into());
        }

        if node.is_ephemeral() {
            self.ephemerals
                .insert(ephemeral_key(node.stat.ephemeral_owner, &node.path), IVec::default())?;
        }
        Ok(())
    }

    fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<usize> {
        loop {
            let Some(old) = self.nodes.get(path)? else {
                return Ok(0);
            };
            let node: Node = decode(&old)?;
            if node.stat.version != version || !self.children(path)?.is_empty() {
                return Ok(0);
            }

            if self
                .nodes
                .compare_and_swap(path, Some(&old), None::<&[u8]>)?
                .is_ok()
            {
                if node.is_ephemeral() {
                    self.ephemerals
                        .remove(ephemeral_key(node.stat.ephemeral_owner, path))?;
                }
                return Ok(1);
            }
        }
    }

    fn get(
        &self,
        path: &str,
    ) -> Result<Node> {
        let bytes = self
            .nodes
            .get(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let node: Node = decode(&bytes)?;
        Ok(node.with_children(self.children(path)?))
    }

    fn update_data(
        &self,
        path: &str,
        data: Option<Vec<u8>>,
        version: i32,
        mtime: i64,
    ) -> Result<usize> {
        let updated = self.swap_node(path, |mut node| {
            if node.stat.version != version {
                return Ok(None);
            }
            node.stat.data_length = data.as_ref().map(|d| d.len() as i32).unwrap_or(0);
            node.data = data.clone();
            node.stat.version = version + 1;
            node.stat.mtime = mtime;
            Ok(Some(node))
        })?;
        Ok(usize::from(updated.is_some()))
    }

    fn update_child_counter(
        &self,
        path: &str,
    ) -> Result<()> {
        let updated = self.swap_node(path, |mut node| {
            node.stat.cversion += 1;
            Ok(Some(node))
        })?;
        match updated {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(path.to_string()).into()),
        }
    }

    fn ephemeral_paths(
        &self,
        session_id: i64,
    ) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for entry in self.ephemerals.scan_prefix(session_id.to_be_bytes()) {
            let (key, _) = entry?;
            paths.push(utf8(&key[8..], EPHEMERAL_INDEX_TREE)?);
        }
        Ok(paths)
    }
}

impl SessionRepository for SledStorage {
    fn insert(
        &self,
        session: &Session,
    ) -> Result<()> {
        let swapped = self.sessions.compare_and_swap(
            &session.uuid,
            None::<&[u8]>,
            Some(encode(session)?),
        )?;
        if swapped.is_err() {
            return Err(StorageError::AlreadyExists(session.uuid.clone()).into());
        }
        Ok(())
    }

    fn update(
        &self,
        session: &Session,
    ) -> Result<()> {
        let encoded = encode(session)?;
        loop {
            let Some(old) = self.sessions.get(&session.uuid)? else {
                return Err(StorageError::NotFound(session.uuid.clone()).into());
            };
            if self
                .sessions
                .compare_and_swap(&session.uuid, Some(&old), Some(encoded.clone()))?
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn delete(
        &self,
        uuid: &str,
    ) -> Result<()> {
        self.sessions.remove(uuid)?;
        Ok(())
    }

    fn list_stale(
        &self,
        max_last_seen: i64,
    ) -> Result<Vec<Session>> {
        let mut stale = Vec::new();
        for entry in self.sessions.iter() {
            let (_, value) = entry?;
            let session: Session = decode(&value)?;
            if session.last_seen < max_last_seen {
                stale.push(session);
            }
        }
        Ok(stale)
    }
}

impl UpdateLogRepository for SledStorage {
    fn append(
        &self,
        update: &NodeUpdate,
    ) -> Result<()> {
        let mut key = Vec::with_capacity(20);
        key.extend_from_slice(&timestamp_key(update.timestamp));
        key.extend_from_slice(&update.origin_broker.to_be_bytes());
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());

        self.update_log.insert(key, encode(update)?)?;
        Ok(())
    }

    fn query_updates(
        &self,
        exclude_broker: u32,
        since: i64,
    ) -> Result<Vec<NodeUpdate>> {
        let mut updates = Vec::new();
        for entry in self.update_log.range(timestamp_key(since)..) {
            let (_, value) = entry?;
            let update: NodeUpdate = decode(&value)?;
            if update.origin_broker != exclude_broker {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    fn delete_older_than(
        &self,
        timestamp: i64,
    ) -> Result<usize> {
        let mut batch = Batch::default();
        let mut removed = 0;
        for entry in self.update_log.range(..timestamp_key(timestamp)) {
            let (key, _) = entry?;
            batch.remove(key);
            removed += 1;
        }
        self.update_log.apply_batch(batch)?;
        Ok(removed)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn utf8(
    bytes: &[u8],
    tree: &str,
) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        StorageError::DataCorruption {
            location: format!("non utf-8 key in {tree}"),
        }
        .into()
    })
}

fn ephemeral_key(
    session_id: i64,
    path: &str,
) -> Vec<u8> {
    let mut key = session_id.to_be_bytes().to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

/// Big-endian so byte order matches time order. Timestamps before the epoch
/// sort first.
fn timestamp_key(ts: i64) -> [u8; 8] {
    (ts.max(0) as u64).to_be_bytes()
}
