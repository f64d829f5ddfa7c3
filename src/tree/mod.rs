//! Versioned node tree.

mod node_store;
pub use node_store::*;

#[cfg(test)]
mod node_store_test;

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

/// How a node is created and how long it lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }

    /// ZooKeeper create flag
    pub fn flag(self) -> i32 {
        match self {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => 1,
            CreateMode::PersistentSequential => 2,
            CreateMode::EphemeralSequential => 3,
        }
    }

    pub fn from_flag(flag: i32) -> Option<Self> {
        match flag {
            0 => Some(CreateMode::Persistent),
            1 => Some(CreateMode::Ephemeral),
            2 => Some(CreateMode::PersistentSequential),
            3 => Some(CreateMode::EphemeralSequential),
            _ => None,
        }
    }
}

/// Node metadata returned by reads and writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Data writes since creation
    pub version: i32,
    /// Child creations and deletions since creation
    pub cversion: i32,
    /// Creation time, ms since epoch
    pub ctime: i64,
    /// Last data write, ms since epoch
    pub mtime: i64,
    /// Owning session for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    pub data: Option<Vec<u8>>,
    pub mode: CreateMode,
    pub stat: Stat,
    /// Immediate child names. Filled in by the repository on read.
    #[serde(skip)]
    pub children: BTreeSet<String>,
}

impl Node {
    /// A fresh node at version 0.
    pub fn new(
        path: impl Into<String>,
        data: Option<Vec<u8>>,
        mode: CreateMode,
        ephemeral_owner: i64,
        now: i64,
    ) -> Self {
        let data_length = data.as_ref().map(|d| d.len() as i32).unwrap_or(0);
        Self {
            path: path.into(),
            data,
            mode,
            stat: Stat {
                version: 0,
                cversion: 0,
                ctime: now,
                mtime: now,
                ephemeral_owner,
                data_length,
                num_children: 0,
            },
            children: BTreeSet::new(),
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.mode.is_ephemeral()
    }

    /// Replaces the child set and keeps `num_children` in step.
    pub fn with_children(
        mut self,
        children: BTreeSet<String>,
    ) -> Self {
        self.stat.num_children = children.len() as i32;
        self.children = children;
        self
    }
}
