//! Coordination Engine Error Hierarchy
//!
//! Node-tree failures are kept apart from infrastructure failures so a
//! protocol layer can map the former to wire status codes (see
//! [`Error::code`]) while the latter stay internal.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Expected node-tree failures returned to callers of `NodeStore`
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Infrastructure-level failures (storage, background tasks, lifecycle)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable failures: the caller reached a state that must not exist
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Version mismatch on {path}: expected {expected}")]
    BadVersion { path: String, expected: i32 },

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Ephemeral node can not have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Session id 0 marks persistent nodes, so it can not own one
    #[error("Ephemeral node needs an owning session: {0}")]
    EphemeralWithoutSession(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    /// Update log query failed; retried on the next poll
    #[error("Update log fetch failed: {0}")]
    TransientFetchFailure(String),

    /// Lifecycle method invoked in the wrong state
    #[error("Illegal state: expected {expected}, found {actual}")]
    IllegalState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Failed to send shutdown signal: {0}")]
    ShutdownSignal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Record addressed by key is missing
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Insert collided with an existing record
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(#[from] sled::Error),

    /// Serialization failures for persisted data
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },
}

/// ZooKeeper status codes used by protocol layers
pub mod codes {
    pub const OK: i32 = 0;
    pub const SYSTEM_ERROR: i32 = -1;
    pub const BAD_ARGUMENTS: i32 = -8;
    pub const NO_NODE: i32 = -101;
    pub const BAD_VERSION: i32 = -103;
    pub const NO_CHILDREN_FOR_EPHEMERALS: i32 = -108;
    pub const NODE_EXISTS: i32 = -110;
    pub const NOT_EMPTY: i32 = -111;
}

impl Error {
    /// Wire-level status code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Error::Node(e) => e.code(),
            _ => codes::SYSTEM_ERROR,
        }
    }

    /// Returns the node-tree failure, if this is one.
    pub fn as_node_error(&self) -> Option<&NodeError> {
        match self {
            Error::Node(e) => Some(e),
            _ => None,
        }
    }
}

impl NodeError {
    pub fn code(&self) -> i32 {
        match self {
            NodeError::NoNode(_) => codes::NO_NODE,
            NodeError::NodeExists(_) => codes::NODE_EXISTS,
            NodeError::BadVersion { .. } => codes::BAD_VERSION,
            NodeError::NotEmpty(_) => codes::NOT_EMPTY,
            NodeError::NoChildrenForEphemerals(_) => codes::NO_CHILDREN_FOR_EPHEMERALS,
            NodeError::InvalidPath { .. } | NodeError::EphemeralWithoutSession(_) => codes::BAD_ARGUMENTS,
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        StorageError::DbError(e).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        StorageError::BincodeError(e).into()
    }
}
