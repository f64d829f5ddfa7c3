// -
// Node tree

pub const ROOT_PATH: &str = "/";

/// Digits of the sequence appended to sequential node names
pub const SEQUENTIAL_SUFFIX_WIDTH: usize = 10;

/// Version argument meaning "any version"
pub const ANY_VERSION: i32 = -1;

// -
// Database namespaces

/// Sled tree namespaces
pub(crate) const NODE_TREE: &str = "_nodes";
pub(crate) const EPHEMERAL_INDEX_TREE: &str = "_ephemerals";
pub(crate) const SESSION_TREE: &str = "_sessions";
pub(crate) const UPDATE_LOG_TREE: &str = "_update_log";

/// Sled db directory under the broker data dir
pub(crate) const SLED_DB_DIR: &str = "keeper_db";
