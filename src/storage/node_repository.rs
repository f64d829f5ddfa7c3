#[cfg(test)]
use mockall::automock;

use crate::Node;
use crate::Result;

/// Node persistence.
///
/// Conditional writes report the number of affected records instead of an
/// error so the caller can tell a lost race from a missing node.
#[cfg_attr(test, automock)]
pub trait NodeRepository: Send + Sync + 'static {
    /// Inserts a node at `node.path`.
    ///
    /// Fails with `StorageError::AlreadyExists` if the path is taken.
    fn create(
        &self,
        node: Node,
    ) -> Result<()>;

    /// Removes the node if its version still equals `version` and it has
    /// no children. Returns the number of removed records (0 or 1).
    fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<usize>;

    /// Reads a node with its child names populated.
    ///
    /// Fails with `StorageError::NotFound` if the path does not exist.
    fn get(
        &self,
        path: &str,
    ) -> Result<Node>;

    /// Replaces data if the stored version equals `version`, storing
    /// `version + 1` and `mtime`. Returns the number of updated records.
    fn update_data(
        &self,
        path: &str,
        data: Option<Vec<u8>>,
        version: i32,
        mtime: i64,
    ) -> Result<usize>;

    /// Increments the child-set version of `path` by one.
    fn update_child_counter(
        &self,
        path: &str,
    ) -> Result<()>;

    /// Paths of every ephemeral node owned by the session
    fn ephemeral_paths(
        &self,
        session_id: i64,
    ) -> Result<Vec<String>>;
}
