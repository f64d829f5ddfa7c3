#[cfg(test)]
use mockall::automock;

use crate::NodeUpdate;
use crate::Result;

/// Shared change log brokers use to learn about each other's writes.
#[cfg_attr(test, automock)]
pub trait UpdateLogRepository: Send + Sync + 'static {
    fn append(
        &self,
        update: &NodeUpdate,
    ) -> Result<()>;

    /// Records with `timestamp >= since` not written by `exclude_broker`,
    /// in no particular order.
    fn query_updates(
        &self,
        exclude_broker: u32,
        since: i64,
    ) -> Result<Vec<NodeUpdate>>;

    /// Removes records with `timestamp < timestamp`. Returns how many.
    fn delete_older_than(
        &self,
        timestamp: i64,
    ) -> Result<usize>;
}
