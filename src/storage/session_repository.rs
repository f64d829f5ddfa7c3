#[cfg(test)]
use mockall::automock;

use crate::Result;
use crate::Session;

#[cfg_attr(test, automock)]
pub trait SessionRepository: Send + Sync + 'static {
    fn insert(
        &self,
        session: &Session,
    ) -> Result<()>;

    /// Overwrites the stored record with the same uuid.
    ///
    /// Fails with `StorageError::NotFound` if it was removed meanwhile.
    fn update(
        &self,
        session: &Session,
    ) -> Result<()>;

    /// Removing a missing record is not an error.
    fn delete(
        &self,
        uuid: &str,
    ) -> Result<()>;

    /// Sessions last seen strictly before `max_last_seen`
    fn list_stale(
        &self,
        max_last_seen: i64,
    ) -> Result<Vec<Session>>;
}
