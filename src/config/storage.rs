use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit
    Memory,
    Sled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Bytes
    #[serde(default = "default_sled_cache_capacity")]
    pub sled_cache_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sled_cache_capacity: default_sled_cache_capacity(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend == StorageBackend::Sled && self.sled_cache_capacity == 0 {
            return Err(Error::InvalidConfig("sled_cache_capacity cannot be 0".into()));
        }
        Ok(())
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sled
}
fn default_sled_cache_capacity() -> u64 {
    64 * 1024 * 1024
}
