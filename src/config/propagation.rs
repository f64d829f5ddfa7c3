use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PropagationConfig {
    /// Update log poll period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_compaction_interval_ms")]
    pub compaction_interval_ms: u64,

    /// Minimum age before an update log record may be compacted
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            compaction_interval_ms: default_compaction_interval_ms(),
            retention_ms: default_retention_ms(),
        }
    }
}

impl PropagationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_millis(self.compaction_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        if self.compaction_interval_ms == 0 {
            return Err(Error::InvalidConfig("compaction_interval_ms must be > 0".into()));
        }
        // peers polling slower than the retention window would miss records
        if self.retention_ms <= self.poll_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "retention_ms {} must exceed poll_interval_ms {}",
                self.retention_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_compaction_interval_ms() -> u64 {
    60_000
}
fn default_retention_ms() -> u64 {
    600_000
}
