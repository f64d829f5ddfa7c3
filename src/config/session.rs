use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Heartbeats run every half timeout, sweeps every timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// A session is stale after this many timeouts without a heartbeat
    #[serde(default = "default_stale_multiplier")]
    pub stale_multiplier: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            stale_multiplier: default_stale_multiplier(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms < 2 {
            return Err(Error::InvalidConfig(format!(
                "session timeout_ms {} too small",
                self.timeout_ms
            )));
        }
        if self.stale_multiplier == 0 {
            return Err(Error::InvalidConfig("stale_multiplier must be at least 1".into()));
        }
        Ok(())
    }
}

fn default_timeout_ms() -> u64 {
    6000
}
fn default_stale_multiplier() -> u32 {
    3
}
