use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    /// Stable identity of this broker. Stamped into session ids (top byte)
    /// and update log records, so it must stay the same across restarts.
    #[serde(default = "default_broker_id")]
    pub broker_id: u32,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_id: default_broker_id(),
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broker_id == 0 {
            return Err(Error::InvalidConfig("broker_id cannot be 0".into()));
        }
        if self.broker_id > u8::MAX as u32 {
            return Err(Error::InvalidConfig(format!(
                "broker_id {} does not fit in the session id prefix (max {})",
                self.broker_id,
                u8::MAX
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("data_dir cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_broker_id() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
