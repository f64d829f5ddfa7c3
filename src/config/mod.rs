//! Broker configuration.
//!
//! Sources are merged in this order, later ones winning:
//! 1. Built-in defaults
//! 2. The file named by `CONFIG_PATH`, if set
//! 3. `KEEPER__<SECTION>__<FIELD>` environment variables
//!
//! Nothing is validated while loading; call [`KeeperConfig::validate`] once
//! every override has been applied.

mod broker;
mod monitoring;
mod propagation;
mod session;
mod storage;
mod watch;

pub use broker::*;
pub use monitoring::*;
pub use propagation::*;
pub use session::*;
pub use storage::*;
pub use watch::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "KEEPER";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KeeperConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl KeeperConfig {
    /// Loads defaults, the `CONFIG_PATH` file and environment variables.
    ///
    /// ```ignore
    /// std::env::set_var("KEEPER__BROKER__BROKER_ID", "2");
    /// let cfg = KeeperConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Merges another file over the current values. Environment variables
    /// still win.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(self) -> Result<Self> {
        self.broker.validate()?;
        self.session.validate()?;
        self.propagation.validate()?;
        self.storage.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
