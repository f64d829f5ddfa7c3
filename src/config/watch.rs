use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Keep a session's watches across a disconnect so the client can
    /// re-arm them. When off, any non-connected state drops them.
    #[serde(default = "default_auto_watch_reset")]
    pub auto_watch_reset: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            auto_watch_reset: default_auto_watch_reset(),
        }
    }
}

fn default_auto_watch_reset() -> bool {
    true
}
