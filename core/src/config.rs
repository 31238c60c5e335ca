//! Plugin manager configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by all capability registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManagerConfig {
    /// Directory for plugin unix sockets and temp payload files.
    pub work_dir: PathBuf,

    /// How long to wait for a plugin to announce its listen address.
    pub connect_timeout_secs: u64,

    /// Overall budget for the health-check poll after address discovery.
    pub health_timeout_secs: u64,

    /// Health-check poll interval in milliseconds.
    pub health_interval_ms: u64,

    /// Optional idle timeout forwarded to plugins in their config.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("ocmr-plugins"),
            connect_timeout_secs: 30,
            health_timeout_secs: 5,
            health_interval_ms: 100,
            idle_timeout_secs: None,
        }
    }
}

impl PluginManagerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}
