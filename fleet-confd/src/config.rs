//! Daemon configuration, loaded from TOML with `#[serde(default = ...)]`
//! per field so a near-empty config file is valid, in the same layered
//! style as `ClusterConfig` elsewhere in this workspace's lineage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfdConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_idle_poll_rounds")]
    pub max_idle_poll_rounds: u32,

    #[serde(default = "default_reload_ratelimit_ms")]
    pub reload_ratelimit_ms: u64,

    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// Path to a file containing the shared HMAC signing key, never the
    /// key material itself — the config is logged freely, the key never
    /// is.
    #[serde(default = "default_hmac_key_path")]
    pub hmac_key_path: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0:1814".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleet-confd")
}

fn default_watch_interval_secs() -> u64 {
    15 * 60
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_idle_poll_rounds() -> u32 {
    3
}

fn default_reload_ratelimit_ms() -> u64 {
    1000
}

fn default_clock_skew_secs() -> u64 {
    300
}

fn default_handler_timeout_ms() -> u64 {
    50
}

fn default_max_file_size_bytes() -> u64 {
    128 * 1024
}

fn default_hmac_key_path() -> PathBuf {
    PathBuf::from("/var/lib/fleet-confd/hmac.key")
}

impl Default for ConfdConfig {
    fn default() -> Self {
        ConfdConfig {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            watch_interval_secs: default_watch_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_idle_poll_rounds: default_max_idle_poll_rounds(),
            reload_ratelimit_ms: default_reload_ratelimit_ms(),
            clock_skew_secs: default_clock_skew_secs(),
            handler_timeout_ms: default_handler_timeout_ms(),
            max_file_size_bytes: default_max_file_size_bytes(),
            hmac_key_path: default_hmac_key_path(),
        }
    }
}

impl ConfdConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, crate::error::Error> {
        toml::from_str(input).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reload_ratelimit(&self) -> Duration {
        Duration::from_millis(self.reload_ratelimit_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("cluster.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_all_defaults() {
        let cfg = ConfdConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:1814");
        assert_eq!(cfg.max_file_size_bytes, 128 * 1024);
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let cfg = ConfdConfig::from_toml_str("poll_interval_ms = 500\n").unwrap();
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.watch_interval_secs, default_watch_interval_secs());
    }
}
