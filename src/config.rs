//! Environment-driven configuration

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_url: String,
    /// Optional; the service degrades to durable-store counting without it.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// How far ahead of `scheduled_at` a stream enters pre-live (seconds).
    #[serde(default = "default_pre_live_window_secs")]
    pub pre_live_window_secs: u64,
    #[serde(default = "default_pre_live_interval_secs")]
    pub pre_live_interval_secs: u64,
    #[serde(default = "default_viewer_count_interval_secs")]
    pub viewer_count_interval_secs: u64,
    #[serde(default = "default_finalize_interval_secs")]
    pub finalize_interval_secs: u64,
    /// Grace window a stream spends in `ending` before finalization (seconds).
    #[serde(default = "default_ending_grace_secs")]
    pub ending_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pre_live_window(&self) -> Duration {
        Duration::from_secs(self.pre_live_window_secs)
    }

    pub fn ending_grace(&self) -> Duration {
        Duration::from_secs(self.ending_grace_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8094
}

fn default_pre_live_window_secs() -> u64 {
    30 * 60
}

fn default_pre_live_interval_secs() -> u64 {
    60
}

fn default_viewer_count_interval_secs() -> u64 {
    5
}

fn default_finalize_interval_secs() -> u64 {
    10
}

fn default_ending_grace_secs() -> u64 {
    5
}
