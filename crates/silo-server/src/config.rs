//! Server configuration from the environment.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for `silod`, read from `SILO_*` environment variables
/// (e.g. `SILO_CAS_BUCKET`, `SILO_LISTEN`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bucket for the content-addressable store namespace.
    pub cas_bucket: String,
    #[serde(default)]
    pub cas_prefix: String,
    /// Bucket for the action cache namespace.
    pub ac_bucket: String,
    #[serde(default)]
    pub ac_prefix: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Per-request timeout; unset means no deadline.
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl ServerConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("SILO").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
