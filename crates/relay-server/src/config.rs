//! Server configuration.

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8787`; `0` for auto-assign).
    pub port: u16,
    /// Seconds between heartbeat passes.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a session is evicted.
    pub idle_timeout_secs: u64,
    /// Hours a disconnected session's state is retained before cleanup.
    pub retention_hours: u64,
    /// Seconds between retention sweeps.
    pub cleanup_interval_secs: u64,
    /// Per-connection outbound channel capacity (frames).
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 300,
            retention_hours: 24,
            cleanup_interval_secs: 3600,
            outbound_buffer: 1024,
        }
    }
}

impl ServerConfig {
    /// Build a server config from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            heartbeat_interval_secs: settings.delivery.heartbeat_interval_secs,
            idle_timeout_secs: settings.delivery.idle_timeout_secs,
            retention_hours: settings.delivery.retention_hours,
            cleanup_interval_secs: settings.delivery.cleanup_interval_secs,
            outbound_buffer: settings.delivery.outbound_buffer,
        }
    }
}
