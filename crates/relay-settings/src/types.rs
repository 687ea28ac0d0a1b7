//! Settings type definitions with compiled defaults.

use serde::{Deserialize, Serialize};

/// Root settings document (`~/.relay/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network and auth settings.
    pub server: ServerSettings,
    /// Delivery, heartbeat, and retention settings.
    pub delivery: DeliverySettings,
}

/// Server network and auth settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port.
    pub port: u16,
    /// HMAC secret for verifying client JWTs.
    pub token_secret: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            token_secret: "insecure-dev-secret".to_string(),
        }
    }
}

/// Delivery, heartbeat, and retention settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
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

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 300,
            retention_hours: 24,
            cleanup_interval_secs: 3600,
            outbound_buffer: 1024,
        }
    }
}
