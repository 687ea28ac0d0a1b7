//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Messages delivered directly over a live transport (counter).
pub const MESSAGES_DELIVERED_TOTAL: &str = "messages_delivered_total";
/// Messages appended to a delivery queue (counter).
pub const MESSAGES_QUEUED_TOTAL: &str = "messages_queued_total";
/// Messages retransmitted by replay (counter).
pub const MESSAGES_REPLAYED_TOTAL: &str = "messages_replayed_total";
/// Heartbeat frames sent (counter).
pub const HEARTBEATS_SENT_TOTAL: &str = "heartbeats_sent_total";
/// Sessions evicted by the heartbeat monitor (counter).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "heartbeat_evictions_total";
/// Session state records removed by retention cleanup (counter).
pub const SESSIONS_REAPED_TOTAL: &str = "sessions_reaped_total";
/// Frames dropped because an outbound channel was full (counter).
pub const TRANSPORT_DROPS_TOTAL: &str = "transport_drops_total";
