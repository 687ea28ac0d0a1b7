//! `RelayServer` — Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use relay_core::SessionId;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat::HeartbeatMonitor;
use crate::websocket::manager::SessionManager;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager for delivery and connection tracking.
    pub manager: Arc<SessionManager>,
    /// Token verifier guarding the WebSocket endpoint.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Per-connection outbound channel capacity.
    pub outbound_buffer: usize,
    /// Prometheus render handle, when metrics are installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The main relay server.
pub struct RelayServer {
    config: ServerConfig,
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server with its own session manager.
    #[must_use]
    pub fn new(config: ServerConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config,
            manager: Arc::new(SessionManager::new()),
            verifier,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Attach an installed Prometheus recorder handle for `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
            verifier: self.verifier.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            outbound_buffer: self.config.outbound_buffer,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/{session_id}", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Spawn the heartbeat monitor, governed by the shutdown token.
    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let monitor = HeartbeatMonitor::new(
            self.manager.clone(),
            Duration::from_secs(self.config.heartbeat_interval_secs),
            Duration::from_secs(self.config.idle_timeout_secs),
        );
        tokio::spawn(monitor.run(self.shutdown.token()))
    }

    /// Spawn the retention sweep: periodically forgets sessions that have
    /// been disconnected longer than the retention window.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let interval = Duration::from_secs(self.config.cleanup_interval_secs);
        let max_age = Duration::from_secs(self.config.retention_hours * 3600);
        let cancel = self.shutdown.token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.cleanup(max_age).await;
                        if removed > 0 {
                            info!(removed, "retention sweep removed expired sessions");
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Get the session manager.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.manager.connection_count();
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

/// GET /ws/{session_id}?token=...
///
/// Verifies the token before upgrading; the session manager only ever sees
/// already-authenticated principals.
async fn ws_handler(
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let session_id = SessionId::from_string(session_id);
    let principal_id = match state.verifier.verify(&query.token) {
        Ok(principal_id) => principal_id,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "rejecting websocket connection");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let manager = state.manager.clone();
    let shutdown = state.shutdown.token();
    let outbound_buffer = state.outbound_buffer;
    ws.on_upgrade(move |socket| {
        run_ws_session(
            socket,
            session_id,
            principal_id,
            manager,
            outbound_buffer,
            shutdown,
        )
    })
}
