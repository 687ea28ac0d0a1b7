//! # relay-server
//!
//! Axum HTTP + `WebSocket` server and per-session event delivery.
//!
//! - `WebSocket` gateway: one live connection per session, token-verified
//!   before upgrade, inbound `ack` / `heartbeat_response` / `reconnect`
//!   control frames
//! - Session manager: delivery queue, ack high-water mark, replay on
//!   reconnect
//! - Heartbeat monitor: periodic pings, eviction of silent peers
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
