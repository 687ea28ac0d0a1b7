//! # relay-core
//!
//! Foundation types for the relay notification service.
//!
//! This crate provides the shared vocabulary the other relay crates depend on:
//!
//! - **Branded IDs**: `SessionId`, `PrincipalId`, `ConnectionId` as newtypes for type safety
//! - **Wire frames**: `OutboundFrame` (sequenced events, heartbeats) and
//!   `ControlFrame` (inbound `ack` / `heartbeat_response` / `reconnect`)
//! - **Errors**: `TransportError` via `thiserror`

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod ids;

pub use errors::TransportError;
pub use frame::{ControlFrame, OutboundFrame};
pub use ids::{ConnectionId, PrincipalId, SessionId};
