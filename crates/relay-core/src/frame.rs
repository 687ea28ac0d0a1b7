//! Wire frame types for the relay WebSocket protocol.
//!
//! [`OutboundFrame`] is everything the server pushes to a client: progress
//! events, the synthetic `connection_established` notice, and heartbeats.
//! Sequenced frames carry a `message_id`; heartbeats do not (they are never
//! queued or replayed). [`ControlFrame`] covers the three inbound frame
//! types the server interprets; anything else is ignored.
//!
//! These types are the wire format — clients depend on the exact key
//! strings, so field renames here are breaking changes.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag of the synthetic frame sent after a successful connect.
pub const CONNECTION_ESTABLISHED: &str = "connection_established";

/// Type tag of liveness frames (unsequenced, never queued).
pub const HEARTBEAT: &str = "heartbeat";

/// A server-to-client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Event type tag (`"heartbeat"`, `"connection_established"`, or a
    /// producer-supplied progress event type).
    #[serde(rename = "type")]
    pub kind: String,
    /// RFC 3339 timestamp taken when the frame was built.
    pub timestamp: String,
    /// Opaque event payload. Absent on heartbeats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Per-session sequence number. Present on every frame that went
    /// through the sequenced send path; absent on heartbeats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u64>,
}

impl OutboundFrame {
    /// Build an event frame with the current timestamp and no sequence
    /// number yet (the session manager assigns one at send time).
    #[must_use]
    pub fn event(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: now_rfc3339(),
            data: Some(data),
            message_id: None,
        }
    }

    /// Build an unsequenced heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self {
            kind: HEARTBEAT.to_owned(),
            timestamp: now_rfc3339(),
            data: None,
            message_id: None,
        }
    }

    /// Attach the assigned sequence number.
    #[must_use]
    pub fn with_message_id(mut self, message_id: u64) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

/// Current time as RFC 3339 with millisecond precision.
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A client-to-server control frame.
///
/// Tagged by the `type` key; unrecognized types fail to parse and are
/// dropped by the session loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Client confirms receipt of every frame up to `message_id`.
    Ack {
        /// Highest sequence number the client has received.
        message_id: u64,
    },
    /// Client answers a server heartbeat.
    HeartbeatResponse,
    /// Client asks for a replay of queued frames without reconnecting.
    Reconnect,
}
