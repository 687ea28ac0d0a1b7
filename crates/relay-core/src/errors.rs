//! Shared error types.

use thiserror::Error;

/// Transport-level failure while sending to or closing a peer channel.
///
/// These never escape the session manager: a failed transmit is treated as
/// an implicit disconnect and the frame is queued for replay. The variants
/// exist so the manager can log what actually went wrong.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer channel is closed (writer task gone or socket dropped).
    #[error("transport channel closed")]
    Closed,

    /// The peer channel's buffer is full (client not draining).
    #[error("transport channel full")]
    Full,

    /// The frame could not be serialized for the wire.
    #[error("frame serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
