//! Transport seam between the session manager and socket I/O.
//!
//! The manager owns *which* transport is live per session, but not the
//! socket itself: it only sees [`SessionTransport`]. The production
//! implementation, [`ChannelTransport`], hands frames to the connection's
//! writer task over an mpsc channel, so a transmit here never blocks on
//! the network — a full or closed channel surfaces immediately as an
//! error and the manager treats it as a disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_core::frame::OutboundFrame;
use relay_core::{ConnectionId, TransportError};

use crate::metrics::TRANSPORT_DROPS_TOTAL;

/// One session's live delivery channel.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Serialize and transmit one frame to the peer.
    async fn transmit(&self, frame: &OutboundFrame) -> Result<(), TransportError>;

    /// Close the channel. Idempotent; the peer's tasks observe the close
    /// and unwind on their own.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Transport over an mpsc channel drained by the connection's writer task.
pub struct ChannelTransport {
    /// Unique ID of the underlying connection.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    dropped: AtomicU64,
}

impl ChannelTransport {
    /// Create a transport feeding the given writer channel.
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            closed: CancellationToken::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Token cancelled when the manager closes this transport. The writer
    /// and reader tasks select on it to unwind.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether the transport has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Frames dropped because the writer channel was full.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionTransport for ChannelTransport {
    async fn transmit(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(frame)?;
        match self.tx.try_send(Arc::new(json)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(TRANSPORT_DROPS_TOTAL).increment(1);
                Err(TransportError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}
