//! Test doubles shared by the websocket module's unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::TransportError;
use relay_core::frame::OutboundFrame;

use super::transport::SessionTransport;

/// Transport that records transmitted frames and can be told to fail
/// after a fixed number of successes.
pub struct RecordingTransport {
    frames: Mutex<Vec<OutboundFrame>>,
    remaining_ok: Mutex<Option<usize>>,
    closed: Mutex<bool>,
}

impl RecordingTransport {
    /// Always-succeeding transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            remaining_ok: Mutex::new(None),
            closed: Mutex::new(false),
        })
    }

    /// Succeed `n` times, then fail every transmit.
    pub fn fail_after(n: usize) -> Arc<Self> {
        let t = Self::new();
        *t.remaining_ok.lock() = Some(n);
        t
    }

    /// Fail every transmit.
    pub fn failing() -> Arc<Self> {
        Self::fail_after(0)
    }

    /// Everything transmitted so far, in order.
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    /// Message IDs of everything transmitted so far.
    pub fn message_ids(&self) -> Vec<Option<u64>> {
        self.frames().into_iter().map(|f| f.message_id).collect()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn transmit(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        {
            let mut remaining = self.remaining_ok.lock();
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    return Err(TransportError::Closed);
                }
                *n -= 1;
            }
        }
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        *self.closed.lock() = true;
        Ok(())
    }
}
