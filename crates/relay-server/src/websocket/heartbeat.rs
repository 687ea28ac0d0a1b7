//! Periodic heartbeat loop: pings live sessions, evicts the silent.
//!
//! One monitor runs per [`SessionManager`] instance for the life of the
//! process, cancellable through the shutdown token. Each tick delegates to
//! [`SessionManager::heartbeat_pass`], which isolates per-session failures;
//! the pass itself runs in a spawned task so even a panic inside it is
//! caught here as a loop-level error and followed by a short backoff
//! instead of killing the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::manager::SessionManager;

/// Delay before the next pass after a loop-level failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Periodic liveness monitor for all of a manager's sessions.
pub struct HeartbeatMonitor {
    manager: Arc<SessionManager>,
    interval: Duration,
    idle_timeout: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor pinging every `interval` and evicting sessions
    /// silent longer than `idle_timeout`.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            manager,
            interval,
            idle_timeout,
        }
    }

    /// Run until `cancel` fires. The sleep between passes holds no locks;
    /// cancellation abandons any in-flight pass without retry.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // interval fires immediately on creation; skip that tick so the
        // first pass lands one full interval after startup.
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let manager = Arc::clone(&self.manager);
                    let idle_timeout = self.idle_timeout;
                    let pass = tokio::spawn(async move {
                        manager.heartbeat_pass(idle_timeout).await
                    });
                    match pass.await {
                        Ok(stats) => {
                            if stats.pinged > 0 || stats.evicted > 0 {
                                debug!(
                                    pinged = stats.pinged,
                                    evicted = stats.evicted,
                                    "heartbeat pass complete"
                                );
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "heartbeat pass failed");
                            tokio::select! {
                                () = time::sleep(ERROR_BACKOFF) => {}
                                () = cancel.cancelled() => break,
                            }
                        }
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::test_support::RecordingTransport;
    use relay_core::frame;
    use relay_core::{PrincipalId, SessionId};

    fn monitor(manager: &Arc<SessionManager>, interval_secs: u64) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            Arc::clone(manager),
            Duration::from_secs(interval_secs),
            Duration::from_secs(300),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_follow_the_configured_cadence() {
        let manager = Arc::new(SessionManager::new());
        let id = SessionId::from("r1");
        let transport = RecordingTransport::new();
        manager
            .connect(&id, transport.clone(), PrincipalId::from("u1"))
            .await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&manager, 30).run(cancel.clone()));

        // Ticks land at 30, 60, and 90 seconds; 95 seconds covers three.
        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        handle.await.unwrap();

        let heartbeats: Vec<_> = transport
            .frames()
            .into_iter()
            .filter(|f| f.kind == frame::HEARTBEAT)
            .collect();
        assert_eq!(heartbeats.len(), 3);
        assert!(heartbeats.iter().all(|f| f.message_id.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn session_idle_beyond_timeout_is_evicted() {
        let manager = Arc::new(SessionManager::new());
        let id = SessionId::from("r1");
        let transport = RecordingTransport::new();
        manager
            .connect(&id, transport.clone(), PrincipalId::from("u1"))
            .await;

        // Let the session go silent past the timeout before the monitor
        // starts, so the first pass sees it as dead.
        tokio::time::sleep(Duration::from_secs(301)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&manager, 30).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(!manager.is_connected(&id).await);
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_session_does_not_block_heartbeats_to_others() {
        let manager = Arc::new(SessionManager::new());
        let healthy = RecordingTransport::new();
        // connection_established succeeds, every later transmit fails
        let broken = RecordingTransport::fail_after(1);
        manager
            .connect(&SessionId::from("ok"), healthy.clone(), PrincipalId::from("u1"))
            .await;
        manager
            .connect(&SessionId::from("bad"), broken, PrincipalId::from("u2"))
            .await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&manager, 30).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(!manager.is_connected(&SessionId::from("bad")).await);
        assert!(manager.is_connected(&SessionId::from("ok")).await);
        let kinds: Vec<_> = healthy
            .frames()
            .into_iter()
            .map(|f| f.kind)
            .collect();
        assert!(kinds.contains(&frame::HEARTBEAT.to_owned()));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let manager = Arc::new(SessionManager::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&manager, 3600).run(cancel.clone()));

        cancel.cancel();
        // Must unwind promptly, not wait out the interval
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop on cancellation")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_heartbeat_before_the_first_interval_elapses() {
        let manager = Arc::new(SessionManager::new());
        let id = SessionId::from("r1");
        let transport = RecordingTransport::new();
        manager
            .connect(&id, transport.clone(), PrincipalId::from("u1"))
            .await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&manager, 30).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(29)).await;
        cancel.cancel();
        handle.await.unwrap();

        let heartbeats = transport
            .frames()
            .into_iter()
            .filter(|f| f.kind == frame::HEARTBEAT)
            .count();
        assert_eq!(heartbeats, 0);
    }
}
