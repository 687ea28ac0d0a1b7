//! Session connection manager: registry, delivery queue, acks, and replay.
//!
//! One [`SessionManager`] instance owns all per-session delivery state in a
//! single guarded table keyed by session id. Each entry aggregates the live
//! transport (at most one), retained metadata, the delivery queue, the ack
//! high-water mark, and the sequence counter, so a session can never be
//! half-present across parallel maps.
//!
//! Producers call [`SessionManager::broadcast_progress`] and only ever see
//! a delivered/queued boolean; transport faults are absorbed here as an
//! implicit disconnect. Transmission I/O never runs under the table lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_core::frame::{self, OutboundFrame};
use relay_core::{PrincipalId, SessionId};

use crate::metrics::{
    HEARTBEATS_SENT_TOTAL, HEARTBEAT_EVICTIONS_TOTAL, MESSAGES_DELIVERED_TOTAL,
    MESSAGES_QUEUED_TOTAL, MESSAGES_REPLAYED_TOTAL, SESSIONS_REAPED_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

use super::transport::SessionTransport;

/// Metadata for one session, retained across disconnects until cleanup.
#[derive(Clone, Debug)]
pub struct SessionMetadata {
    /// Principal that authenticated the most recent connect.
    pub principal_id: PrincipalId,
    /// Wall-clock time of the most recent connect.
    pub connected_at: DateTime<Utc>,
    /// Number of times this session has reconnected.
    pub reconnection_count: u32,
    connected_mono: Instant,
    last_heartbeat: Instant,
}

impl SessionMetadata {
    fn new(principal_id: PrincipalId) -> Self {
        let now = Instant::now();
        Self {
            principal_id,
            connected_at: Utc::now(),
            reconnection_count: 0,
            connected_mono: now,
            last_heartbeat: now,
        }
    }

    fn reset(&mut self, principal_id: PrincipalId) {
        let now = Instant::now();
        self.principal_id = principal_id;
        self.connected_at = Utc::now();
        self.reconnection_count += 1;
        self.connected_mono = now;
        self.last_heartbeat = now;
    }

    /// Time since the most recent connect.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_mono.elapsed()
    }

    /// Time since the last heartbeat refresh.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_heartbeat.elapsed()
    }
}

/// All delivery state for one session id.
struct SessionEntry {
    transport: Option<Arc<dyn SessionTransport>>,
    meta: Option<SessionMetadata>,
    queue: Vec<OutboundFrame>,
    last_ack: u64,
    seq: u64,
    created: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            transport: None,
            meta: None,
            queue: Vec::new(),
            last_ack: 0,
            seq: 0,
            created: Instant::now(),
        }
    }

    /// Age used by retention cleanup: since last connect, or since the
    /// entry was created if the session never connected.
    fn retention_age(&self) -> Duration {
        self.meta
            .as_ref()
            .map_or_else(|| self.created.elapsed(), SessionMetadata::age)
    }
}

/// Result of one heartbeat pass over all live sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Sessions that received a heartbeat frame.
    pub pinged: usize,
    /// Sessions evicted (idle timeout or transmit failure).
    pub evicted: usize,
}

/// Manages per-session connections, delivery queues, acks, and replay.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    /// Atomic mirror of the live-transport count (avoids read-locking for
    /// status queries).
    active_count: AtomicUsize,
}

impl SessionManager {
    /// Create a new, empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Register `transport` as the live transport for `session_id`.
    ///
    /// Any previous transport is superseded and closed best-effort.
    /// Metadata is created on first connect and reset (with the
    /// reconnection counter incremented) on later ones. A sequenced
    /// `connection_established` frame is sent through the normal send
    /// path, then queued messages are replayed.
    ///
    /// Transport-level failures are absorbed: this never raises to the
    /// caller.
    pub async fn connect(
        &self,
        session_id: &SessionId,
        transport: Arc<dyn SessionTransport>,
        principal_id: PrincipalId,
    ) {
        let superseded = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .entry(session_id.clone())
                .or_insert_with(SessionEntry::new);
            let superseded = entry.transport.replace(transport);
            match entry.meta.as_mut() {
                Some(meta) => meta.reset(principal_id),
                None => entry.meta = Some(SessionMetadata::new(principal_id)),
            }
            if superseded.is_none() {
                let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
            }
            superseded
        };

        if let Some(old) = superseded {
            debug!(session_id = %session_id, "superseding previous transport");
            if let Err(e) = old.close().await {
                warn!(session_id = %session_id, error = %e, "failed to close superseded transport");
            }
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.update_active_gauge();
        info!(session_id = %session_id, "session connected");

        let established = OutboundFrame::event(
            frame::CONNECTION_ESTABLISHED,
            serde_json::json!({
                "session_id": session_id.as_str(),
                "message": "connection established",
            }),
        );
        let _ = self.send(session_id, established).await;
        let _ = self.replay(session_id).await;
    }

    /// Remove the live transport for `session_id`, closing it best-effort.
    ///
    /// Metadata and the delivery queue are retained for a later reconnect;
    /// only [`SessionManager::cleanup`] forgets a session entirely.
    pub async fn disconnect(&self, session_id: &SessionId) {
        if let Some(transport) = self.take_transport(session_id, None).await {
            self.finish_disconnect(session_id, transport).await;
        }
    }

    /// Like [`SessionManager::disconnect`], but only if `transport` is
    /// still the registered one. Used by connection tasks on teardown so a
    /// superseded socket cannot tear down its replacement.
    pub async fn disconnect_if_current(
        &self,
        session_id: &SessionId,
        transport: &Arc<dyn SessionTransport>,
    ) {
        if let Some(current) = self.take_transport(session_id, Some(transport)).await {
            self.finish_disconnect(session_id, current).await;
        }
    }

    async fn take_transport(
        &self,
        session_id: &SessionId,
        only_if: Option<&Arc<dyn SessionTransport>>,
    ) -> Option<Arc<dyn SessionTransport>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(session_id)?;
        if let Some(expected) = only_if {
            let current = entry.transport.as_ref()?;
            if !Arc::ptr_eq(current, expected) {
                return None;
            }
        }
        let taken = entry.transport.take();
        if taken.is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
        taken
    }

    async fn finish_disconnect(
        &self,
        session_id: &SessionId,
        transport: Arc<dyn SessionTransport>,
    ) {
        if let Err(e) = transport.close().await {
            warn!(session_id = %session_id, error = %e, "error closing transport");
        }
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        self.update_active_gauge();
        info!(session_id = %session_id, "session disconnected");
    }

    /// Send one frame to a session, assigning its sequence number.
    ///
    /// Returns `true` if the frame was delivered over a live transport,
    /// `false` if it was queued (no connection, or the transmit failed and
    /// the session was implicitly disconnected). This boolean is the only
    /// outcome producers ever see.
    pub async fn send(&self, session_id: &SessionId, frame: OutboundFrame) -> bool {
        // Assign the sequence number under the lock; transmit outside it so
        // slow I/O on one session cannot stall the others.
        let (frame, transport) = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .entry(session_id.clone())
                .or_insert_with(SessionEntry::new);
            entry.seq += 1;
            (frame.with_message_id(entry.seq), entry.transport.clone())
        };

        let Some(transport) = transport else {
            self.enqueue(session_id, frame).await;
            return false;
        };

        match transport.transmit(&frame).await {
            Ok(()) => {
                counter!(MESSAGES_DELIVERED_TOTAL).increment(1);
                debug!(
                    session_id = %session_id,
                    message_id = frame.message_id,
                    kind = %frame.kind,
                    "message delivered"
                );
                true
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "transmit failed, disconnecting");
                self.disconnect_if_current(session_id, &transport).await;
                self.enqueue(session_id, frame).await;
                false
            }
        }
    }

    /// Build and send a progress event frame for the orchestration layer.
    pub async fn broadcast_progress(
        &self,
        session_id: &SessionId,
        event_type: &str,
        data: Value,
    ) -> bool {
        self.send(session_id, OutboundFrame::event(event_type, data))
            .await
    }

    async fn enqueue(&self, session_id: &SessionId, frame: OutboundFrame) {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(session_id.clone())
            .or_insert_with(SessionEntry::new);
        entry.queue.push(frame);
        counter!(MESSAGES_QUEUED_TOTAL).increment(1);
        debug!(session_id = %session_id, queued = entry.queue.len(), "message queued");
    }

    /// Retransmit queued frames newer than the ack high-water mark, in
    /// ascending sequence order. Returns the number transmitted.
    ///
    /// Frames at or below the high-water mark are dropped permanently.
    /// On a mid-stream transmit failure the untransmitted remainder is
    /// requeued for the next replay; without a live transport the queue is
    /// left untouched.
    pub async fn replay(&self, session_id: &SessionId) -> usize {
        let (pending, transport) = {
            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(session_id) else {
                return 0;
            };
            if entry.queue.is_empty() {
                return 0;
            }
            let Some(transport) = entry.transport.clone() else {
                return 0;
            };
            let last_ack = entry.last_ack;
            let mut pending: Vec<OutboundFrame> = std::mem::take(&mut entry.queue)
                .into_iter()
                .filter(|f| f.message_id.is_some_and(|id| id > last_ack))
                .collect();
            // Concurrent producers may have appended out of order; replay
            // order is by sequence number, not queue-arrival order.
            pending.sort_by_key(|f| f.message_id);
            (pending, transport)
        };

        let mut pending = pending;
        let mut replayed = 0;
        while replayed < pending.len() {
            if let Err(e) = transport.transmit(&pending[replayed]).await {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    replayed,
                    remaining = pending.len() - replayed,
                    "replay aborted mid-stream, requeueing remainder"
                );
                let remainder = pending.split_off(replayed);
                self.requeue(session_id, remainder).await;
                break;
            }
            replayed += 1;
        }

        if replayed > 0 {
            counter!(MESSAGES_REPLAYED_TOTAL).increment(replayed as u64);
            info!(session_id = %session_id, replayed, "replayed queued messages");
        }
        replayed
    }

    async fn requeue(&self, session_id: &SessionId, mut frames: Vec<OutboundFrame>) {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(session_id) else {
            return;
        };
        // Merge with anything queued while the replay was in flight.
        frames.append(&mut entry.queue);
        frames.sort_by_key(|f| f.message_id);
        entry.queue = frames;
    }

    /// Record that the client has received everything up to `message_id`.
    ///
    /// Idempotent: duplicate or out-of-order acks never lower the mark.
    /// Acks for unknown (or already cleaned up) sessions are ignored.
    pub async fn acknowledge(&self, session_id: &SessionId, message_id: u64) {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(session_id) else {
            debug!(session_id = %session_id, message_id, "ack for unknown session ignored");
            return;
        };
        if message_id > entry.last_ack {
            entry.last_ack = message_id;
        }
        debug!(session_id = %session_id, message_id, last_ack = entry.last_ack, "message acknowledged");
    }

    /// Stamp the session as alive (client answered a heartbeat).
    pub async fn refresh_heartbeat(&self, session_id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(meta) = sessions
            .get_mut(session_id)
            .and_then(|e| e.meta.as_mut())
        {
            meta.last_heartbeat = Instant::now();
        }
    }

    /// Whether a live transport exists for `session_id`.
    pub async fn is_connected(&self, session_id: &SessionId) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .is_some_and(|e| e.transport.is_some())
    }

    /// Metadata for a session, if it has ever connected.
    pub async fn metadata(&self, session_id: &SessionId) -> Option<SessionMetadata> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).and_then(|e| e.meta.clone())
    }

    /// Number of undelivered frames queued for a session.
    pub async fn queued_len(&self, session_id: &SessionId) -> usize {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map_or(0, |e| e.queue.len())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Remove all state for disconnected sessions older than `max_age`.
    ///
    /// This is the only path that fully forgets a session: metadata, queue,
    /// ack mark, and sequence counter all go. Returns the number removed.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session_id, entry| {
            if entry.transport.is_some() {
                return true;
            }
            if entry.retention_age() > max_age {
                info!(session_id = %session_id, "removing expired session state");
                false
            } else {
                true
            }
        });
        let removed = before - sessions.len();
        if removed > 0 {
            counter!(SESSIONS_REAPED_TOTAL).increment(removed as u64);
        }
        removed
    }

    /// One heartbeat pass: evict sessions silent beyond `idle_timeout`,
    /// ping the rest, refresh their liveness stamp on success.
    ///
    /// Per-session failures are contained — a dead transport evicts that
    /// session and the pass moves on. No lock is held across transport I/O.
    pub async fn heartbeat_pass(&self, idle_timeout: Duration) -> HeartbeatStats {
        let snapshot: Vec<(SessionId, Arc<dyn SessionTransport>, Duration)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter_map(|(id, entry)| {
                    let transport = entry.transport.clone()?;
                    let idle = entry.meta.as_ref()?.idle();
                    Some((id.clone(), transport, idle))
                })
                .collect()
        };

        let mut stats = HeartbeatStats::default();
        for (session_id, transport, idle) in snapshot {
            if idle > idle_timeout {
                warn!(
                    session_id = %session_id,
                    idle_secs = idle.as_secs(),
                    "evicting inactive session"
                );
                self.disconnect_if_current(&session_id, &transport).await;
                counter!(HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                stats.evicted += 1;
                continue;
            }
            match transport.transmit(&OutboundFrame::heartbeat()).await {
                Ok(()) => {
                    self.refresh_heartbeat(&session_id).await;
                    counter!(HEARTBEATS_SENT_TOTAL).increment(1);
                    stats.pinged += 1;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "heartbeat failed, evicting");
                    self.disconnect_if_current(&session_id, &transport).await;
                    counter!(HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                    stats.evicted += 1;
                }
            }
        }
        stats
    }

    fn update_active_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.active_count.load(Ordering::Relaxed) as f64);
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
