//! The session hub: the authoritative in-memory registry of live peer
//! connections.
//!
//! Two maps — devices keyed by device id, dashboards keyed by session id —
//! plus process-wide counters. All mutation goes through the single
//! `RwLock`; callers take the handles they need and release the lock before
//! touching the Store or a transport (a send on a released handle may fail
//! because the session was concurrently dropped, which surfaces as the
//! `not connected` command outcome).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Close code sent to a device session displaced by a newer join.
pub const CLOSE_SUPERSEDED: u16 = 4001;
/// Close code sent to a session evicted by the stale sweeper.
pub const CLOSE_STALE: u16 = 4002;

pub type SessionId = u64;

/// Outbound handle for one live connection. Writes are non-blocking: a full
/// channel counts as a failed delivery, same as a closed one.
#[derive(Clone)]
pub struct SessionSender {
    tx: mpsc::Sender<Message>,
}

impl SessionSender {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Returns `true` if the message was accepted for delivery.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Push a close frame; the session task drains it and tears down.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }
}

/// A live device connection bound by `device_join`.
pub struct DeviceSession {
    pub session_id: SessionId,
    pub device_id: String,
    pub addr: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub reconnect_count: u32,
    pub sender: SessionSender,
}

/// A live dashboard connection bound by `frontend_join`.
pub struct DashboardSession {
    pub session_id: SessionId,
    pub addr: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sender: SessionSender,
}

struct HubInner {
    devices: HashMap<String, DeviceSession>,
    dashboards: HashMap<SessionId, DashboardSession>,
    /// Connections ever opened, bound or not.
    total_ever: u64,
    /// Currently open transports, bound or not.
    active: u64,
}

/// Result of admitting a device session.
pub struct AdmitResult {
    pub reconnect_count: u32,
    /// An older session for the same device id was evicted.
    pub superseded: bool,
}

/// A device session evicted by [`SessionHub::sweep`].
pub struct SweptSession {
    pub device_id: String,
    pub session_id: SessionId,
    pub addr: String,
}

/// Per-device-session detail for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSessionInfo {
    pub device_id: String,
    pub addr: String,
    pub joined_at: String,
    pub last_seen: String,
    pub reconnect_count: u32,
}

/// Point-in-time view of the hub for `/health` and `/api/debug/connections`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub device_sessions: Vec<DeviceSessionInfo>,
    pub dashboard_count: usize,
    pub started_at: String,
}

/// The in-memory registry of live sessions. All other components reach
/// sessions exclusively through this interface.
pub struct SessionHub {
    inner: RwLock<HubInner>,
    started_at: DateTime<Utc>,
}

impl SessionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HubInner {
                devices: HashMap::new(),
                dashboards: HashMap::new(),
                total_ever: 0,
                active: 0,
            }),
            started_at: Utc::now(),
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// A transport opened; the session is not yet bound to a role.
    pub async fn connection_opened(&self) {
        let mut inner = self.inner.write().await;
        inner.total_ever += 1;
        inner.active += 1;
    }

    /// A transport closed (bound or not).
    pub async fn connection_closed(&self) {
        let mut inner = self.inner.write().await;
        inner.active = inner.active.saturating_sub(1);
    }

    /// Bind a session to `device_id`, evicting any prior binding.
    ///
    /// The displaced session (if any) is closed with the `superseded` code
    /// through its outbound channel; its own teardown is then a no-op for
    /// the device map because [`Self::drop_device`] matches on session id.
    pub async fn admit_device(
        &self,
        session_id: SessionId,
        device_id: &str,
        addr: &str,
        sender: SessionSender,
    ) -> AdmitResult {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let (reconnect_count, superseded) = match inner.devices.remove(device_id) {
            Some(old) if old.session_id != session_id => {
                info!(device_id, old_session = old.session_id, "Device session superseded");
                old.sender.close(CLOSE_SUPERSEDED, "superseded");
                (old.reconnect_count + 1, true)
            }
            // The same transport re-sent device_join; keep its counter.
            Some(old) => (old.reconnect_count, false),
            None => (0, false),
        };

        inner.devices.insert(
            device_id.to_string(),
            DeviceSession {
                session_id,
                device_id: device_id.to_string(),
                addr: addr.to_string(),
                joined_at: now,
                last_seen: now,
                reconnect_count,
                sender,
            },
        );
        info!(device_id, session_id, reconnect_count, "Device admitted");

        AdmitResult {
            reconnect_count,
            superseded,
        }
    }

    pub async fn admit_dashboard(&self, session_id: SessionId, addr: &str, sender: SessionSender) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        inner.dashboards.insert(
            session_id,
            DashboardSession {
                session_id,
                addr: addr.to_string(),
                joined_at: now,
                last_seen: now,
                sender,
            },
        );
        info!(session_id, addr, "Dashboard admitted");
    }

    /// Remove a device binding, but only if it still belongs to
    /// `session_id` — a superseded session must not unbind its successor.
    /// Returns `true` if the binding was removed.
    pub async fn drop_device(&self, device_id: &str, session_id: SessionId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.devices.get(device_id) {
            Some(current) if current.session_id == session_id => {
                inner.devices.remove(device_id);
                info!(device_id, session_id, "Device session dropped");
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the dashboard was registered.
    pub async fn drop_dashboard(&self, session_id: SessionId) -> bool {
        let removed = self.inner.write().await.dashboards.remove(&session_id);
        if removed.is_some() {
            info!(session_id, "Dashboard session dropped");
        }
        removed.is_some()
    }

    /// Refresh `last_seen` on a bound device session.
    pub async fn touch_device(&self, device_id: &str, session_id: SessionId, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.devices.get_mut(device_id) {
            if session.session_id == session_id {
                session.last_seen = at;
            }
        }
    }

    pub async fn touch_dashboard(&self, session_id: SessionId, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.dashboards.get_mut(&session_id) {
            session.last_seen = at;
        }
    }

    /// Outbound handle for a bound device, if any. The handle stays valid
    /// after the lock is released; a later send may still fail if the
    /// session is dropped concurrently.
    pub async fn lookup_device(&self, device_id: &str) -> Option<SessionSender> {
        self.inner
            .read()
            .await
            .devices
            .get(device_id)
            .map(|s| s.sender.clone())
    }

    /// Consistent read view of all dashboard handles for a broadcast.
    pub async fn dashboard_senders(&self) -> Vec<SessionSender> {
        self.inner
            .read()
            .await
            .dashboards
            .values()
            .map(|s| s.sender.clone())
            .collect()
    }

    pub async fn device_count(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    pub async fn dashboard_count(&self) -> usize {
        self.inner.read().await.dashboards.len()
    }

    /// Evict every device session idle longer than `threshold`.
    ///
    /// Close frames are pushed under the lock (non-blocking channel writes);
    /// Store updates and the `device_disconnected` broadcasts are the
    /// caller's job, outside the critical section.
    pub async fn sweep(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<SweptSession> {
        let cutoff = now - threshold;
        let mut inner = self.inner.write().await;

        let stale: Vec<String> = inner
            .devices
            .values()
            .filter(|s| s.last_seen < cutoff)
            .map(|s| s.device_id.clone())
            .collect();

        let mut swept = Vec::with_capacity(stale.len());
        for device_id in stale {
            if let Some(session) = inner.devices.remove(&device_id) {
                debug!(
                    device_id = %session.device_id,
                    last_seen = %session.last_seen,
                    "Sweeping stale device session"
                );
                session.sender.close(CLOSE_STALE, "stale");
                swept.push(SweptSession {
                    device_id: session.device_id,
                    session_id: session.session_id,
                    addr: session.addr,
                });
            }
        }
        swept
    }

    pub async fn snapshot(&self) -> HubSnapshot {
        let inner = self.inner.read().await;
        let mut device_sessions: Vec<DeviceSessionInfo> = inner
            .devices
            .values()
            .map(|s| DeviceSessionInfo {
                device_id: s.device_id.clone(),
                addr: s.addr.clone(),
                joined_at: s.joined_at.to_rfc3339(),
                last_seen: s.last_seen.to_rfc3339(),
                reconnect_count: s.reconnect_count,
            })
            .collect();
        device_sessions.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        HubSnapshot {
            total_connections: inner.total_ever,
            active_connections: inner.active,
            device_sessions,
            dashboard_count: inner.dashboards.len(),
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// Spawn the periodic stale-session sweeper.
///
/// Evicted sessions get their transport closed by the hub; the Store mirror
/// and the `device_disconnected` broadcast happen here, outside the hub
/// critical section. A swept session's own teardown is a no-op because its
/// binding is already gone.
pub fn start_sweeper_task(state: crate::api::AppState) {
    let interval = std::time::Duration::from_secs(state.config.sweep_interval_secs);
    let threshold = Duration::seconds(state.config.stale_threshold_secs as i64);

    tokio::spawn(async move {
        info!(
            interval_secs = state.config.sweep_interval_secs,
            threshold_secs = state.config.stale_threshold_secs,
            "Session sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;

            let swept = state.hub.sweep(Utc::now(), threshold).await;
            for session in swept {
                info!(device_id = %session.device_id, addr = %session.addr, "Closed stale device session");
                if let Err(e) = state
                    .store
                    .set_device_status(&session.device_id, Some(false), Some(crate::store::PUMP_IDLE))
                    .await
                {
                    warn!(device_id = %session.device_id, "Failed to persist offline status: {e}");
                }
                state
                    .commands
                    .broadcast_to_dashboards(
                        "device_disconnected",
                        serde_json::json!({
                            "deviceId": session.device_id,
                            "status": "offline",
                            "reason": "timeout",
                        }),
                    )
                    .await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_pair() -> (SessionSender, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionSender::new(tx), rx)
    }

    #[tokio::test]
    async fn test_admit_evicts_prior_session() {
        let hub = SessionHub::new();
        let (first_tx, mut first_rx) = sender_pair();
        let (second_tx, _second_rx) = sender_pair();

        let first = hub.admit_device(1, "PUMP1", "10.0.0.1:1", first_tx).await;
        assert_eq!(first.reconnect_count, 0);
        assert!(!first.superseded);

        let second = hub.admit_device(2, "PUMP1", "10.0.0.1:2", second_tx).await;
        assert_eq!(second.reconnect_count, 1);
        assert!(second.superseded);

        // The displaced session received a close frame with the superseded code.
        match first_rx.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, CLOSE_SUPERSEDED);
                assert_eq!(frame.reason, "superseded");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        // At most one session is bound to the device id.
        assert_eq!(hub.device_count().await, 1);
    }

    #[tokio::test]
    async fn test_superseded_drop_keeps_successor() {
        let hub = SessionHub::new();
        let (first_tx, _first_rx) = sender_pair();
        let (second_tx, _second_rx) = sender_pair();

        hub.admit_device(1, "PUMP1", "a", first_tx).await;
        hub.admit_device(2, "PUMP1", "b", second_tx).await;

        // The displaced session's teardown must not unbind session 2.
        assert!(!hub.drop_device("PUMP1", 1).await);
        assert_eq!(hub.device_count().await, 1);

        assert!(hub.drop_device("PUMP1", 2).await);
        assert_eq!(hub.device_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale_sessions() {
        let hub = SessionHub::new();
        let (stale_tx, mut stale_rx) = sender_pair();
        let (fresh_tx, _fresh_rx) = sender_pair();

        let now = Utc::now();
        hub.admit_device(1, "STALE1", "a", stale_tx).await;
        hub.admit_device(2, "FRESH1", "b", fresh_tx).await;

        // Backdate the stale session past the threshold.
        hub.touch_device("STALE1", 1, now - Duration::minutes(11)).await;
        hub.touch_device("FRESH1", 2, now).await;

        let swept = hub.sweep(now, Duration::minutes(10)).await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].device_id, "STALE1");

        match stale_rx.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CLOSE_STALE),
            other => panic!("expected close frame, got {other:?}"),
        }

        assert_eq!(hub.device_count().await, 1);
        assert!(hub.lookup_device("FRESH1").await.is_some());
        assert!(hub.lookup_device("STALE1").await.is_none());
    }

    #[tokio::test]
    async fn test_counters_track_connections() {
        let hub = SessionHub::new();
        hub.connection_opened().await;
        hub.connection_opened().await;
        hub.connection_closed().await;

        let snapshot = hub.snapshot().await;
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 1);
    }

    #[tokio::test]
    async fn test_dashboard_admit_and_drop() {
        let hub = SessionHub::new();
        let (tx, _rx) = sender_pair();

        hub.admit_dashboard(7, "10.0.0.2:1", tx).await;
        assert_eq!(hub.dashboard_count().await, 1);
        assert_eq!(hub.dashboard_senders().await.len(), 1);

        assert!(hub.drop_dashboard(7).await);
        assert!(!hub.drop_dashboard(7).await);
        assert_eq!(hub.dashboard_count().await, 0);
    }
}
