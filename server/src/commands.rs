//! The command router: addresses commands to exactly one connected device
//! and fans device telemetry out to every dashboard.
//!
//! Holds no state of its own — device lookup goes through the hub, device
//! preconditions through the store. Delivery is best-effort: there is no
//! queueing on a missed device and no retry (command ids are not assumed
//! idempotent on the firmware side).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::{Store, STATUS_ONLINE};
use crate::ws::hub::SessionHub;
use crate::ws::protocol;

/// Watering durations accepted anywhere in the system, in milliseconds.
pub const MIN_DURATION_MS: i64 = 1_000;
pub const MAX_DURATION_MS: i64 = 300_000;

/// Duration used for a manual `water` command when none is given.
pub const DEFAULT_WATER_MS: i64 = 10_000;

/// Monotonic per-process suffix disambiguating commands issued within the
/// same millisecond.
static COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

/// Why a water command was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No device row exists for the id.
    DeviceNotFound,
    /// The store says the device is offline.
    DeviceOffline,
    /// The store says online, but the hub has no live session (or the write
    /// failed immediately). A legitimate transient.
    NotConnected,
    Internal(String),
}

impl CommandError {
    pub fn message(&self) -> String {
        match self {
            CommandError::DeviceNotFound => "device not found".to_string(),
            CommandError::DeviceOffline => "device offline".to_string(),
            CommandError::NotConnected => "not connected".to_string(),
            CommandError::Internal(detail) => detail.clone(),
        }
    }
}

/// The command envelope written to a device session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_id: String,
    /// `water` | `stop`.
    pub action: String,
    /// Watering duration in milliseconds; 0 for `stop`.
    pub duration: i64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
}

impl CommandEnvelope {
    pub fn new(action: &str, duration: i64) -> Self {
        Self {
            command_id: next_command_id(),
            action: action.to_string(),
            duration,
            timestamp: Utc::now().to_rfc3339(),
            alarm_id: None,
            alarm_name: None,
            schedule_id: None,
        }
    }
}

/// Unique per process for the lifetime of the process: wall-clock millis
/// plus an atomic sequence number.
pub fn next_command_id() -> String {
    let seq = COMMAND_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("cmd_{}_{}", Utc::now().timestamp_millis(), seq)
}

/// Routes addressed commands and dashboard broadcasts. Stateless; cheap to
/// share behind an `Arc`.
pub struct CommandRouter {
    hub: Arc<SessionHub>,
    store: Store,
}

impl CommandRouter {
    pub fn new(hub: Arc<SessionHub>, store: Store) -> Self {
        Self { hub, store }
    }

    /// Write one frame to the device's live session. Returns `true` only if
    /// a session exists and the write was accepted. No queueing on miss.
    pub async fn send_to_device(&self, device_id: &str, kind: &str, data: Value) -> bool {
        match self.hub.lookup_device(device_id).await {
            Some(sender) => {
                let delivered = sender.send(protocol::frame(kind, data));
                if !delivered {
                    warn!(device_id, kind, "Device session write failed");
                }
                delivered
            }
            None => {
                debug!(device_id, kind, "No live session for device");
                false
            }
        }
    }

    /// Fan one frame out to every dashboard. Best-effort: per-session
    /// failures are counted and logged, never aborting the fan-out.
    /// Returns the number of dashboards the frame was delivered to.
    pub async fn broadcast_to_dashboards(&self, kind: &str, data: Value) -> usize {
        let senders = self.hub.dashboard_senders().await;
        let frame = protocol::frame(kind, data);

        let mut delivered = 0;
        let mut failed = 0;
        for sender in senders {
            if sender.send(frame.clone()) {
                delivered += 1;
            } else {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(kind, delivered, failed, "Dashboard broadcast partially failed");
        }
        delivered
    }

    /// Issue a manual water/stop command to a device.
    ///
    /// Preconditions are checked against the store (a row must exist and be
    /// online); a store-online device without a live hub session yields
    /// [`CommandError::NotConnected`].
    pub async fn issue_water_command(
        &self,
        device_id: &str,
        action: &str,
        duration_ms: i64,
    ) -> Result<CommandEnvelope, CommandError> {
        let device = self
            .store
            .find_device(device_id)
            .await
            .map_err(|e| CommandError::Internal(e.to_string()))?
            .ok_or(CommandError::DeviceNotFound)?;

        if device.status != STATUS_ONLINE {
            return Err(CommandError::DeviceOffline);
        }

        let envelope = CommandEnvelope::new(action, duration_ms);
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| CommandError::Internal(e.to_string()))?;

        if self
            .send_to_device(&device.device_id, "water_command", payload)
            .await
        {
            debug!(
                device_id = %device.device_id,
                command_id = %envelope.command_id,
                action,
                "Water command dispatched"
            );
            Ok(envelope)
        } else {
            // Best-effort note on the device row; the command itself is lost.
            let _ = self
                .store
                .record_connection_error(&device.device_id, "command dispatch failed: no live session")
                .await;
            Err(CommandError::NotConnected)
        }
    }
}
