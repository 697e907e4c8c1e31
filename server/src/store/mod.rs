//! Durable state: devices, recurring alarms, and one-shot schedules.
//!
//! The rest of the server never touches the pool directly — every read and
//! write goes through [`Store`]. Operations are single statements (or an
//! upsert + read-back); failures propagate to the caller and are never
//! retried here. The only cross-call consistency the callers rely on is
//! per-row monotonicity of `ws_connections` and `execution_count`, which is
//! guaranteed by the atomic `SET x = x + 1` updates below.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// Device connectivity values stored in `devices.status`.
pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Pump state values stored in `devices.pump_status`.
pub const PUMP_IDLE: &str = "idle";
pub const PUMP_RUNNING: &str = "running";

/// One-shot schedule lifecycle states.
pub const SCHEDULE_PENDING: &str = "pending";
pub const SCHEDULE_EXECUTED: &str = "executed";
pub const SCHEDULE_FAILED: &str = "failed";
pub const SCHEDULE_EXPIRED: &str = "expired";

/// A registered pump controller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    /// `online` | `offline`. Owned by the Session Hub, mirrored here.
    pub status: String,
    /// `idle` | `running`.
    pub pump_status: String,
    pub ip: Option<String>,
    /// Total successful joins over the device's lifetime.
    pub ws_connections: i64,
    pub last_seen: Option<String>,
    pub last_heartbeat: Option<String>,
    pub last_connection_error: Option<String>,
    pub registered_at: String,
}

/// A recurring watering alarm: fires at `time` (HH:MM, server-local) on
/// every weekday in `days`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub time: String,
    pub days: Vec<String>,
    pub duration_ms: i64,
    pub is_active: bool,
    pub last_executed: Option<String>,
    pub next_execution: Option<String>,
    pub execution_count: i64,
    pub created_at: String,
}

/// A one-shot watering schedule. Terminal states (`executed`, `failed`,
/// `expired`) are never resurrected.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub device_id: String,
    pub fire_at: String,
    pub duration_ms: i64,
    pub status: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub executed_at: Option<String>,
    pub created_at: String,
}

impl Device {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            device_id: row.try_get("device_id")?,
            status: row.try_get("status")?,
            pump_status: row.try_get("pump_status")?,
            ip: row.try_get("ip")?,
            ws_connections: row.try_get("ws_connections")?,
            last_seen: row.try_get("last_seen")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            last_connection_error: row.try_get("last_connection_error")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

impl Alarm {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let days_json: String = row.try_get("days")?;
        Ok(Self {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            name: row.try_get("name")?,
            time: row.try_get("time")?,
            days: serde_json::from_str(&days_json).unwrap_or_default(),
            duration_ms: row.try_get("duration_ms")?,
            is_active: row.try_get::<i64, _>("is_active").unwrap_or(0) != 0,
            last_executed: row.try_get("last_executed")?,
            next_execution: row.try_get("next_execution")?,
            execution_count: row.try_get("execution_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Schedule {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            fire_at: row.try_get("fire_at")?,
            duration_ms: row.try_get("duration_ms")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            executed_at: row.try_get("executed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Normalize a device id: trimmed, upper-case. Ids are case-insensitive on
/// the wire and stored upper-case.
pub fn normalize_device_id(id: &str) -> String {
    id.trim().to_uppercase()
}

/// Handle to the persistence layer. Cheap to clone (wraps the pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, exposed for the health probe.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Devices ─────────────────────────────────────────────────────

    /// Create the device row if it doesn't exist, otherwise refresh its
    /// address and `last_seen`. Returns the row either way.
    pub async fn register_or_touch_device(
        &self,
        id: &str,
        addr: Option<&str>,
    ) -> Result<Device, sqlx::Error> {
        let id = normalize_device_id(id);
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO devices (device_id, ip, last_seen) VALUES (?, ?, ?) \
             ON CONFLICT(device_id) DO UPDATE SET \
             ip = COALESCE(excluded.ip, ip), last_seen = excluded.last_seen",
        )
        .bind(&id)
        .bind(addr)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM devices WHERE device_id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;

        Device::from_row(row)
    }

    /// Update the Hub-owned mirror fields. `None` leaves a field unchanged.
    pub async fn set_device_status(
        &self,
        id: &str,
        online: Option<bool>,
        pump: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let id = normalize_device_id(id);
        let status = online.map(|o| if o { STATUS_ONLINE } else { STATUS_OFFLINE });
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE devices SET \
             status = COALESCE(?, status), \
             pump_status = COALESCE(?, pump_status), \
             last_seen = ? \
             WHERE device_id = ?",
        )
        .bind(status)
        .bind(pump)
        .bind(&now)
        .bind(&id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically increment the device's lifetime connection counter.
    pub async fn bump_ws_connections(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE devices SET ws_connections = ws_connections + 1 WHERE device_id = ?")
            .bind(normalize_device_id(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a heartbeat: refreshes both `last_heartbeat` and `last_seen`.
    pub async fn record_heartbeat(&self, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE devices SET last_heartbeat = ?, last_seen = ? WHERE device_id = ?")
            .bind(&now)
            .bind(&now)
            .bind(normalize_device_id(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Best-effort note of the last connection/dispatch error for a device.
    pub async fn record_connection_error(&self, id: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE devices SET last_connection_error = ? WHERE device_id = ?")
            .bind(error)
            .bind(normalize_device_id(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_device(&self, id: &str) -> Result<Option<Device>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM devices WHERE device_id = ?")
            .bind(normalize_device_id(id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(Device::from_row).transpose()
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM devices ORDER BY last_seen DESC, device_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Device::from_row).collect()
    }

    /// `(total, online)` device counts for the health endpoint.
    pub async fn device_counts(&self) -> Result<(i64, i64), sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             COALESCE(SUM(CASE WHEN status = 'online' THEN 1 ELSE 0 END), 0) AS online \
             FROM devices",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("total")?, row.try_get("online")?))
    }

    // ── Alarms ──────────────────────────────────────────────────────

    pub async fn create_alarm(
        &self,
        device_id: &str,
        name: &str,
        time: &str,
        days: &[String],
        duration_ms: i64,
        next_execution: &str,
    ) -> Result<Alarm, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let days_json = serde_json::to_string(days).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            "INSERT INTO alarms (id, device_id, name, time, days, duration_ms, next_execution) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(normalize_device_id(device_id))
        .bind(name)
        .bind(time)
        .bind(&days_json)
        .bind(duration_ms)
        .bind(next_execution)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM alarms WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Alarm::from_row(row)
    }

    pub async fn find_alarm(&self, id: &str) -> Result<Option<Alarm>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM alarms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Alarm::from_row).transpose()
    }

    pub async fn list_alarms(&self, device_id: &str) -> Result<Vec<Alarm>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM alarms WHERE device_id = ? ORDER BY time ASC, id ASC")
            .bind(normalize_device_id(device_id))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Alarm::from_row).collect()
    }

    /// Flip `is_active`. When the flip activates the alarm, `next_execution`
    /// is reset to `next_if_active` (computed by the caller); deactivating
    /// clears it. Returns the updated row, or `None` if the id is unknown.
    pub async fn toggle_alarm(
        &self,
        id: &str,
        next_if_active: &str,
    ) -> Result<Option<Alarm>, sqlx::Error> {
        let updated = sqlx::query(
            "UPDATE alarms SET \
             is_active = 1 - is_active, \
             next_execution = CASE WHEN is_active = 1 THEN NULL ELSE ? END \
             WHERE id = ?",
        )
        .bind(next_if_active)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_alarm(id).await
    }

    /// Returns `true` if a row was deleted.
    pub async fn delete_alarm(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM alarms WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every active alarm whose `next_execution` is due at `now_local`
    /// (server-local `YYYY-MM-DD HH:MM:SS`), ascending by `next_execution`
    /// then id — the only ordering the engine relies on.
    pub async fn find_due_alarms(&self, now_local: &str) -> Result<Vec<Alarm>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM alarms \
             WHERE is_active = 1 AND next_execution IS NOT NULL AND next_execution <= ? \
             ORDER BY next_execution ASC, id ASC",
        )
        .bind(now_local)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alarm::from_row).collect()
    }

    /// Successful firing: stamp `last_executed`, advance `next_execution`,
    /// and atomically increment `execution_count`.
    pub async fn update_alarm_after_fire(
        &self,
        id: &str,
        fired_at: &str,
        next_execution: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE alarms SET \
             last_executed = ?, next_execution = ?, execution_count = execution_count + 1 \
             WHERE id = ?",
        )
        .bind(fired_at)
        .bind(next_execution)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Missed or failed firing: advance `next_execution` only, so no backlog
    /// builds while a device is down.
    pub async fn advance_alarm(&self, id: &str, next_execution: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE alarms SET next_execution = ? WHERE id = ?")
            .bind(next_execution)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── One-shot schedules ──────────────────────────────────────────

    pub async fn create_schedule(
        &self,
        device_id: &str,
        fire_at: &str,
        duration_ms: i64,
    ) -> Result<Schedule, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO schedules (id, device_id, fire_at, duration_ms) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(normalize_device_id(device_id))
            .bind(fire_at)
            .bind(duration_ms)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Schedule::from_row(row)
    }

    pub async fn find_schedule(&self, id: &str) -> Result<Option<Schedule>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Schedule::from_row).transpose()
    }

    pub async fn list_schedules(&self, device_id: &str) -> Result<Vec<Schedule>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE device_id = ? ORDER BY fire_at ASC")
            .bind(normalize_device_id(device_id))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Schedule::from_row).collect()
    }

    pub async fn list_pending_schedules(&self, device_id: &str) -> Result<Vec<Schedule>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM schedules WHERE device_id = ? AND status = 'pending' \
             ORDER BY fire_at ASC",
        )
        .bind(normalize_device_id(device_id))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Schedule::from_row).collect()
    }

    /// Pending schedules due at `now` (RFC 3339 UTC), ascending by `fire_at`.
    pub async fn find_due_schedules(&self, now: &str) -> Result<Vec<Schedule>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM schedules WHERE status = 'pending' AND fire_at <= ? \
             ORDER BY fire_at ASC, id ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Schedule::from_row).collect()
    }

    /// Transition a schedule out of `pending`. Terminal states are final:
    /// the guard keeps a late writer from resurrecting an already-settled row.
    pub async fn mark_schedule(
        &self,
        id: &str,
        status: &str,
        error: Option<&str>,
        executed_at: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE schedules SET status = ?, last_error = ?, executed_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(error)
        .bind(executed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn setup_test_store() -> Store {
        let pool = db::init(":memory:").await.expect("test DB init failed");
        Store::new(pool)
    }

    #[tokio::test]
    async fn test_register_normalizes_device_id() {
        let store = setup_test_store().await;

        let device = store
            .register_or_touch_device("strwsmk1", Some("10.0.0.5"))
            .await
            .unwrap();
        assert_eq!(device.device_id, "STRWSMK1");
        assert_eq!(device.status, STATUS_OFFLINE);
        assert_eq!(device.pump_status, PUMP_IDLE);
        assert_eq!(device.ip.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_register_twice_keeps_single_row() {
        let store = setup_test_store().await;

        store.register_or_touch_device("PUMP1", None).await.unwrap();
        let second = store
            .register_or_touch_device("pump1", Some("10.0.0.9"))
            .await
            .unwrap();

        assert_eq!(second.ip.as_deref(), Some("10.0.0.9"));
        let (total, _) = store.device_counts().await.unwrap();
        assert_eq!(total, 1, "re-registration must not create a second row");
    }

    #[tokio::test]
    async fn test_ws_connections_strictly_increasing() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();

        let mut previous = 0;
        for _ in 0..5 {
            store.bump_ws_connections("PUMP1").await.unwrap();
            let device = store.find_device("PUMP1").await.unwrap().unwrap();
            assert!(device.ws_connections > previous);
            previous = device.ws_connections;
        }
        assert_eq!(previous, 5);
    }

    #[tokio::test]
    async fn test_set_device_status_partial_update() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();

        store
            .set_device_status("PUMP1", Some(true), None)
            .await
            .unwrap();
        let device = store.find_device("PUMP1").await.unwrap().unwrap();
        assert_eq!(device.status, STATUS_ONLINE);
        assert_eq!(device.pump_status, PUMP_IDLE, "pump untouched");

        store
            .set_device_status("PUMP1", None, Some(PUMP_RUNNING))
            .await
            .unwrap();
        let device = store.find_device("PUMP1").await.unwrap().unwrap();
        assert_eq!(device.status, STATUS_ONLINE, "status untouched");
        assert_eq!(device.pump_status, PUMP_RUNNING);
    }

    #[tokio::test]
    async fn test_due_alarms_ordering_and_filtering() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();
        let days = vec!["mon".to_string()];

        let late = store
            .create_alarm("PUMP1", "evening", "19:00", &days, 5000, "2026-03-02 19:00:00")
            .await
            .unwrap();
        let early = store
            .create_alarm("PUMP1", "morning", "07:00", &days, 5000, "2026-03-02 07:00:00")
            .await
            .unwrap();
        let future = store
            .create_alarm("PUMP1", "next week", "07:00", &days, 5000, "2026-03-09 07:00:00")
            .await
            .unwrap();

        let due = store.find_due_alarms("2026-03-02 20:00:00").await.unwrap();
        let ids: Vec<&str> = due.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);
        assert!(!ids.contains(&future.id.as_str()));
    }

    #[tokio::test]
    async fn test_inactive_alarms_never_due() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();
        let days = vec!["tue".to_string()];

        let alarm = store
            .create_alarm("PUMP1", "paused", "07:00", &days, 5000, "2026-03-03 07:00:00")
            .await
            .unwrap();
        store
            .toggle_alarm(&alarm.id, "2026-03-10 07:00:00")
            .await
            .unwrap();

        let due = store.find_due_alarms("2026-03-04 00:00:00").await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_alarm_roundtrip() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();
        let days = vec!["wed".to_string()];

        let alarm = store
            .create_alarm("PUMP1", "t", "08:30", &days, 5000, "2026-03-04 08:30:00")
            .await
            .unwrap();
        assert!(alarm.is_active);

        let off = store
            .toggle_alarm(&alarm.id, "2026-03-11 08:30:00")
            .await
            .unwrap()
            .unwrap();
        assert!(!off.is_active);
        assert!(off.next_execution.is_none(), "deactivation clears next");

        let on = store
            .toggle_alarm(&alarm.id, "2026-03-11 08:30:00")
            .await
            .unwrap()
            .unwrap();
        assert!(on.is_active);
        assert_eq!(on.next_execution.as_deref(), Some("2026-03-11 08:30:00"));

        assert!(store.toggle_alarm("missing", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_alarm_after_fire_increments_count() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();
        let days = vec!["mon".to_string()];

        let alarm = store
            .create_alarm("PUMP1", "t", "07:00", &days, 5000, "2026-03-02 07:00:00")
            .await
            .unwrap();
        assert_eq!(alarm.execution_count, 0);

        store
            .update_alarm_after_fire(&alarm.id, "2026-03-02 07:00:12", "2026-03-09 07:00:00")
            .await
            .unwrap();
        let fired = store.find_alarm(&alarm.id).await.unwrap().unwrap();
        assert_eq!(fired.execution_count, 1);
        assert_eq!(fired.last_executed.as_deref(), Some("2026-03-02 07:00:12"));
        assert_eq!(fired.next_execution.as_deref(), Some("2026-03-09 07:00:00"));

        store
            .advance_alarm(&alarm.id, "2026-03-16 07:00:00")
            .await
            .unwrap();
        let advanced = store.find_alarm(&alarm.id).await.unwrap().unwrap();
        assert_eq!(advanced.execution_count, 1, "advance must not count a firing");
        assert_eq!(advanced.last_executed.as_deref(), Some("2026-03-02 07:00:12"));
    }

    #[tokio::test]
    async fn test_schedule_terminal_states_not_resurrected() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();

        let schedule = store
            .create_schedule("PUMP1", "2026-03-02T07:00:00+00:00", 5000)
            .await
            .unwrap();
        assert_eq!(schedule.status, SCHEDULE_PENDING);

        store
            .mark_schedule(&schedule.id, SCHEDULE_EXECUTED, None, Some("2026-03-02T07:00:05+00:00"))
            .await
            .unwrap();

        // A late failure report must not overwrite the terminal state.
        store
            .mark_schedule(&schedule.id, SCHEDULE_FAILED, Some("late"), None)
            .await
            .unwrap();

        let row = store.find_schedule(&schedule.id).await.unwrap().unwrap();
        assert_eq!(row.status, SCHEDULE_EXECUTED);
        assert!(row.last_error.is_none());

        let due = store
            .find_due_schedules("2026-03-03T00:00:00+00:00")
            .await
            .unwrap();
        assert!(due.is_empty(), "executed schedule must never be due again");
    }

    #[tokio::test]
    async fn test_pending_schedules_listing() {
        let store = setup_test_store().await;
        store.register_or_touch_device("PUMP1", None).await.unwrap();

        let first = store
            .create_schedule("PUMP1", "2026-03-02T07:00:00+00:00", 5000)
            .await
            .unwrap();
        let second = store
            .create_schedule("PUMP1", "2026-03-01T07:00:00+00:00", 5000)
            .await
            .unwrap();
        store
            .mark_schedule(&first.id, SCHEDULE_EXPIRED, Some("missed firing window"), None)
            .await
            .unwrap();

        let pending = store.list_pending_schedules("PUMP1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);

        let all = store.list_schedules("PUMP1").await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
