//! The recurring alarm engine and the one-shot schedule pass.
//!
//! A single process-wide tick (default 60 s) reads due alarms from the
//! store in `next_execution` order and fires each through the command
//! router. An alarm is always advanced to its next firing — present device
//! or not — so no backlog builds while a pump is down. One-shot schedules
//! settle in the same tick: dispatched once within the grace window,
//! expired past it, never re-fired.
//!
//! All time-of-day math is server-local; no timezone is recorded on an
//! alarm. One-shot firing times are RFC 3339 and compared in UTC.

use anyhow::{anyhow, Result};
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, SecondsFormat,
    Utc, Weekday,
};
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::commands::CommandEnvelope;
use crate::store::{
    Alarm, Schedule, SCHEDULE_EXECUTED, SCHEDULE_EXPIRED, SCHEDULE_FAILED, STATUS_ONLINE,
};

/// Storage format for server-local datetimes (`next_execution`,
/// `last_executed`). Lexicographic order equals chronological order.
pub const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_local(at: NaiveDateTime) -> String {
    at.format(LOCAL_FORMAT).to_string()
}

/// Canonical RFC 3339 UTC string (`...Z`, whole seconds) used for one-shot
/// `fire_at` comparisons.
pub fn format_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Strict `HH:MM` parse.
pub fn parse_time_of_day(time: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(time, "%H:%M").ok()
}

/// Parse weekday names (`"mon"` or `"monday"`, case-insensitive) into a
/// de-duplicated list. Errors on an empty or unrecognized input.
pub fn parse_days(days: &[String]) -> Result<Vec<Weekday>, String> {
    if days.is_empty() {
        return Err("days must not be empty".to_string());
    }
    let mut parsed: Vec<Weekday> = Vec::with_capacity(days.len());
    for day in days {
        let weekday: Weekday = day
            .trim()
            .parse()
            .map_err(|_| format!("invalid weekday \"{day}\""))?;
        if !parsed.contains(&weekday) {
            parsed.push(weekday);
        }
    }
    Ok(parsed)
}

/// The earliest datetime strictly after `now` whose weekday is in `days`
/// and whose time-of-day equals `time_of_day`.
///
/// Walks day offsets 0..=7 from `now`; day 0 only qualifies when the
/// time-of-day is still strictly in the future today. For any non-empty
/// `days` the result is less than 8 days ahead.
pub fn compute_next(
    time_of_day: NaiveTime,
    days: &[Weekday],
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    if days.is_empty() {
        return None;
    }
    for offset in 0..=7 {
        let date = now.date() + ChronoDuration::days(offset);
        if !days.contains(&date.weekday()) {
            continue;
        }
        let candidate = date.and_time(time_of_day);
        if candidate > now {
            return Some(candidate);
        }
    }
    None
}

/// Next firing for a stored alarm row, as the storage-format string.
pub fn next_execution_for(time: &str, days: &[String], now: NaiveDateTime) -> Result<String> {
    let time_of_day =
        parse_time_of_day(time).ok_or_else(|| anyhow!("invalid alarm time \"{time}\""))?;
    let days = parse_days(days).map_err(|e| anyhow!(e))?;
    let next = compute_next(time_of_day, &days, now)
        .ok_or_else(|| anyhow!("no future firing computable"))?;
    Ok(format_local(next))
}

/// Spawn the single process-wide alarm engine task.
pub fn start_alarm_engine(state: AppState) {
    let tick = std::time::Duration::from_secs(state.config.alarm_tick_secs);
    tokio::spawn(async move {
        info!(tick_secs = state.config.alarm_tick_secs, "Alarm engine started");

        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            if let Err(e) = run_tick(&state).await {
                error!("Alarm tick failed: {e:#}");
            }
        }
    });
}

/// One engine tick: fire due recurring alarms in store order, then settle
/// due one-shot schedules. Public so tests drive it directly.
pub async fn run_tick(state: &AppState) -> Result<()> {
    let now = Local::now().naive_local();
    let due = state.store.find_due_alarms(&format_local(now)).await?;
    if !due.is_empty() {
        info!(count = due.len(), "Firing due alarms");
    }
    for alarm in due {
        // One bad alarm must not abort the tick.
        if let Err(e) = fire_alarm(state, &alarm, now).await {
            error!(alarm_id = %alarm.id, "Alarm firing failed: {e:#}");
        }
    }

    run_schedule_pass(state).await?;
    Ok(())
}

async fn fire_alarm(state: &AppState, alarm: &Alarm, now: NaiveDateTime) -> Result<()> {
    let next = next_execution_for(&alarm.time, &alarm.days, now)?;

    let device = state.store.find_device(&alarm.device_id).await?;
    let online = device
        .as_ref()
        .map(|d| d.status == STATUS_ONLINE)
        .unwrap_or(false);

    if !online {
        // Advance anyway; `last_executed` and the count stay untouched.
        state.store.advance_alarm(&alarm.id, &next).await?;
        state
            .commands
            .broadcast_to_dashboards(
                "alarm_missed",
                json!({
                    "alarmId": &alarm.id,
                    "alarmName": &alarm.name,
                    "deviceId": &alarm.device_id,
                    "reason": "Device offline",
                    "nextExecution": next,
                }),
            )
            .await;
        info!(alarm_id = %alarm.id, device_id = %alarm.device_id, "Alarm missed: device offline");
        return Ok(());
    }

    let mut envelope = CommandEnvelope::new("water", alarm.duration_ms);
    envelope.alarm_id = Some(alarm.id.clone());
    envelope.alarm_name = Some(alarm.name.clone());
    let payload = serde_json::to_value(&envelope)?;

    if state
        .commands
        .send_to_device(&alarm.device_id, "water_command", payload)
        .await
    {
        state
            .store
            .update_alarm_after_fire(&alarm.id, &format_local(now), &next)
            .await?;
        state
            .commands
            .broadcast_to_dashboards(
                "alarm_executed",
                json!({
                    "alarmId": &alarm.id,
                    "alarmName": &alarm.name,
                    "deviceId": &alarm.device_id,
                    "commandId": envelope.command_id,
                    "duration": alarm.duration_ms,
                    "nextExecution": next,
                }),
            )
            .await;
        info!(alarm_id = %alarm.id, device_id = %alarm.device_id, "Alarm executed");
    } else {
        // Store says online but the session write failed; advance without
        // counting a firing.
        state.store.advance_alarm(&alarm.id, &next).await?;
        state
            .commands
            .broadcast_to_dashboards(
                "alarm_failed",
                json!({
                    "alarmId": &alarm.id,
                    "alarmName": &alarm.name,
                    "deviceId": &alarm.device_id,
                    "reason": "dispatch failed",
                    "nextExecution": next,
                }),
            )
            .await;
        warn!(alarm_id = %alarm.id, device_id = %alarm.device_id, "Alarm dispatch failed");
    }
    Ok(())
}

async fn run_schedule_pass(state: &AppState) -> Result<()> {
    let now = Utc::now();
    let due = state.store.find_due_schedules(&format_utc(now)).await?;
    for schedule in due {
        if let Err(e) = settle_schedule(state, &schedule, now).await {
            error!(schedule_id = %schedule.id, "Schedule settling failed: {e:#}");
        }
    }
    Ok(())
}

/// Dispatch or retire one due one-shot schedule. Every path leaves the row
/// in a terminal state.
async fn settle_schedule(
    state: &AppState,
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Result<()> {
    let grace = ChronoDuration::seconds(state.config.schedule_grace_secs as i64);

    let missed_window = match DateTime::parse_from_rfc3339(&schedule.fire_at) {
        Ok(at) => now - at.with_timezone(&Utc) > grace,
        // An unparseable firing time can never be dispatched on time.
        Err(_) => true,
    };
    if missed_window {
        state
            .store
            .mark_schedule(&schedule.id, SCHEDULE_EXPIRED, Some("missed firing window"), None)
            .await?;
        state
            .commands
            .broadcast_to_dashboards(
                "schedule_expired",
                json!({ "scheduleId": &schedule.id, "deviceId": &schedule.device_id }),
            )
            .await;
        info!(schedule_id = %schedule.id, "Schedule expired");
        return Ok(());
    }

    let device = state.store.find_device(&schedule.device_id).await?;
    let online = device
        .as_ref()
        .map(|d| d.status == STATUS_ONLINE)
        .unwrap_or(false);

    let failure = if online {
        let mut envelope = CommandEnvelope::new("water", schedule.duration_ms);
        envelope.schedule_id = Some(schedule.id.clone());
        let payload = serde_json::to_value(&envelope)?;

        if state
            .commands
            .send_to_device(&schedule.device_id, "water_command", payload)
            .await
        {
            state
                .store
                .mark_schedule(&schedule.id, SCHEDULE_EXECUTED, None, Some(&format_utc(now)))
                .await?;
            state
                .commands
                .broadcast_to_dashboards(
                    "schedule_executed",
                    json!({
                        "scheduleId": &schedule.id,
                        "deviceId": &schedule.device_id,
                        "commandId": envelope.command_id,
                        "duration": schedule.duration_ms,
                    }),
                )
                .await;
            info!(schedule_id = %schedule.id, device_id = %schedule.device_id, "Schedule executed");
            return Ok(());
        }
        "dispatch failed"
    } else {
        "device offline"
    };

    state
        .store
        .mark_schedule(&schedule.id, SCHEDULE_FAILED, Some(failure), None)
        .await?;
    state
        .commands
        .broadcast_to_dashboards(
            "schedule_failed",
            json!({
                "scheduleId": &schedule.id,
                "deviceId": &schedule.device_id,
                "reason": failure,
            }),
        )
        .await;
    warn!(schedule_id = %schedule.id, reason = failure, "Schedule failed");
    Ok(())
}
