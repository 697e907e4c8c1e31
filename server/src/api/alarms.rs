use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppError, AppState};
use crate::alarms::{next_execution_for, parse_days, parse_time_of_day};
use crate::commands::{MAX_DURATION_MS, MIN_DURATION_MS};
use crate::store::normalize_device_id;

/// Request body for creating a recurring alarm.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlarm {
    pub device_id: Option<String>,
    pub name: Option<String>,
    /// `HH:MM`, server-local.
    pub time: Option<String>,
    pub days: Option<Vec<String>>,
    /// Watering duration in milliseconds.
    pub duration: Option<i64>,
}

/// GET /api/devices/:id/alarms — list a device's alarms.
pub async fn list_for_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let alarms = state.store.list_alarms(&id).await?;
    Ok(Json(json!({ "success": true, "alarms": alarms })))
}

/// POST /api/alarms — create a recurring alarm.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateAlarm>,
) -> Result<Json<Value>, AppError> {
    let device_id = body
        .device_id
        .as_deref()
        .map(normalize_device_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("deviceId is required".to_string()))?;
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Validation("name is required".to_string()))?;
    let time = body
        .time
        .as_deref()
        .ok_or_else(|| AppError::Validation("time is required".to_string()))?;
    if parse_time_of_day(time).is_none() {
        return Err(AppError::Validation(format!(
            "invalid time \"{time}\"; expected HH:MM"
        )));
    }
    let days = body
        .days
        .as_deref()
        .ok_or_else(|| AppError::Validation("days is required".to_string()))?;
    parse_days(days).map_err(AppError::Validation)?;
    let duration = body
        .duration
        .ok_or_else(|| AppError::Validation("duration is required".to_string()))?;
    if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&duration) {
        return Err(AppError::Validation(format!(
            "duration must be between {MIN_DURATION_MS} and {MAX_DURATION_MS} ms"
        )));
    }

    if state.store.find_device(&device_id).await?.is_none() {
        return Err(AppError::NotFound("device not found".to_string()));
    }

    let next = next_execution_for(time, days, Local::now().naive_local())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let alarm = state
        .store
        .create_alarm(&device_id, name, time, days, duration, &next)
        .await?;

    Ok(Json(json!({ "success": true, "alarm": alarm })))
}

/// PUT /api/alarms/:id/toggle — flip an alarm between active and paused.
pub async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let alarm = state
        .store
        .find_alarm(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("alarm not found".to_string()))?;

    // Activating resets the next firing from now; the stored value may be
    // stale from before the pause.
    let next = next_execution_for(&alarm.time, &alarm.days, Local::now().naive_local())
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let updated = state
        .store
        .toggle_alarm(&id, &next)
        .await?
        .ok_or_else(|| AppError::NotFound("alarm not found".to_string()))?;

    Ok(Json(json!({
        "success": true,
        "alarm": {
            "id": updated.id,
            "isActive": updated.is_active,
            "nextExecution": updated.next_execution,
        },
    })))
}

/// DELETE /api/alarms/:id — remove an alarm.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.store.delete_alarm(&id).await? {
        return Err(AppError::NotFound("alarm not found".to_string()));
    }
    Ok(Json(json!({ "success": true })))
}
