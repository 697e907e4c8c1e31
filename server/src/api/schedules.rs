use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppError, AppState};
use crate::alarms::format_utc;
use crate::commands::{MAX_DURATION_MS, MIN_DURATION_MS};
use crate::store::normalize_device_id;

/// Request body for creating a one-shot schedule.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchedule {
    pub device_id: Option<String>,
    /// ISO-8601 firing time; must be in the future.
    pub time: Option<String>,
    /// Watering duration in milliseconds.
    pub duration: Option<i64>,
}

/// GET /api/devices/:id/schedules — list a device's one-shot schedules.
pub async fn list_for_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let device_id = normalize_device_id(&id);
    let schedules = state.store.list_schedules(&device_id).await?;
    Ok(Json(json!({
        "success": true,
        "schedules": schedules,
        "deviceId": device_id,
    })))
}

/// POST /api/schedules — create a one-shot schedule.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSchedule>,
) -> Result<Json<Value>, AppError> {
    let device_id = body
        .device_id
        .as_deref()
        .map(normalize_device_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("deviceId is required".to_string()))?;
    let time = body
        .time
        .as_deref()
        .ok_or_else(|| AppError::Validation("time is required".to_string()))?;
    let fire_at = DateTime::parse_from_rfc3339(time)
        .map_err(|_| AppError::Validation(format!("invalid time \"{time}\"; expected ISO-8601")))?
        .with_timezone(&Utc);
    if fire_at <= Utc::now() {
        return Err(AppError::Validation("time must be in the future".to_string()));
    }
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

    let schedule = state
        .store
        .create_schedule(&device_id, &format_utc(fire_at), duration)
        .await?;

    Ok(Json(json!({ "success": true, "schedule": schedule })))
}
