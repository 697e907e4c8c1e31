use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppError, AppState};
use crate::commands::{DEFAULT_WATER_MS, MAX_DURATION_MS, MIN_DURATION_MS};
use crate::store::normalize_device_id;

/// Request body for device registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDevice {
    pub device_id: Option<String>,
    pub ip: Option<String>,
    /// Device-reported clock; recorded nowhere, server time is authoritative.
    #[allow(dead_code)]
    pub timestamp: Option<String>,
}

/// Request body for a manual water/stop command.
#[derive(Debug, Deserialize)]
pub struct WaterRequest {
    pub action: String,
    pub duration: Option<i64>,
}

/// GET /api/devices — list all registered devices.
pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let devices = state.store.list_devices().await?;
    let count = devices.len();
    Ok(Json(json!({
        "success": true,
        "devices": devices,
        "count": count,
    })))
}

/// POST /api/devices/register — create or refresh a device row.
///
/// Devices call this over plain HTTP before opening the message channel;
/// the response tells them where the channel lives.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterDevice>,
) -> Result<Json<Value>, AppError> {
    let device_id = body
        .device_id
        .as_deref()
        .map(normalize_device_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("deviceId is required".to_string()))?;

    let device = state
        .store
        .register_or_touch_device(&device_id, body.ip.as_deref())
        .await?;

    let ws_url = match &state.config.ws_url {
        Some(url) => url.clone(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost:3000");
            format!("ws://{host}/ws")
        }
    };

    Ok(Json(json!({
        "success": true,
        "device": device,
        "serverInfo": {
            "wsUrl": ws_url,
            "version": env!("CARGO_PKG_VERSION"),
            "serverTime": Utc::now().to_rfc3339(),
        },
    })))
}

/// POST /api/devices/:id/water — issue a manual water or stop command.
pub async fn water(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WaterRequest>,
) -> Result<Json<Value>, AppError> {
    let duration = match body.action.as_str() {
        "water" => {
            let duration = body.duration.unwrap_or(DEFAULT_WATER_MS);
            if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&duration) {
                return Err(AppError::Validation(format!(
                    "duration must be between {MIN_DURATION_MS} and {MAX_DURATION_MS} ms"
                )));
            }
            duration
        }
        "stop" => 0,
        other => {
            return Err(AppError::Validation(format!(
                "invalid action \"{other}\"; expected water or stop"
            )));
        }
    };

    let command = state
        .commands
        .issue_water_command(&id, &body.action, duration)
        .await?;

    Ok(Json(json!({ "success": true, "command": command })))
}

/// GET /api/debug/connections — hub introspection snapshot.
pub async fn debug_connections(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.hub.snapshot().await;
    let uptime_secs = (Utc::now() - state.hub.started_at()).num_seconds();
    Json(json!({
        "success": true,
        "connections": snapshot,
        "uptime": uptime_secs,
    }))
}
