use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method};
use axum::{
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::commands::CommandRouter;
use crate::config::AppConfig;
use crate::store::Store;
use crate::ws::hub::SessionHub;
use crate::ws::session;

pub mod alarms;
pub mod devices;
pub mod error;
pub mod schedules;

pub use error::AppError;

/// HTTP request bodies are capped at 1 MiB.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: AppConfig,
    pub hub: Arc<SessionHub>,
    pub commands: Arc<CommandRouter>,
}

impl AppState {
    /// Create a new AppState with all shared resources.
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        let store = Store::new(pool);
        let hub = SessionHub::new();
        let commands = Arc::new(CommandRouter::new(hub.clone(), store.clone()));
        Self {
            store,
            config,
            hub,
            commands,
        }
    }
}

/// Build the main application router with all API routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Bidirectional message channel for devices and dashboards.
        .route("/ws", get(session::ws_handler))
        // Devices
        .route("/api/devices", get(devices::list))
        .route("/api/devices/register", post(devices::register))
        .route("/api/devices/:id/water", post(devices::water))
        .route("/api/devices/:id/alarms", get(alarms::list_for_device))
        .route("/api/devices/:id/schedules", get(schedules::list_for_device))
        // Recurring alarms
        .route("/api/alarms", post(alarms::create))
        .route("/api/alarms/:id/toggle", put(alarms::toggle))
        .route("/api/alarms/:id", delete(alarms::remove))
        // One-shot schedules
        .route("/api/schedules", post(schedules::create))
        // Debug
        .route("/api/debug/connections", get(devices::debug_connections))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// GET / — service banner.
async fn root() -> Json<Value> {
    Json(json!({
        "service": "pumphouse-server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// GET /health — database, websocket and device summary.
async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    sqlx::query("SELECT 1").execute(state.store.pool()).await?;

    let (total, online) = state.store.device_counts().await?;
    let snapshot = state.hub.snapshot().await;
    let uptime_secs = (Utc::now() - state.hub.started_at()).num_seconds();

    Ok(Json(json!({
        "status": "ok",
        "database": "connected",
        "websocket": {
            "activeConnections": snapshot.active_connections,
            "deviceSessions": snapshot.device_sessions.len(),
            "dashboards": snapshot.dashboard_count,
        },
        "devices": { "total": total, "online": online },
        "uptime": uptime_secs,
    })))
}
