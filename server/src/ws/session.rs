//! Per-connection protocol handler.
//!
//! One task per live transport: sends the `connected` hello, then loops over
//! inbound frames, outbound traffic routed through the hub handle, and the
//! keep-alive ping timer. A session starts unbound and is bound to a role by
//! its first join message. Handler errors become `error` frames; only
//! transport close/error (or eviction) ends the session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::hub::{SessionId, SessionSender};
use super::protocol::{self, Inbound};
use crate::api::AppState;
use crate::commands::{DEFAULT_WATER_MS, MAX_DURATION_MS, MIN_DURATION_MS};
use crate::store::{self, PUMP_IDLE, PUMP_RUNNING};

/// Inbound frames are capped at 16 KiB.
const MAX_FRAME_BYTES: usize = 16 * 1024;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// The role a session has been bound to by its first join message.
enum Binding {
    Unbound,
    Device { device_id: String },
    Dashboard,
}

/// GET /ws — the bidirectional message channel for devices and dashboards.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, state: AppState) {
    let session_id = next_session_id();
    state.hub.connection_opened().await;
    debug!(session_id, %addr, "WebSocket connection opened");

    let (tx, mut rx) = mpsc::channel::<Message>(32);
    let sender = SessionSender::new(tx);

    // Hello with the server version and the peer's observed address.
    let hello = protocol::frame(
        "connected",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "clientAddr": addr.to_string(),
        }),
    );
    if socket.send(hello).await.is_err() {
        state.hub.connection_closed().await;
        return;
    }

    let mut keepalive = tokio::time::interval(Duration::from_secs(state.config.keepalive_secs));
    keepalive.tick().await; // consume the immediate first tick

    let mut binding = Binding::Unbound;

    loop {
        tokio::select! {
            // Outbound traffic routed to this session: command frames,
            // dashboard broadcasts, and eviction close frames.
            out = rx.recv() => match out {
                Some(Message::Close(frame)) => {
                    let _ = socket.send(Message::Close(frame)).await;
                    break;
                }
                Some(msg) => {
                    if socket.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = keepalive.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    touch(&state, &binding, session_id).await;
                    dispatch(&text, &mut binding, &sender, &addr, session_id, &state).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    touch(&state, &binding, session_id).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary frames ignored
                Some(Err(e)) => {
                    warn!(session_id, "WebSocket error: {e}");
                    break;
                }
            },
        }
    }

    teardown(binding, session_id, &state).await;
    state.hub.connection_closed().await;
    debug!(session_id, "WebSocket connection closed");
}

/// Refresh `last_seen` on whatever the session is bound to.
async fn touch(state: &AppState, binding: &Binding, session_id: SessionId) {
    match binding {
        Binding::Device { device_id } => {
            state.hub.touch_device(device_id, session_id, Utc::now()).await;
        }
        Binding::Dashboard => state.hub.touch_dashboard(session_id, Utc::now()).await,
        Binding::Unbound => {}
    }
}

/// Release hub/store state held by a closing session.
async fn teardown(binding: Binding, session_id: SessionId, state: &AppState) {
    match binding {
        Binding::Device { device_id } => {
            // A superseded session must not mark its successor offline; the
            // hub only releases the binding if the session id still matches.
            if state.hub.drop_device(&device_id, session_id).await {
                if let Err(e) = state
                    .store
                    .set_device_status(&device_id, Some(false), Some(PUMP_IDLE))
                    .await
                {
                    warn!(device_id = %device_id, "Failed to persist offline status: {e}");
                }
                state
                    .commands
                    .broadcast_to_dashboards(
                        "device_disconnected",
                        json!({
                            "deviceId": device_id,
                            "status": "offline",
                            "reason": "connection closed",
                        }),
                    )
                    .await;
            }
        }
        Binding::Dashboard => {
            state.hub.drop_dashboard(session_id).await;
        }
        Binding::Unbound => {}
    }
}

/// Decode one inbound frame and dispatch it to its typed handler.
async fn dispatch(
    text: &str,
    binding: &mut Binding,
    sender: &SessionSender,
    addr: &SocketAddr,
    session_id: SessionId,
    state: &AppState,
) {
    let inbound = match Inbound::parse(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(session_id, "Rejected inbound frame: {}", e.message());
            sender.send(protocol::error_frame(&e.message()));
            return;
        }
    };

    let result = match inbound {
        Inbound::DeviceJoin(join) => {
            on_device_join(join, binding, sender, addr, session_id, state).await
        }
        Inbound::FrontendJoin => on_frontend_join(binding, sender, addr, session_id, state).await,
        Inbound::Heartbeat(hb) => on_heartbeat(hb, sender, session_id, state).await,
        Inbound::PumpStatus(msg) => on_pump_status(msg, sender, state).await,
        Inbound::CommandAck(msg) => on_command_ack(msg, state).await,
        Inbound::ScheduleExecuted(msg) => on_schedule_executed(msg, sender, state).await,
        Inbound::ManualCommand(cmd) => on_manual_command(cmd, binding, sender, state).await,
    };

    // Handler failures (store transients, serialization) are reported to the
    // peer; they never tear down the session.
    if let Err(e) = result {
        warn!(session_id, "Message handler failed: {e:#}");
        sender.send(protocol::error_frame(&format!("internal error: {e}")));
    }
}

async fn on_device_join(
    join: protocol::DeviceJoin,
    binding: &mut Binding,
    sender: &SessionSender,
    addr: &SocketAddr,
    session_id: SessionId,
    state: &AppState,
) -> anyhow::Result<()> {
    let device_id = store::normalize_device_id(&join.device_id);
    if device_id.is_empty() {
        sender.send(protocol::error_frame("deviceId must not be empty"));
        return Ok(());
    }

    // Rebinding to a different id releases the old binding first.
    if let Binding::Device { device_id: old } = binding {
        if *old != device_id && state.hub.drop_device(old, session_id).await {
            state
                .store
                .set_device_status(old, Some(false), Some(PUMP_IDLE))
                .await?;
            state
                .commands
                .broadcast_to_dashboards(
                    "device_disconnected",
                    json!({ "deviceId": old, "status": "offline", "reason": "rebound" }),
                )
                .await;
        }
    }

    let admit = state
        .hub
        .admit_device(session_id, &device_id, &addr.to_string(), sender.clone())
        .await;
    // Bind before the store writes, so teardown releases the hub entry even
    // if a mirror write below fails.
    *binding = Binding::Device {
        device_id: device_id.clone(),
    };

    // Store mirror follows the hub state; never under the hub lock.
    state
        .store
        .register_or_touch_device(&device_id, Some(&addr.ip().to_string()))
        .await?;
    state.store.bump_ws_connections(&device_id).await?;
    state.store.set_device_status(&device_id, Some(true), None).await?;

    // Broadcast before the join ack, so a dashboard can never observe an
    // acked device it has not heard of.
    state
        .commands
        .broadcast_to_dashboards(
            "device_connected",
            json!({
                "deviceId": &device_id,
                "status": "online",
                "reconnectCount": admit.reconnect_count,
            }),
        )
        .await;

    sender.send(protocol::frame(
        "device_joined",
        json!({
            "status": "success",
            "deviceId": device_id,
            "reconnectCount": admit.reconnect_count,
        }),
    ));
    Ok(())
}

async fn on_frontend_join(
    binding: &mut Binding,
    sender: &SessionSender,
    addr: &SocketAddr,
    session_id: SessionId,
    state: &AppState,
) -> anyhow::Result<()> {
    // A second frontend_join on the same session is ignored.
    if matches!(binding, Binding::Dashboard) {
        return Ok(());
    }

    state
        .hub
        .admit_dashboard(session_id, &addr.to_string(), sender.clone())
        .await;
    *binding = Binding::Dashboard;

    // One-shot snapshot of the device table, to this dashboard only.
    let devices = state.store.list_devices().await?;
    let count = devices.len();
    sender.send(protocol::frame(
        "device_list",
        json!({ "devices": devices, "count": count }),
    ));
    Ok(())
}

async fn on_heartbeat(
    hb: protocol::Heartbeat,
    sender: &SessionSender,
    session_id: SessionId,
    state: &AppState,
) -> anyhow::Result<()> {
    let device_id = store::normalize_device_id(&hb.device_id);
    state.store.record_heartbeat(&device_id).await?;
    state.hub.touch_device(&device_id, session_id, Utc::now()).await;

    sender.send(protocol::frame(
        "heartbeat_ack",
        json!({
            "serverTime": Utc::now().to_rfc3339(),
            "uptime": hb.uptime,
            "freeHeap": hb.free_heap,
            "rssi": hb.rssi,
        }),
    ));
    Ok(())
}

async fn on_pump_status(
    msg: protocol::PumpStatus,
    sender: &SessionSender,
    state: &AppState,
) -> anyhow::Result<()> {
    let device_id = store::normalize_device_id(&msg.device_id);
    let status = match msg.status.as_str() {
        "running" => PUMP_RUNNING,
        // Firmware reports "stopped" after a run; dashboards only know idle.
        "idle" | "stopped" => PUMP_IDLE,
        other => {
            sender.send(protocol::error_frame(&format!(
                "invalid pump status \"{other}\"; expected running, idle or stopped"
            )));
            return Ok(());
        }
    };

    state
        .store
        .set_device_status(&device_id, None, Some(status))
        .await?;
    state
        .commands
        .broadcast_to_dashboards(
            "pump_status_update",
            json!({ "deviceId": &device_id, "status": status }),
        )
        .await;

    sender.send(protocol::frame(
        "status_received",
        json!({ "deviceId": device_id, "status": status }),
    ));
    Ok(())
}

async fn on_command_ack(msg: protocol::CommandAck, state: &AppState) -> anyhow::Result<()> {
    let device_id = store::normalize_device_id(&msg.device_id);
    state
        .commands
        .broadcast_to_dashboards(
            "command_acknowledged",
            json!({
                "deviceId": device_id,
                "commandId": msg.command_id,
                "status": msg.status,
            }),
        )
        .await;
    Ok(())
}

async fn on_schedule_executed(
    msg: protocol::ScheduleExecuted,
    sender: &SessionSender,
    state: &AppState,
) -> anyhow::Result<()> {
    let device_id = store::normalize_device_id(&msg.device_id);

    // The inbound side accepts either vocabulary; the broadcast always uses
    // the concrete entity's name.
    if let Some(schedule_id) = &msg.schedule_id {
        match state.store.find_schedule(schedule_id).await? {
            Some(schedule) => {
                state
                    .commands
                    .broadcast_to_dashboards(
                        "schedule_executed",
                        json!({
                            "scheduleId": schedule.id,
                            "deviceId": &device_id,
                            "status": schedule.status,
                        }),
                    )
                    .await;
            }
            None => {
                sender.send(protocol::error_frame(&format!(
                    "unknown schedule \"{schedule_id}\""
                )));
            }
        }
        return Ok(());
    }

    if let Some(alarm_id) = &msg.alarm_id {
        match state.store.find_alarm(alarm_id).await? {
            // Recurring alarm state is advanced by the engine, not by
            // device confirmations.
            Some(alarm) => {
                state
                    .commands
                    .broadcast_to_dashboards(
                        "alarm_executed",
                        json!({
                            "alarmId": alarm.id,
                            "alarmName": alarm.name,
                            "deviceId": &device_id,
                            "confirmedByDevice": true,
                        }),
                    )
                    .await;
            }
            None => {
                sender.send(protocol::error_frame(&format!("unknown alarm \"{alarm_id}\"")));
            }
        }
    }
    Ok(())
}

async fn on_manual_command(
    cmd: protocol::ManualCommand,
    binding: &Binding,
    sender: &SessionSender,
    state: &AppState,
) -> anyhow::Result<()> {
    if !matches!(binding, Binding::Dashboard) {
        sender.send(protocol::error_frame(
            "manual_command is only accepted from dashboards",
        ));
        return Ok(());
    }

    let device_id = store::normalize_device_id(&cmd.device_id);
    let duration = match cmd.action.as_str() {
        "water" => {
            let duration = cmd.duration.unwrap_or(DEFAULT_WATER_MS);
            if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&duration) {
                sender.send(protocol::error_frame(&format!(
                    "duration must be between {MIN_DURATION_MS} and {MAX_DURATION_MS} ms"
                )));
                return Ok(());
            }
            duration
        }
        "stop" => 0,
        other => {
            sender.send(protocol::error_frame(&format!(
                "invalid action \"{other}\"; expected water or stop"
            )));
            return Ok(());
        }
    };

    match state
        .commands
        .issue_water_command(&device_id, &cmd.action, duration)
        .await
    {
        Ok(envelope) => {
            sender.send(protocol::frame(
                "command_sent",
                json!({ "deviceId": device_id, "command": envelope }),
            ));
        }
        Err(e) => {
            sender.send(protocol::error_frame(&e.message()));
        }
    }
    Ok(())
}
