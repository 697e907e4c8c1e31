//! Wire protocol: the outbound frame envelope and the inbound message
//! catalogue.
//!
//! Every outbound frame is `{type, data, timestamp, server}` with an RFC 3339
//! server wall-clock timestamp. Inbound frames carry a `type` plus payload
//! fields either flat beside it (device firmware) or nested under `data`
//! (dashboards); [`Inbound::parse`] accepts both shapes and hands each
//! handler a typed payload.

use axum::extract::ws::Message;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

/// Identifier stamped into every outbound frame envelope.
pub const SERVER_TAG: &str = concat!("pumphouse-server/", env!("CARGO_PKG_VERSION"));

/// Message types accepted from peers, echoed in unknown-type error frames.
pub const SUPPORTED_TYPES: &[&str] = &[
    "device_join",
    "frontend_join",
    "heartbeat",
    "pump_status",
    "command_ack",
    "schedule_executed",
    "manual_command",
];

/// Build an outbound frame.
pub fn frame(kind: &str, data: Value) -> Message {
    Message::Text(
        json!({
            "type": kind,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
            "server": SERVER_TAG,
        })
        .to_string(),
    )
}

/// Build an `error` frame. Protocol errors never close the session.
pub fn error_frame(message: &str) -> Message {
    frame("error", json!({ "message": message }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceJoin {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub device_id: String,
    #[serde(default)]
    pub uptime: Option<i64>,
    #[serde(default)]
    pub free_heap: Option<i64>,
    #[serde(default)]
    pub rssi: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpStatus {
    pub device_id: String,
    /// `running` | `idle` | `stopped` (normalized to `idle` downstream).
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub device_id: String,
    pub command_id: String,
    pub status: String,
}

/// Confirmation that a scheduled watering ran on-device. The original wire
/// protocol mixed alarm and schedule vocabulary here, so either id field is
/// accepted; at least one must be present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleExecuted {
    pub device_id: String,
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub alarm_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualCommand {
    pub device_id: String,
    /// `water` | `stop`.
    pub action: String,
    #[serde(default)]
    pub duration: Option<i64>,
}

/// A decoded inbound message, dispatched by type.
#[derive(Debug)]
pub enum Inbound {
    DeviceJoin(DeviceJoin),
    FrontendJoin,
    Heartbeat(Heartbeat),
    PumpStatus(PumpStatus),
    CommandAck(CommandAck),
    ScheduleExecuted(ScheduleExecuted),
    ManualCommand(ManualCommand),
}

/// Why an inbound frame was rejected. Reported to the peer as an `error`
/// frame; the session stays open.
#[derive(Debug)]
pub enum ParseError {
    /// The body was not a JSON object.
    NotAnObject,
    /// The object has no string `type` field.
    MissingType,
    /// `type` is not in the catalogue.
    UnknownType(String),
    /// Known type, but the payload is missing or has malformed fields.
    BadPayload { kind: &'static str, detail: String },
}

impl ParseError {
    /// The message placed in the `error` frame sent back to the peer.
    pub fn message(&self) -> String {
        match self {
            ParseError::NotAnObject => "invalid message: expected a JSON object".to_string(),
            ParseError::MissingType => "invalid message: missing \"type\" field".to_string(),
            ParseError::UnknownType(kind) => format!(
                "unknown message type \"{kind}\"; supported types: {}",
                SUPPORTED_TYPES.join(", ")
            ),
            ParseError::BadPayload { kind, detail } => {
                format!("invalid {kind} payload: {detail}")
            }
        }
    }
}

impl Inbound {
    /// Decode one inbound text frame.
    pub fn parse(text: &str) -> Result<Inbound, ParseError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ParseError::NotAnObject)?;
        let Value::Object(mut obj) = value else {
            return Err(ParseError::NotAnObject);
        };

        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ParseError::MissingType)?;

        // Merge a nested `data` object into the top level; explicit
        // top-level fields win.
        if let Some(Value::Object(data)) = obj.remove("data") {
            for (key, val) in data {
                obj.entry(key).or_insert(val);
            }
        }
        let payload = Value::Object(obj);

        fn typed<T: serde::de::DeserializeOwned>(
            kind: &'static str,
            payload: Value,
        ) -> Result<T, ParseError> {
            serde_json::from_value(payload).map_err(|e| ParseError::BadPayload {
                kind,
                detail: e.to_string(),
            })
        }

        match kind.as_str() {
            "device_join" => Ok(Inbound::DeviceJoin(typed("device_join", payload)?)),
            "frontend_join" => Ok(Inbound::FrontendJoin),
            "heartbeat" => Ok(Inbound::Heartbeat(typed("heartbeat", payload)?)),
            "pump_status" => Ok(Inbound::PumpStatus(typed("pump_status", payload)?)),
            "command_ack" => Ok(Inbound::CommandAck(typed("command_ack", payload)?)),
            "schedule_executed" => {
                let msg: ScheduleExecuted = typed("schedule_executed", payload)?;
                if msg.schedule_id.is_none() && msg.alarm_id.is_none() {
                    return Err(ParseError::BadPayload {
                        kind: "schedule_executed",
                        detail: "requires scheduleId or alarmId".to_string(),
                    });
                }
                Ok(Inbound::ScheduleExecuted(msg))
            }
            "manual_command" => Ok(Inbound::ManualCommand(typed("manual_command", payload)?)),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_device_join() {
        let inbound =
            Inbound::parse(r#"{"type":"device_join","deviceId":"STRWSMK1"}"#).unwrap();
        match inbound {
            Inbound::DeviceJoin(join) => assert_eq!(join.device_id, "STRWSMK1"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_nested_data_payload() {
        let inbound = Inbound::parse(
            r#"{"type":"manual_command","data":{"deviceId":"PUMP1","action":"water","duration":5000}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::ManualCommand(cmd) => {
                assert_eq!(cmd.device_id, "PUMP1");
                assert_eq!(cmd.action, "water");
                assert_eq!(cmd.duration, Some(5000));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_top_level_fields_win_over_data() {
        let inbound = Inbound::parse(
            r#"{"type":"heartbeat","deviceId":"OUTER","data":{"deviceId":"INNER","rssi":-61}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Heartbeat(hb) => {
                assert_eq!(hb.device_id, "OUTER");
                assert_eq!(hb.rssi, Some(-61));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            Inbound::parse("not json"),
            Err(ParseError::NotAnObject)
        ));
        assert!(matches!(
            Inbound::parse(r#"[1,2,3]"#),
            Err(ParseError::NotAnObject)
        ));
    }

    #[test]
    fn test_parse_unknown_type_lists_catalogue() {
        let err = Inbound::parse(r#"{"type":"reboot"}"#).unwrap_err();
        let message = err.message();
        assert!(message.contains("reboot"));
        for kind in SUPPORTED_TYPES {
            assert!(message.contains(kind), "missing {kind} in: {message}");
        }
    }

    #[test]
    fn test_parse_missing_required_field() {
        let err = Inbound::parse(r#"{"type":"pump_status","deviceId":"PUMP1"}"#).unwrap_err();
        assert!(matches!(err, ParseError::BadPayload { kind: "pump_status", .. }));
    }

    #[test]
    fn test_schedule_executed_requires_some_id() {
        let err = Inbound::parse(r#"{"type":"schedule_executed","deviceId":"PUMP1"}"#).unwrap_err();
        assert!(matches!(
            err,
            ParseError::BadPayload { kind: "schedule_executed", .. }
        ));

        let ok = Inbound::parse(
            r#"{"type":"schedule_executed","deviceId":"PUMP1","alarmId":"a-1"}"#,
        )
        .unwrap();
        match ok {
            Inbound::ScheduleExecuted(msg) => assert_eq!(msg.alarm_id.as_deref(), Some("a-1")),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_frame_envelope_shape() {
        let Message::Text(text) = frame("connected", json!({"version": "1"})) else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["data"]["version"], "1");
        assert_eq!(value["server"], SERVER_TAG);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
