//! CEX.IO WebSocket wire format.
//!
//! | Direction | Shape                                                      |
//! |-----------|------------------------------------------------------------|
//! | out       | `{"e": action, "data": params, "oid": id}`                 |
//! | out       | `{"e": "auth", "auth": {key, signature, timestamp}, "oid": "auth"}` |
//! | out       | `{"e": "ping"}` / `{"e": "pong"}`                          |
//! | in        | `{"e": event, ...}` unsolicited push                       |
//! | in        | `{"e": action, "oid": id, "ok": "ok" \| "error", "data": ...}` reply |
//! | in        | `{"e": "pong"}` keepalive                                  |

use cx_core::CexError;
use serde::Serialize;
use serde_json::Value;

use crate::auth;

/// Reserved event name (and oid) of the auth handshake.
pub const AUTH_EVENT: &str = "auth";
/// Status value marking a successful reply.
pub const STATUS_OK: &str = "ok";
/// Heartbeat request event.
pub const PING_EVENT: &str = "ping";
/// Heartbeat reply event.
pub const PONG_EVENT: &str = "pong";

#[derive(Serialize)]
struct RequestFrame<'a> {
    e: &'a str,
    data: &'a Value,
    oid: &'a str,
}

#[derive(Serialize)]
struct AuthFrame<'a> {
    e: &'a str,
    auth: AuthPayload<'a>,
    oid: &'a str,
}

#[derive(Serialize)]
struct AuthPayload<'a> {
    key: &'a str,
    signature: String,
    timestamp: f64,
}

#[derive(Serialize)]
struct EventFrame<'a> {
    e: &'a str,
}

/// Serialize a correlated request frame.
pub fn request_frame(action: &str, data: &Value, oid: &str) -> Result<String, CexError> {
    Ok(serde_json::to_string(&RequestFrame { e: action, data, oid })?)
}

/// Serialize a signed auth handshake frame for `timestamp` (Unix seconds).
pub fn auth_frame(api_key: &str, secret: &str, timestamp: f64) -> Result<String, CexError> {
    let frame = AuthFrame {
        e: AUTH_EVENT,
        auth: AuthPayload {
            key: api_key,
            signature: auth::ws_auth_signature(api_key, secret, timestamp),
            timestamp,
        },
        oid: AUTH_EVENT,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Serialize a bare `{"e": event}` frame (heartbeats).
pub fn event_frame(event: &str) -> String {
    // A single string field cannot fail to serialize.
    serde_json::to_string(&EventFrame { e: event }).unwrap_or_default()
}

/// Event name of an inbound frame.
pub fn event_name(frame: &Value) -> Option<&str> {
    frame.get("e").and_then(Value::as_str)
}

/// Correlation id of an inbound frame.
pub fn oid(frame: &Value) -> Option<&str> {
    frame.get("oid").and_then(Value::as_str)
}

/// Extract the server error text from a reply's `data` payload.
pub fn error_text(data: Option<&Value>) -> Option<String> {
    match data?.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_frame_shape() {
        let frame = request_frame("get_balance", &json!({}), "123").unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed, json!({ "e": "get_balance", "data": {}, "oid": "123" }));
    }

    #[test]
    fn auth_frame_is_signed() {
        let frame = auth_frame("K", "S", 1_700_000_000.5).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["e"], "auth");
        assert_eq!(parsed["oid"], "auth");
        assert_eq!(parsed["auth"]["key"], "K");
        assert_eq!(parsed["auth"]["timestamp"], 1_700_000_000.5);
        assert_eq!(parsed["auth"]["signature"], auth::hmac_sha256_sign("S", "1700000000.5K"));
    }

    #[test]
    fn signature_covers_wire_timestamp_text() {
        let frame = auth_frame("K", "S", 1_700_000_000.0).unwrap();
        assert!(frame.contains(r#""timestamp":1700000000.0"#));

        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["auth"]["signature"], auth::hmac_sha256_sign("S", "1700000000.0K"));
    }

    #[test]
    fn heartbeat_frames() {
        assert_eq!(event_frame(PING_EVENT), r#"{"e":"ping"}"#);
        assert_eq!(event_frame(PONG_EVENT), r#"{"e":"pong"}"#);
    }

    #[test]
    fn error_text_handles_shapes() {
        assert_eq!(error_text(Some(&json!({ "error": "bad sig" }))).as_deref(), Some("bad sig"));
        assert_eq!(error_text(Some(&json!({ "error": { "code": 5 } }))).as_deref(), Some(r#"{"code":5}"#));
        assert_eq!(error_text(Some(&json!({ "balance": 1 }))), None);
        assert_eq!(error_text(None), None);
    }
}
