//! Inbound frame classification.
//!
//! Precedence, first match wins:
//!
//! 1. `e == "auth"` → the session's auth gate (reserved, never user-visible)
//! 2. `e` has a user subscription → that callback
//! 3. `oid` present → correlated reply
//! 4. `e == "pong"` → keepalive, dropped
//! 5. `e == "ping"` → server heartbeat, answered with a pong
//! 6. anything else → logged as unrecognized

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use cx_core::CexError;
use serde_json::Value;

use super::correlation::Reply;
use super::protocol::{self, AUTH_EVENT, PING_EVENT, PONG_EVENT, STATUS_OK};

/// Callback invoked with each pushed frame for a subscribed event name.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Named event handler table shared between a client and its sessions.
///
/// Survives reconnects; one callback per event name, last registration wins.
#[derive(Clone, Default)]
pub struct Subscriptions {
    handlers: Arc<Mutex<AHashMap<String, EventCallback>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`, replacing any previous one.
    pub fn insert(&self, event: &str, callback: EventCallback) -> Result<(), CexError> {
        if event == AUTH_EVENT {
            return Err(CexError::ReservedEvent(event.to_string()));
        }
        self.lock().insert(event.to_string(), callback);
        Ok(())
    }

    /// Remove the callback for `event`. Returns whether one was registered.
    pub fn remove(&self, event: &str) -> bool {
        self.lock().remove(event).is_some()
    }

    /// Clone out the callback for `event`, so it runs without the lock held.
    pub fn get(&self, event: &str) -> Option<EventCallback> {
        self.lock().get(event).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, AHashMap<String, EventCallback>> {
        // Callbacks never run under the lock, so a poisoned map is still consistent.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions").field("len", &self.len()).finish()
    }
}

/// Where an inbound frame goes.
pub enum Route<'a> {
    /// Reply to the auth handshake.
    Auth,
    /// Push for a subscribed event name.
    Event(EventCallback),
    /// Correlated reply for `oid`.
    Reply { oid: &'a str },
    /// `{"e":"pong"}`.
    Keepalive,
    /// Server-initiated `{"e":"ping"}`.
    Ping,
    /// No known shape.
    Unrecognized,
}

impl std::fmt::Debug for Route<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => f.write_str("Auth"),
            Self::Event(_) => f.write_str("Event"),
            Self::Reply { oid } => f.debug_struct("Reply").field("oid", oid).finish(),
            Self::Keepalive => f.write_str("Keepalive"),
            Self::Ping => f.write_str("Ping"),
            Self::Unrecognized => f.write_str("Unrecognized"),
        }
    }
}

/// Classify an inbound frame.
pub fn route<'a>(frame: &'a Value, subscriptions: &Subscriptions) -> Route<'a> {
    let event = protocol::event_name(frame);

    if event == Some(AUTH_EVENT) {
        return Route::Auth;
    }
    if let Some(callback) = event.and_then(|e| subscriptions.get(e)) {
        return Route::Event(callback);
    }
    if let Some(oid) = protocol::oid(frame) {
        return Route::Reply { oid };
    }
    match event {
        Some(PONG_EVENT) => Route::Keepalive,
        Some(PING_EVENT) => Route::Ping,
        _ => Route::Unrecognized,
    }
}

/// Outcome of a correlated reply: its `data` on `ok == "ok"`, otherwise an
/// [`CexError::Application`] carrying `data.error` and the payload.
pub fn reply_outcome(frame: &Value) -> Reply {
    let data = frame.get("data");
    if frame.get("ok").and_then(Value::as_str) == Some(STATUS_OK) {
        return Ok(data.cloned().unwrap_or(Value::Null));
    }
    let message = protocol::error_text(data).unwrap_or_else(|| {
        match frame.get("ok").and_then(Value::as_str) {
            Some(status) => format!("request failed with status '{status}'"),
            None => "request failed".to_string(),
        }
    });
    Err(CexError::Application {
        message,
        payload: data.cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_frame: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn routes_by_precedence() {
        let subs = Subscriptions::new();
        let hits = Arc::new(AtomicUsize::new(0));
        subs.insert("tick", counting_callback(&hits)).unwrap();

        assert!(matches!(route(&json!({ "e": "auth", "oid": "auth" }), &subs), Route::Auth));
        assert!(matches!(route(&json!({ "e": "tick", "oid": "1" }), &subs), Route::Event(_)));
        assert!(matches!(
            route(&json!({ "e": "get_balance", "oid": "9", "ok": "ok" }), &subs),
            Route::Reply { oid: "9" }
        ));
        assert!(matches!(route(&json!({ "oid": "9" }), &subs), Route::Reply { oid: "9" }));
        assert!(matches!(route(&json!({ "e": "pong" }), &subs), Route::Keepalive));
        assert!(matches!(route(&json!({ "e": "ping" }), &subs), Route::Ping));
        assert!(matches!(route(&json!({ "e": "mystery" }), &subs), Route::Unrecognized));
        assert!(matches!(route(&json!([1, 2, 3]), &subs), Route::Unrecognized));
    }

    #[test]
    fn auth_is_reserved() {
        let subs = Subscriptions::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let err = subs.insert("auth", counting_callback(&hits)).unwrap_err();
        assert!(matches!(err, CexError::ReservedEvent(_)));
        assert!(subs.is_empty());
    }

    #[test]
    fn last_subscription_wins() {
        let subs = Subscriptions::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        subs.insert("tick", counting_callback(&first)).unwrap();
        subs.insert("tick", counting_callback(&second)).unwrap();
        assert_eq!(subs.len(), 1);

        if let Route::Event(cb) = route(&json!({ "e": "tick" }), &subs) {
            cb(&json!({ "e": "tick" }));
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        assert!(subs.remove("tick"));
        assert!(matches!(route(&json!({ "e": "tick" }), &subs), Route::Unrecognized));
    }

    #[test]
    fn reply_outcomes() {
        let ok = reply_outcome(&json!({ "oid": "123", "ok": "ok", "data": { "balance": 100 } }));
        assert_eq!(ok.unwrap(), json!({ "balance": 100 }));

        let err = reply_outcome(&json!({ "oid": "123", "ok": "error", "data": { "error": "rate limited" } }));
        match err {
            Err(CexError::Application { message, payload }) => {
                assert_eq!(message, "rate limited");
                assert_eq!(payload, json!({ "error": "rate limited" }));
            }
            other => panic!("expected application error, got {other:?}"),
        }

        let bare = reply_outcome(&json!({ "oid": "123", "ok": "error" }));
        assert!(bare.unwrap_err().to_string().contains("status 'error'"));

        assert_eq!(reply_outcome(&json!({ "oid": "1", "ok": "ok" })).unwrap(), Value::Null);
    }
}
