//! Typed error definitions for the CEX.IO client.
//!
//! Every engine and transport operation returns [`CexError`] so callers can
//! match on the failure kind (e.g. retry on [`CexError::RequestTimeout`] but
//! not on [`CexError::AuthFailure`]). All variants implement
//! `std::error::Error` via `thiserror`, so they also flow into `anyhow::Result`
//! at the binary boundary.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Domain-specific errors for the CEX.IO client.
#[derive(Debug, Clone, Error)]
pub enum CexError {
    /// No open transport to send on.
    #[error("not connected")]
    NotConnected,

    /// A private call was issued before the auth handshake succeeded.
    #[error("not authorized")]
    NotAuthorized,

    /// Private call on a public client, or public call on a private client.
    #[error("wrong client mode: {0}")]
    WrongClientMode(String),

    /// The server rejected the auth handshake.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// No reply arrived within the configured window.
    #[error("request '{action}' timed out after {timeout:?}")]
    RequestTimeout {
        /// Action name of the timed-out request.
        action: String,
        /// Window that elapsed.
        timeout: Duration,
    },

    /// Socket-level failure: close, read/write error, or failed connect.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server replied with a failure status.
    #[error("application error: {message}")]
    Application {
        /// Server-provided error text.
        message: String,
        /// Full `data` payload of the reply.
        payload: serde_json::Value,
    },

    /// HTTP transport returned a non-200 status or an `error` body.
    #[error("http error {status_code}: {error}")]
    Http {
        /// HTTP status code.
        status_code: u16,
        /// Server-provided error text (or raw body).
        error: String,
    },

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Frame or response body could not be (de)serialized.
    #[error("parse error: {0}")]
    Parse(String),

    /// Attempt to subscribe to an event name the engine reserves.
    #[error("event name '{0}' is reserved")]
    ReservedEvent(String),
}

impl From<serde_json::Error> for CexError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

impl From<tungstenite::Error> for CexError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_error_displays_server_message() {
        let err = CexError::Application {
            message: "rate limited".into(),
            payload: serde_json::json!({ "error": "rate limited" }),
        };
        assert_eq!(err.to_string(), "application error: rate limited");
    }

    #[test]
    fn json_error_maps_to_parse() {
        let err: CexError = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err().into();
        assert!(matches!(err, CexError::Parse(_)));
    }
}
