//! Auth handshake state machine.
//!
//! ```text
//! Unauthenticated ──begin──▶ Authenticating ──ok reply──▶ Authorized
//!                                  │
//!                                  └──error reply / timeout──▶ Failed
//! ```
//!
//! One gate per connection; a fresh connection starts `Unauthenticated`.
//! The gate is private to the session and never shares the user
//! subscription table, so the reserved `auth` event cannot collide with a
//! user handler.

use std::time::Duration;

use cx_core::CexError;
use serde_json::Value;
use tokio::task::AbortHandle;

use super::protocol::{self, STATUS_OK};

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authorized,
    Failed,
}

#[derive(Debug)]
pub struct AuthGate {
    state: AuthState,
    timeout: Option<AbortHandle>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self {
            state: AuthState::Unauthenticated,
            timeout: None,
        }
    }
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Enter `Authenticating`, taking ownership of the handshake timeout.
    pub fn begin(&mut self, timeout: AbortHandle) {
        self.cancel_timeout();
        self.state = AuthState::Authenticating;
        self.timeout = Some(timeout);
    }

    /// Apply an `auth` reply frame.
    ///
    /// Returns `None` when no handshake is in progress (stray or duplicate
    /// reply), otherwise the handshake outcome.
    pub fn complete(&mut self, frame: &Value) -> Option<Result<(), CexError>> {
        if self.state != AuthState::Authenticating {
            return None;
        }
        self.cancel_timeout();

        let data = frame.get("data");
        // The status may sit inside `data` or at the top level.
        let status = data
            .and_then(|d| d.get("ok"))
            .or_else(|| frame.get("ok"))
            .and_then(Value::as_str);

        if status == Some(STATUS_OK) {
            self.state = AuthState::Authorized;
            Some(Ok(()))
        } else {
            self.state = AuthState::Failed;
            let message =
                protocol::error_text(data).unwrap_or_else(|| "auth rejected by server".to_string());
            Some(Err(CexError::AuthFailure(message)))
        }
    }

    /// Handshake timeout fired. Returns the error to report, or `None` if
    /// the handshake already settled.
    pub fn expire(&mut self, timeout: Duration) -> Option<CexError> {
        if self.state != AuthState::Authenticating {
            return None;
        }
        self.timeout = None;
        self.state = AuthState::Failed;
        Some(CexError::RequestTimeout {
            action: protocol::AUTH_EVENT.to_string(),
            timeout,
        })
    }

    /// Mark the handshake failed without a server reply (e.g. send failure).
    pub fn fail(&mut self) {
        self.cancel_timeout();
        self.state = AuthState::Failed;
    }

    /// Connection lost: drop any in-progress handshake.
    pub fn reset(&mut self) {
        self.cancel_timeout();
        self.state = AuthState::Unauthenticated;
    }

    fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }
}
