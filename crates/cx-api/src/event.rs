//! Event types emitted by the WebSocket client to the embedding application.
//!
//! The application polls a [`SessionEventReceiver`] to observe connection
//! lifecycle changes. These events are informational: every failure that
//! affects a caller is also reported through that caller's own `Result`.

/// A lifecycle or observability event from a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The socket opened.
    Connected,

    /// The auth handshake succeeded (private clients only).
    Authorized,

    /// The socket closed or failed. All in-flight requests were rejected.
    Disconnected {
        /// Human-readable reason.
        reason: String,
        /// Number of in-flight requests rejected by the close.
        rejected: usize,
    },

    /// A correlated reply arrived for an id with no pending request (late
    /// reply after a timeout, or an unknown id).
    UnmatchedReply {
        /// Correlation id carried by the reply.
        oid: String,
    },

    /// A non-fatal problem (e.g. auth handshake rejected).
    Error {
        /// Error description.
        message: String,
    },
}

/// Sender half of the session event channel.
pub type SessionEventSender = tokio::sync::mpsc::UnboundedSender<SessionEvent>;

/// Receiver half of the session event channel.
pub type SessionEventReceiver = tokio::sync::mpsc::UnboundedReceiver<SessionEvent>;
