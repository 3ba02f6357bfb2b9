//! Per-connection session task.
//!
//! A [`Session`] is created for every successful socket open and runs until
//! that socket closes. It is the single owner of the correlation table and
//! the auth gate: caller commands, timeout firings, and inbound frames are
//! all funnelled into its loop through channels and handled one at a time,
//! so no table operation ever races another.
//!
//! ```text
//! client ──SessionCmd──▶ ┌─────────┐ ──frame──▶ FrameSink (socket)
//! timers ──SessionCmd──▶ │ Session │
//! socket ──WsEvent─────▶ └─────────┘ ──Reply──▶ caller oneshot
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cx_core::CexError;
use cx_core::time_util;
use cx_core::ws::{WsConnection, WsEvent, WsEventReceiver};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::correlation::{self, CorrelationTable, PendingRequest, Reply};
use super::gate::AuthGate;
use super::protocol::{self, PONG_EVENT};
use super::router::{self, Route, Subscriptions};
use crate::event::{SessionEvent, SessionEventSender};

/// Outbound half of a connection as seen by the session.
pub trait FrameSink: Send + 'static {
    /// Queue a frame. An `Err` means the frame was not and will not be sent.
    fn send_frame(&self, frame: String) -> Result<(), CexError>;

    /// Begin closing the connection; the close is reported back as a
    /// [`WsEvent::Closed`].
    fn close(&self);
}

impl FrameSink for WsConnection {
    fn send_frame(&self, frame: String) -> Result<(), CexError> {
        self.send(frame)
    }

    fn close(&self) {
        WsConnection::close(self);
    }
}

/// Which endpoint and call path a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Authenticated endpoint; `call` only.
    Private,
    /// Public endpoint; `call_public` only.
    Public,
}

impl ClientMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl std::fmt::Display for ClientMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection flags readable from any task.
#[derive(Debug, Default)]
pub struct SessionState {
    connected: AtomicBool,
    authorized: AtomicBool,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::SeqCst);
    }

    fn set_authorized(&self, value: bool) {
        self.authorized.store(value, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.set_authorized(false);
        self.set_connected(false);
    }
}

/// API key pair used by the auth handshake.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Work item for the session loop.
#[derive(Debug)]
pub(crate) enum SessionCmd {
    /// Issue a correlated request.
    Call {
        action: String,
        data: Value,
        mode: ClientMode,
        reply: oneshot::Sender<Reply>,
    },
    /// Request timeout fired.
    Expire { oid: String },
    /// Auth handshake timeout fired.
    AuthExpired,
    /// Close the connection.
    Disconnect,
}

pub(crate) type SessionCmdSender = mpsc::UnboundedSender<SessionCmd>;
pub(crate) type SessionCmdReceiver = mpsc::UnboundedReceiver<SessionCmd>;

/// Readiness of a session: `None` while the socket is open but not yet
/// usable, then the outcome `connect()` reports. Set once.
pub(crate) type Readiness = Option<Result<(), CexError>>;
pub(crate) type ReadySender = watch::Sender<Readiness>;
pub(crate) type ReadyReceiver = watch::Receiver<Readiness>;

/// Everything a session needs, gathered by the client at connect time.
pub(crate) struct SessionParams<S> {
    pub mode: ClientMode,
    pub sink: S,
    pub credentials: Option<Credentials>,
    pub state: Arc<SessionState>,
    pub subscriptions: Subscriptions,
    pub request_timeout: Duration,
    pub events: SessionEventSender,
    pub cmd_tx: SessionCmdSender,
    pub ready: ReadySender,
}

pub(crate) struct Session<S: FrameSink> {
    mode: ClientMode,
    sink: S,
    credentials: Option<Credentials>,
    state: Arc<SessionState>,
    subscriptions: Subscriptions,
    request_timeout: Duration,
    events: SessionEventSender,
    cmd_tx: SessionCmdSender,
    ready: ReadySender,
    table: CorrelationTable,
    auth: AuthGate,
}

impl<S: FrameSink> Session<S> {
    pub fn new(params: SessionParams<S>) -> Self {
        let SessionParams {
            mode,
            sink,
            credentials,
            state,
            subscriptions,
            request_timeout,
            events,
            cmd_tx,
            ready,
        } = params;
        Self {
            mode,
            sink,
            credentials,
            state,
            subscriptions,
            request_timeout,
            events,
            cmd_tx,
            ready,
            table: CorrelationTable::new(),
            auth: AuthGate::new(),
        }
    }

    /// Drive the session until the connection closes.
    pub async fn run(mut self, mut cmd_rx: SessionCmdReceiver, mut ws_rx: WsEventReceiver) {
        self.start();
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => self.handle_command(cmd),
                event = ws_rx.recv() => match event {
                    Some(WsEvent::Text(text)) => self.handle_text(&text),
                    Some(WsEvent::Closed { reason }) => {
                        self.handle_closed(reason);
                        break;
                    }
                    None => {
                        self.handle_closed("connection task ended".to_string());
                        break;
                    }
                },
            }
        }
        debug!("[cex-ws] {} session finished", self.mode);
    }

    /// Socket is open: publish it and settle or gate `connect()`.
    fn start(&mut self) {
        self.state.set_connected(true);
        let _ = self.events.send(SessionEvent::Connected);
        match self.mode {
            ClientMode::Public => {
                info!("[cex-ws] public session ready");
                self.settle_ready(Ok(()));
            }
            ClientMode::Private => self.begin_auth(),
        }
    }

    fn begin_auth(&mut self) {
        let Some(creds) = &self.credentials else {
            self.fail_handshake(CexError::Config("private session without credentials".into()));
            return;
        };
        let frame = match protocol::auth_frame(
            &creds.api_key,
            &creds.secret_key,
            time_util::now_secs_f64(),
        ) {
            Ok(frame) => frame,
            Err(e) => {
                self.fail_handshake(e);
                return;
            }
        };

        let timeout = self.schedule(self.request_timeout, SessionCmd::AuthExpired);
        self.auth.begin(timeout);
        info!("[cex-ws] authenticating");
        if let Err(e) = self.sink.send_frame(frame) {
            self.auth.fail();
            self.fail_handshake(e);
        }
    }

    pub(crate) fn handle_command(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::Call {
                action,
                data,
                mode,
                reply,
            } => self.handle_call(action, data, mode, reply),
            SessionCmd::Expire { oid } => {
                if self.table.expire(&oid, self.request_timeout) {
                    warn!("[cex-ws] request {oid} timed out after {:?}", self.request_timeout);
                }
            }
            SessionCmd::AuthExpired => {
                if let Some(err) = self.auth.expire(self.request_timeout) {
                    self.fail_handshake(err);
                }
            }
            SessionCmd::Disconnect => {
                info!("[cex-ws] disconnect requested");
                self.sink.close();
            }
        }
    }

    fn handle_call(
        &mut self,
        action: String,
        data: Value,
        mode: ClientMode,
        reply: oneshot::Sender<Reply>,
    ) {
        if mode != self.mode {
            let _ = reply.send(Err(CexError::WrongClientMode(format!(
                "{mode} call on a {} client",
                self.mode
            ))));
            return;
        }
        if !self.state.is_connected() {
            let _ = reply.send(Err(CexError::NotConnected));
            return;
        }
        if mode == ClientMode::Private && !self.state.is_authorized() {
            let _ = reply.send(Err(CexError::NotAuthorized));
            return;
        }

        let oid = correlation::next_oid(&action);
        let frame = match protocol::request_frame(&action, &data, &oid) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let timeout = self.schedule(self.request_timeout, SessionCmd::Expire { oid: oid.clone() });
        self.table.insert(oid.clone(), PendingRequest::new(action, reply, timeout));

        debug!("[cex-ws] -> {frame}");
        if let Err(e) = self.sink.send_frame(frame) {
            warn!("[cex-ws] send failed for {oid}: {e}");
            self.table.settle(&oid, Err(e));
        }
    }

    pub(crate) fn handle_text(&mut self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[cex-ws] dropping non-JSON frame: {e}");
                return;
            }
        };

        match router::route(&frame, &self.subscriptions) {
            Route::Auth => self.handle_auth_reply(&frame),
            Route::Event(callback) => callback(&frame),
            Route::Reply { oid } => {
                if !self.table.settle(oid, router::reply_outcome(&frame)) {
                    debug!("[cex-ws] no pending request for reply {oid}");
                    let _ = self.events.send(SessionEvent::UnmatchedReply {
                        oid: oid.to_string(),
                    });
                }
            }
            Route::Keepalive => {}
            Route::Ping => {
                if let Err(e) = self.sink.send_frame(protocol::event_frame(PONG_EVENT)) {
                    warn!("[cex-ws] pong send failed: {e}");
                }
            }
            Route::Unrecognized => debug!("[cex-ws] unrecognized frame: {text}"),
        }
    }

    fn handle_auth_reply(&mut self, frame: &Value) {
        match self.auth.complete(frame) {
            None => debug!("[cex-ws] ignoring auth reply outside handshake"),
            Some(Ok(())) => {
                self.state.set_authorized(true);
                info!("[cex-ws] authorized");
                let _ = self.events.send(SessionEvent::Authorized);
                self.settle_ready(Ok(()));
            }
            Some(Err(e)) => self.fail_handshake(e),
        }
    }

    /// Auth did not succeed: report, reject `connect()`, and drop the socket.
    fn fail_handshake(&mut self, err: CexError) {
        error!("[cex-ws] auth handshake failed: {err}");
        self.state.set_authorized(false);
        let _ = self.events.send(SessionEvent::Error {
            message: err.to_string(),
        });
        self.settle_ready(Err(err));
        self.sink.close();
    }

    pub(crate) fn handle_closed(&mut self, reason: String) {
        self.state.reset();
        self.auth.reset();

        let rejected = self.table.reject_all(|pending| {
            CexError::Transport(format!(
                "connection closed with '{}' in flight: {reason}",
                pending.action()
            ))
        });
        if rejected > 0 {
            warn!("[cex-ws] disconnected ({reason}); rejected {rejected} in-flight request(s)");
        } else {
            info!("[cex-ws] disconnected ({reason})");
        }

        self.settle_ready(Err(CexError::Transport(reason.clone())));
        let _ = self.events.send(SessionEvent::Disconnected { reason, rejected });
    }

    /// Deliver `cmd` to this session after `after`, unless aborted first.
    fn schedule(&self, after: Duration, cmd: SessionCmd) -> AbortHandle {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(cmd);
        })
        .abort_handle()
    }

    fn settle_ready(&mut self, result: Result<(), CexError>) {
        self.ready.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }
}
