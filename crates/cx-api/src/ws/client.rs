//! Public WebSocket client.
//!
//! A [`CexWsClient`] is bound to one endpoint for its whole life: private
//! (authenticated, [`call`](CexWsClient::call)) or public
//! ([`call_public`](CexWsClient::call_public)). Each
//! [`connect`](CexWsClient::connect) opens a socket and spawns a fresh
//! [`Session`] for it; subscriptions and the event channel outlive sessions.
//!
//! ```ignore
//! let (client, mut events) = CexWsClient::private(config.connection.clone())?;
//! client.connect().await?;
//! let balance = client.call("get_my_account_status_v3", json!({})).await?;
//! client.disconnect().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cx_core::CexError;
use cx_core::config::ConnectionConfig;
use cx_core::ws::{WsConnConfig, WsConnection};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::correlation::Reply;
use super::protocol::{self, PING_EVENT};
use super::router::Subscriptions;
use super::session::{
    ClientMode, Credentials, ReadyReceiver, Session, SessionCmd, SessionCmdSender, SessionParams,
    SessionState,
};
use crate::event::{SessionEventReceiver, SessionEventSender};

/// Handle to the running session of the current connection.
struct SessionHandle {
    cmd_tx: SessionCmdSender,
    task: JoinHandle<()>,
    ready: ReadyReceiver,
}

impl SessionHandle {
    /// Still handshaking, or ready and open. A session whose handshake
    /// failed, or that lost its socket, is only winding down.
    fn is_live(&self, state: &SessionState) -> bool {
        if self.task.is_finished() {
            return false;
        }
        match &*self.ready.borrow() {
            None => true,
            Some(Ok(())) => state.is_connected(),
            Some(Err(_)) => false,
        }
    }
}

pub struct CexWsClient {
    mode: ClientMode,
    config: ConnectionConfig,
    state: Arc<SessionState>,
    subscriptions: Subscriptions,
    events: SessionEventSender,
    session: Mutex<Option<SessionHandle>>,
    /// Connection counter, used as the `[ws-N]` log id.
    connections: AtomicUsize,
}

impl CexWsClient {
    /// Client for the authenticated endpoint. Fails without credentials.
    pub fn private(config: ConnectionConfig) -> Result<(Self, SessionEventReceiver), CexError> {
        config.validate(true)?;
        Ok(Self::with_mode(ClientMode::Private, config))
    }

    /// Client for the public endpoint.
    pub fn public(config: ConnectionConfig) -> Result<(Self, SessionEventReceiver), CexError> {
        config.validate(false)?;
        Ok(Self::with_mode(ClientMode::Public, config))
    }

    fn with_mode(mode: ClientMode, config: ConnectionConfig) -> (Self, SessionEventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let client = Self {
            mode,
            config,
            state: Arc::new(SessionState::default()),
            subscriptions: Subscriptions::new(),
            events,
            session: Mutex::new(None),
            connections: AtomicUsize::new(0),
        };
        (client, events_rx)
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_authorized(&self) -> bool {
        self.state.is_authorized()
    }

    /// Open the socket and wait until the session is usable: authorized for
    /// a private client, open for a public one.
    ///
    /// On a live connection this waits for that session's outcome instead
    /// of opening a second socket.
    pub async fn connect(&self) -> Result<(), CexError> {
        let mut guard = self.session.lock().await;

        let live = guard
            .as_ref()
            .filter(|h| h.is_live(&self.state))
            .map(|h| h.ready.clone());
        if let Some(ready) = live {
            drop(guard);
            debug!("[cex-ws] {} client already connecting or connected", self.mode);
            return wait_ready(ready).await;
        }

        if let Some(stale) = guard.take() {
            // Stop the old session before it can touch the shared state again.
            debug!("[cex-ws] replacing stale {} session", self.mode);
            stale.task.abort();
            let _ = stale.task.await;
            self.state.reset();
        }

        let (handle, ready) = self.open_session().await?;
        *guard = Some(handle);
        drop(guard);
        wait_ready(ready).await
    }

    /// Open a socket (bounded by the request timeout) and spawn its session.
    async fn open_session(&self) -> Result<(SessionHandle, ReadyReceiver), CexError> {
        let timeout = self.config.request_timeout();
        let (ws_tx, ws_rx) = mpsc::unbounded_channel();
        let conn = tokio::time::timeout(timeout, WsConnection::open(self.conn_config(), ws_tx))
            .await
            .map_err(|_| {
                CexError::Transport(format!("websocket handshake timed out after {timeout:?}"))
            })??;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(None);
        let session = Session::new(SessionParams {
            mode: self.mode,
            sink: conn,
            credentials: self.credentials(),
            state: Arc::clone(&self.state),
            subscriptions: self.subscriptions.clone(),
            request_timeout: timeout,
            events: self.events.clone(),
            cmd_tx: cmd_tx.clone(),
            ready: ready_tx,
        });
        let task = tokio::spawn(session.run(cmd_rx, ws_rx));
        let handle = SessionHandle {
            cmd_tx,
            task,
            ready: ready_rx.clone(),
        };
        Ok((handle, ready_rx))
    }

    /// Close the socket and wait for the session to wind down. In-flight
    /// calls are rejected. No-op when not connected.
    pub async fn disconnect(&self) {
        let Some(handle) = self.session.lock().await.take() else {
            debug!("[cex-ws] disconnect on idle {} client", self.mode);
            return;
        };
        let _ = handle.cmd_tx.send(SessionCmd::Disconnect);
        if let Err(e) = handle.task.await {
            warn!("[cex-ws] session task ended abnormally: {e}");
        }
        info!("[cex-ws] {} client disconnected", self.mode);
    }

    /// Correlated request on the private endpoint.
    pub async fn call(&self, action: &str, data: Value) -> Result<Value, CexError> {
        self.request(ClientMode::Private, action, data).await
    }

    /// Correlated request on the public endpoint.
    pub async fn call_public(&self, action: &str, data: Value) -> Result<Value, CexError> {
        self.request(ClientMode::Public, action, data).await
    }

    /// Register `callback` for pushes named `event`, replacing any previous
    /// one. The reserved `auth` event is rejected.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Result<(), CexError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscriptions.insert(event, Arc::new(callback))
    }

    /// Remove the callback for `event`. Returns whether one was registered.
    pub fn unsubscribe(&self, event: &str) -> bool {
        self.subscriptions.remove(event)
    }

    async fn request(&self, mode: ClientMode, action: &str, data: Value) -> Reply {
        // Fast-path rejections; the session re-checks against its own state.
        if mode != self.mode {
            return Err(CexError::WrongClientMode(format!(
                "{mode} call on a {} client",
                self.mode
            )));
        }
        if !self.state.is_connected() {
            return Err(CexError::NotConnected);
        }
        if mode == ClientMode::Private && !self.state.is_authorized() {
            return Err(CexError::NotAuthorized);
        }

        let cmd_tx = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|h| h.cmd_tx.clone())
            .ok_or(CexError::NotConnected)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(SessionCmd::Call {
                action: action.to_string(),
                data,
                mode,
                reply: reply_tx,
            })
            .map_err(|_| CexError::NotConnected)?;

        reply_rx
            .await
            .unwrap_or_else(|_| Err(CexError::Transport("session closed".into())))
    }

    fn credentials(&self) -> Option<Credentials> {
        (self.mode == ClientMode::Private).then(|| Credentials {
            api_key: self.config.api_key.clone(),
            secret_key: self.config.secret_key.clone(),
        })
    }

    fn conn_config(&self) -> WsConnConfig {
        let url = match self.mode {
            ClientMode::Private => self.config.private_ws_url.clone(),
            ClientMode::Public => self.config.public_ws_url.clone(),
        };
        WsConnConfig {
            url,
            extra_headers: self.config.extra_headers.clone(),
            ping_interval: self.config.ping_interval(),
            ping_message: protocol::event_frame(PING_EVENT),
            id: self.connections.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Wait until the session settles its readiness.
async fn wait_ready(mut ready: ReadyReceiver) -> Result<(), CexError> {
    loop {
        if let Some(outcome) = ready.borrow_and_update().clone() {
            return outcome;
        }
        if ready.changed().await.is_err() {
            return ready.borrow().clone().unwrap_or_else(|| {
                Err(CexError::Transport("session ended before it was ready".into()))
            });
        }
    }
}

impl Drop for CexWsClient {
    fn drop(&mut self) {
        // The session keeps its own command sender for timers, so it would
        // otherwise run until the server closes the socket.
        if let Some(handle) = self.session.get_mut().take() {
            handle.task.abort();
        }
    }
}
