//! Single WebSocket connection with ping keep-alive.
//!
//! Each `WsConnection` owns one socket and runs it as a tokio task that:
//! 1. Reads frames and forwards text frames as [`WsEvent::Text`].
//! 2. Writes outbound messages queued through [`WsConnection::send`].
//! 3. Sends a periodic text heartbeat.
//! 4. Emits exactly one [`WsEvent::Closed`] when the socket goes away, for
//!    any reason, and then exits.
//!
//! There is no reconnect loop here: a dropped connection is terminal and the
//! owner decides whether to open a new one.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::{debug, error, info, warn};

use crate::error::CexError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound queue depth before [`WsConnection::send`] reports back-pressure.
const OUTBOUND_CAPACITY: usize = 256;

/// Lifecycle event raised by a [`WsConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A text frame arrived.
    Text(String),
    /// The socket is gone (close frame, read/write error, or local close).
    /// Always the last event of a connection.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Sender half of the connection event channel.
pub type WsEventSender = mpsc::UnboundedSender<WsEvent>;

/// Receiver half of the connection event channel.
pub type WsEventReceiver = mpsc::UnboundedReceiver<WsEvent>;

/// Configuration for a single WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// Full WebSocket URL (e.g. `wss://trade.cex.io/api/spot/ws`).
    pub url: String,
    /// Extra HTTP headers for the handshake.
    pub extra_headers: HashMap<String, String>,
    /// Interval between heartbeats (`None` = no heartbeat).
    pub ping_interval: Option<Duration>,
    /// Text frame sent on every heartbeat tick (e.g. CEX.IO `{"e":"ping"}`).
    pub ping_message: String,
    /// Connection identifier used in log prefixes.
    pub id: usize,
}

/// A single WebSocket connection managed by a background tokio task.
pub struct WsConnection {
    /// Connection configuration.
    pub config: WsConnConfig,
    /// Channel to send outbound messages.
    outbound_tx: mpsc::Sender<String>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Task join handle.
    task: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    /// Connect and start the I/O task.
    ///
    /// Returns once the handshake has completed; from then on every frame
    /// and the final close are delivered to `events` in arrival order.
    pub async fn open(config: WsConnConfig, events: WsEventSender) -> Result<Self, CexError> {
        let conn_id = config.id;
        info!("[ws-{conn_id}] connecting to {}", config.url);

        let stream = connect_ws(&config).await.inspect_err(|e| {
            error!("[ws-{conn_id}] connection failed: {e}");
        })?;
        info!("[ws-{conn_id}] connected");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let task_config = config.clone();

        let task = tokio::spawn(async move {
            let reason = connection_loop(stream, &task_config, outbound_rx, shutdown_rx, &events).await;
            let _ = events.send(WsEvent::Closed { reason });
        });

        Ok(Self {
            config,
            outbound_tx,
            shutdown_tx,
            task,
        })
    }

    /// Queue a text message for sending.
    ///
    /// Fails immediately if the connection task is gone or the queue is full.
    pub fn send(&self, msg: String) -> Result<(), CexError> {
        self.outbound_tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CexError::Transport("outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                CexError::Transport("connection closed".into())
            }
        })
    }

    /// Whether the I/O task is still running.
    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }

    /// Request a graceful close. The resulting [`WsEvent::Closed`] is
    /// delivered through the event channel like any other close.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Main connection loop: reads, writes, pings. Returns the close reason.
async fn connection_loop(
    stream: WsStream,
    config: &WsConnConfig,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
    events: &WsEventSender,
) -> String {
    let conn_id = config.id;
    let (mut ws_write, mut ws_read) = stream.split();

    // First tick one full interval after connect, not immediately.
    let mut ping_interval = config.ping_interval.map(|d| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + d, d);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            // Shutdown signal
            _ = shutdown_rx.changed() => {
                info!("[ws-{conn_id}] shutdown signal received");
                let _ = ws_write.close().await;
                return "closed by client".to_string();
            }

            // Incoming message
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(WsEvent::Text(text.to_string())).is_err() {
                            debug!("[ws-{conn_id}] event receiver dropped");
                            let _ = ws_write.close().await;
                            return "event receiver dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("[ws-{conn_id}] received close frame");
                        return match frame {
                            Some(f) if !f.reason.is_empty() => {
                                format!("closed by server: {} ({})", f.reason.as_str(), f.code)
                            }
                            Some(f) => format!("closed by server ({})", f.code),
                            None => "closed by server".to_string(),
                        };
                    }
                    Some(Err(e)) => {
                        error!("[ws-{conn_id}] read error: {e}");
                        return format!("read error: {e}");
                    }
                    None => {
                        warn!("[ws-{conn_id}] stream ended");
                        return "stream ended".to_string();
                    }
                    _ => {} // Binary, Pong, Frame: ignore
                }
            }

            // Outbound message from the owner
            Some(msg) = outbound_rx.recv() => {
                if let Err(e) = ws_write.send(Message::Text(msg.into())).await {
                    error!("[ws-{conn_id}] send error: {e}");
                    return format!("send error: {e}");
                }
            }

            // Ping timer
            _ = next_ping(&mut ping_interval) => {
                let heartbeat = Message::Text(config.ping_message.clone().into());
                if let Err(e) = ws_write.send(heartbeat).await {
                    error!("[ws-{conn_id}] ping send error: {e}");
                    return format!("ping send error: {e}");
                }
            }
        }
    }
}

/// Resolves on the next ping tick, or never when pinging is disabled.
async fn next_ping(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Establish a (possibly TLS) WebSocket connection.
async fn connect_ws(config: &WsConnConfig) -> Result<WsStream, CexError> {
    let mut request = config.url.as_str().into_client_request()?;

    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| CexError::Config(format!("invalid header name '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CexError::Config(format!("invalid header value for '{key}': {e}")))?;
        request.headers_mut().insert(name, value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}
