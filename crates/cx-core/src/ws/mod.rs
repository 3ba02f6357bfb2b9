//! WebSocket connection lifecycle.

pub mod client;

pub use client::{
    WsConnConfig, WsConnection, WsEvent, WsEventReceiver, WsEventSender,
};
