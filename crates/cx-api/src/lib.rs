//! # cx-api
//!
//! CEX.IO spot API clients.
//!
//! | Transport | Type                     | Auth                         |
//! |-----------|--------------------------|------------------------------|
//! | WebSocket | [`ws::CexWsClient`]      | HMAC-SHA256 handshake (private) |
//! | REST      | [`rest::RestClient`]     | none (public endpoints)      |
//!
//! The WebSocket client multiplexes concurrent correlated requests over one
//! socket: each call is tagged with an `oid`, and the reply carrying the same
//! `oid` settles it. Lifecycle changes are reported on a
//! [`SessionEventReceiver`](event::SessionEventReceiver).

pub mod auth;
pub mod event;
pub mod rest;
pub mod ws;

pub use event::{SessionEvent, SessionEventReceiver};
pub use rest::RestClient;
pub use ws::{CexWsClient, ClientMode};
