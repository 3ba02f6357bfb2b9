//! CEX.IO WebSocket engine.
//!
//! - [`client`]: public facade ([`CexWsClient`]) owning connect/disconnect
//! - [`session`]: per-connection task owning the correlation table and auth gate
//! - [`correlation`]: oid allocation and pending-request table
//! - [`gate`]: auth handshake state machine
//! - [`router`]: inbound frame classification and user subscriptions
//! - [`protocol`]: wire frames

pub mod client;
pub mod correlation;
pub mod gate;
pub mod protocol;
pub mod router;
pub mod session;

pub use client::CexWsClient;
pub use correlation::Reply;
pub use router::{EventCallback, Subscriptions};
pub use session::{ClientMode, Credentials, SessionState};
