//! # cx-core
//!
//! Core crate for the CEX.IO client, providing:
//!
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): domain-specific `CexError` via thiserror
//! - **WebSocket** (`ws`): single-connection lifecycle with ping keep-alive
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod ws;

pub use error::CexError;
