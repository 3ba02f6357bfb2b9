//! Request/reply correlation.
//!
//! Every correlated call gets a [`PendingRequest`] keyed by its oid in the
//! session's [`CorrelationTable`]. The entry owns the caller's completion
//! channel and the abort handle of its timeout task.
//!
//! Settlement consumes the entry, and the only way to obtain an entry is to
//! remove it from the table, so an oid is settled at most once and never
//! outlives its settlement. The table is owned by a single session task and
//! needs no locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use cx_core::CexError;
use cx_core::time_util;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Outcome delivered to a caller.
pub type Reply = Result<Value, CexError>;

/// Process-wide sequence, so ids stay unique across reconnects and clients.
static OID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Allocate a correlation id: `<ms timestamp><sequence>_<action>`.
pub fn next_oid(action: &str) -> String {
    let seq = OID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format_oid(time_util::now_ms(), seq, action)
}

fn format_oid(timestamp_ms: u64, seq: u64, action: &str) -> String {
    format!("{timestamp_ms}{seq}_{action}")
}

/// One in-flight correlated call.
#[derive(Debug)]
pub struct PendingRequest {
    action: String,
    reply: oneshot::Sender<Reply>,
    timeout: AbortHandle,
}

impl PendingRequest {
    pub fn new(action: String, reply: oneshot::Sender<Reply>, timeout: AbortHandle) -> Self {
        Self { action, reply, timeout }
    }

    /// Action name of the request.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Cancel the timeout and deliver `result` to the caller.
    ///
    /// A caller that stopped waiting simply never observes the result.
    pub fn settle(self, result: Reply) {
        self.timeout.abort();
        let _ = self.reply.send(result);
    }
}

/// Map of outstanding oids to their pending requests.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: AHashMap<String, PendingRequest>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry. Oids are unique, so an existing entry is a bug in
    /// the caller; it is rejected rather than silently replaced.
    pub fn insert(&mut self, oid: String, pending: PendingRequest) {
        if let Some(previous) = self.entries.insert(oid.clone(), pending) {
            previous.settle(Err(CexError::Transport(format!("duplicate correlation id {oid}"))));
        }
    }

    /// Remove and settle the entry for `oid`. Returns `false` when no entry
    /// exists (already settled, timed out, or never issued).
    pub fn settle(&mut self, oid: &str, result: Reply) -> bool {
        match self.entries.remove(oid) {
            Some(pending) => {
                pending.settle(result);
                true
            }
            None => false,
        }
    }

    /// Remove and settle the entry for `oid` with a timeout error.
    pub fn expire(&mut self, oid: &str, timeout: Duration) -> bool {
        match self.entries.remove(oid) {
            Some(pending) => {
                let action = pending.action().to_string();
                pending.settle(Err(CexError::RequestTimeout { action, timeout }));
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding entry, leaving the table empty. Returns the
    /// number of entries rejected.
    pub fn reject_all(&mut self, make_error: impl Fn(&PendingRequest) -> CexError) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            let err = make_error(&pending);
            pending.settle(Err(err));
        }
        count
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.entries.contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
