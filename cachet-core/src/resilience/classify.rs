//! Transient failure detection.
//!
//! Native cache clients rarely expose a structured error taxonomy, so
//! connection failures are recognised by matching the error text against a
//! fixed set of known indicators.

use crate::error::StoreError;

/// Lower-case fragments that mark a socket or session as unusable.
pub const CONNECTION_FAILURE_INDICATORS: &[&str] = &[
    "connection lost",
    "went away",
    "connection refused",
    "connection reset",
    "connection closed",
    "connection aborted",
    "broken pipe",
    "not connected",
    "no connection",
    "timed out",
    "timeout",
    "unexpected eof",
    "end of file",
    "network is unreachable",
    "host is unreachable",
    "socket",
    "clusterdown",
    "cluster is down",
    "tryagain",
];

/// Kind of failure reported by a native client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport or session is unusable; reconnect and retry.
    Connection,
    /// The store rejected the command; never retried.
    Command,
}

/// Classify an error message.
pub fn classify_message(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    if CONNECTION_FAILURE_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
    {
        FailureKind::Connection
    } else {
        FailureKind::Command
    }
}

/// Build a [`StoreError`] for `backend` by classifying `message`.
pub fn classify(backend: &str, message: impl Into<String>) -> StoreError {
    let message = message.into();
    match classify_message(&message) {
        FailureKind::Connection => StoreError::connection(backend, message),
        FailureKind::Command => StoreError::command(backend, message),
    }
}
