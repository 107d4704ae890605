//! Resilience for network-backed adapters.
//!
//! - **Classification**: decide whether a native failure is a broken
//!   connection (retry) or a rejected command (surface immediately)
//! - **Executor**: bounded retry with fixed or exponential backoff, and
//!   reconnect from the saved connection descriptor between attempts

pub mod classify;
pub mod executor;

pub use classify::{classify, classify_message, FailureKind, CONNECTION_FAILURE_INDICATORS};
pub use executor::{Connector, ResilientExecutor};
