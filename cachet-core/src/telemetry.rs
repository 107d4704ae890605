//! Telemetry sink for per-operation durations.

use std::time::Duration;

/// Receives one observation per cache operation.
pub trait OperationRecorder: Send + Sync {
    /// Record how long `operation` took on `adapter`. `error_type` is the
    /// error kind when the operation failed.
    fn record(&self, operation: &str, adapter: &str, elapsed: Duration, error_type: Option<&str>);
}
