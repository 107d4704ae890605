//! Wall-clock source used for envelope timestamps and TTL checks.

use chrono::Utc;
use std::fmt::Debug;
use std::sync::Arc;

/// Source of "now" as unix seconds.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Shared handle to the system clock, the default for every adapter.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
