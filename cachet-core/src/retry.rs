//! Retry policy and backoff strategy for network-backed adapters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Retry configuration owned by one adapter instance.
///
/// `max_retries = 0` means exactly one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Create a policy, clamping `max_retries` into `[0, 10]`.
    pub fn new(max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            max_retries: clamp_retries(max_retries),
            retry_delay_ms,
        }
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Base delay between attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Clamp a retry count into the supported range.
pub fn clamp_retries(max_retries: u32) -> u32 {
    max_retries.min(MAX_RETRIES_LIMIT)
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after every failed attempt.
    Exponential,
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failure (1-indexed).
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base,
            Self::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift)
            }
        }
    }
}
