//! cachet Core - Adapter Contract and Resilience Primitives
//!
//! Defines the contract every cache backend implements, the TTL envelope
//! every backend stores, and the retry/reconnect executor network-backed
//! adapters are built on. Concrete adapters live in `cachet-storage`; the
//! facade lives in `cachet`.

pub mod adapter;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod resilience;
pub mod retry;
pub mod telemetry;
pub mod time;

pub use adapter::CacheAdapter;
pub use config::CacheSettings;
pub use connection::ConnectionDescriptor;
pub use envelope::CacheEnvelope;
pub use error::{CachetError, CachetResult, CodecError, ConfigError, StoreError};
pub use payload::{NotSavedReason, Payload, SaveOutcome};
pub use resilience::{classify, classify_message, Connector, FailureKind, ResilientExecutor};
pub use retry::{Backoff, RetryPolicy, MAX_RETRIES_LIMIT};
pub use telemetry::OperationRecorder;
pub use time::{system_clock, Clock, SystemClock};

/// Fold a key according to the case policy.
pub fn normalize_key(key: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        key.to_string()
    } else {
        key.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Color", false), "color");
        assert_eq!(normalize_key("Color", true), "Color");
    }

    proptest! {
        #[test]
        fn prop_case_insensitive_keys_collapse(key in "[a-zA-Z0-9:_-]{1,32}") {
            let lower = normalize_key(&key.to_lowercase(), false);
            let upper = normalize_key(&key.to_uppercase(), false);
            prop_assert_eq!(lower, upper);
        }

        #[test]
        fn prop_case_sensitive_keys_untouched(key in "\\PC{0,32}") {
            prop_assert_eq!(normalize_key(&key, true), key);
        }
    }
}
