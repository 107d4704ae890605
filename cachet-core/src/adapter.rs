//! The adapter capability contract.
//!
//! Every backing store, and every composite built from stores (sharding
//! router, pooled adapter), implements [`CacheAdapter`]. Higher layers only
//! ever program against this trait, so composites nest freely: a router of
//! pooled Redis adapters is just another `CacheAdapter`.

use async_trait::async_trait;

use crate::error::CachetResult;
use crate::payload::{Payload, SaveOutcome};

/// Uniform cache contract implemented by every backend.
///
/// # Error discipline
///
/// Expected outcomes are ordinary values:
/// - a miss (absent or expired) is `Ok(None)` from `load`
/// - empty keys or payloads are `Ok(SaveOutcome::NotSaved(..))` from `save`
/// - unsupported flushes are `Ok(false)`
///
/// `Err` is reserved for command errors reported by the store, unreachable
/// backends after retries are exhausted, and pool failures.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Load the payload stored under `key` (and `hash_key` for grouping
    /// stores) if it was written less than `ttl` seconds ago.
    ///
    /// `hash_key` defaults to `key` when `None`.
    async fn load(&self, key: &str, ttl: u64, hash_key: Option<&str>)
        -> CachetResult<Option<Payload>>;

    /// Store `payload` under `key`, stamped with the current time.
    async fn save(
        &self,
        key: &str,
        payload: Payload,
        hash_key: Option<&str>,
    ) -> CachetResult<SaveOutcome>;

    /// List the hash keys stored under a group key. Stores without native
    /// grouping return an empty list.
    async fn list(&self, key: &str) -> CachetResult<Vec<String>>;

    /// Remove one entry (or one hash field when `hash_key` is given).
    /// Returns whether anything was removed.
    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool>;

    /// Remove every entry managed by this adapter. Stores that cannot flush
    /// return `Ok(false)`.
    async fn flush(&self) -> CachetResult<bool>;

    /// Liveness check. Never errors; failures are `false`.
    async fn ping(&self) -> bool;

    /// Best-effort count of stored entries.
    async fn size(&self) -> CachetResult<u64>;

    /// Adapter identity for telemetry. Composite adapters resolve `key` to
    /// the adapter that would serve it.
    fn name(&self, key: Option<&str>) -> String;

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Optional capability: `Ok(None)` means the store cannot pattern-purge,
    /// `Ok(Some(n))` is the number of entries removed.
    async fn purge_prefix(&self, _prefix: &str) -> CachetResult<Option<u64>> {
        Ok(None)
    }

    /// Set the number of retries after a connection failure (clamped to 10).
    fn set_max_retries(&self, _max_retries: u32) {}

    /// Set the delay between retries, in milliseconds.
    fn set_retry_delay(&self, _retry_delay_ms: u64) {}

    fn max_retries(&self) -> u32 {
        0
    }

    fn retry_delay(&self) -> u64 {
        0
    }
}
