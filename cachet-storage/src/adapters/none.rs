//! Adapter that stores nothing.

use async_trait::async_trait;
use cachet_core::{CacheAdapter, CachetResult, NotSavedReason, Payload, SaveOutcome};

/// Disables caching without changing calling code. Every load misses and
/// every save reports [`NotSavedReason::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneAdapter;

impl NoneAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheAdapter for NoneAdapter {
    async fn load(
        &self,
        _key: &str,
        _ttl: u64,
        _hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        Ok(None)
    }

    async fn save(
        &self,
        key: &str,
        payload: Payload,
        _hash_key: Option<&str>,
    ) -> CachetResult<SaveOutcome> {
        Ok(SaveOutcome::precheck(key, &payload)
            .unwrap_or(SaveOutcome::NotSaved(NotSavedReason::Unsupported)))
    }

    async fn list(&self, _key: &str) -> CachetResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn purge(&self, _key: &str, _hash_key: Option<&str>) -> CachetResult<bool> {
        Ok(false)
    }

    async fn flush(&self) -> CachetResult<bool> {
        Ok(true)
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn size(&self) -> CachetResult<u64> {
        Ok(0)
    }

    fn name(&self, _key: Option<&str>) -> String {
        "none".to_string()
    }
}
