//! The cache facade application code talks to.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use cachet_core::{
    normalize_key, CacheAdapter, CacheSettings, CachetResult, OperationRecorder, Payload,
    SaveOutcome,
};
use tracing::debug;

/// Front door to one configured adapter.
///
/// The facade holds no cache state. It folds keys to lower case unless the
/// instance is case sensitive, optionally times every call, and otherwise
/// forwards verbatim. The adapter may be a router or a pool; the facade does
/// not care.
///
/// A key ending in `*` passed to [`Cache::purge`] removes every entry with
/// that prefix on adapters that support it.
#[derive(Clone)]
pub struct Cache {
    adapter: Arc<dyn CacheAdapter>,
    case_sensitive: bool,
    recorder: Option<Arc<dyn OperationRecorder>>,
}

impl Cache {
    /// Create a case-insensitive facade without telemetry.
    pub fn new(adapter: Arc<dyn CacheAdapter>) -> Self {
        Self {
            adapter,
            case_sensitive: false,
            recorder: None,
        }
    }

    /// Create a facade and apply the case and retry settings.
    pub fn from_settings(adapter: Arc<dyn CacheAdapter>, settings: &CacheSettings) -> CachetResult<Self> {
        settings.validate()?;
        adapter.set_max_retries(settings.max_retries);
        adapter.set_retry_delay(settings.retry_delay_ms);
        Ok(Self::new(adapter).with_case_sensitive(settings.case_sensitive))
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn OperationRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.case_sensitive = case_sensitive;
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn adapter(&self) -> &Arc<dyn CacheAdapter> {
        &self.adapter
    }

    fn key(&self, key: &str) -> String {
        normalize_key(key, self.case_sensitive)
    }

    fn hash_key(&self, hash_key: Option<&str>) -> Option<String> {
        hash_key.map(|hash_key| self.key(hash_key))
    }

    /// Await `call`, recording its duration when a recorder is configured.
    async fn observe<T, Fut>(&self, operation: &'static str, key: Option<&str>, call: Fut) -> CachetResult<T>
    where
        Fut: Future<Output = CachetResult<T>>,
    {
        let Some(recorder) = &self.recorder else {
            return call.await;
        };

        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();
        recorder.record(
            operation,
            &self.adapter.name(key),
            elapsed,
            result.as_ref().err().map(|e| e.kind()),
        );
        result
    }

    /// Load the payload under `key` if written less than `ttl` seconds ago.
    pub async fn load(&self, key: &str, ttl: u64, hash_key: Option<&str>) -> CachetResult<Option<Payload>> {
        let key = self.key(key);
        let hash_key = self.hash_key(hash_key);
        let result = self
            .observe(
                "load",
                Some(&key),
                self.adapter.load(&key, ttl, hash_key.as_deref()),
            )
            .await;

        if let Ok(payload) = &result {
            debug!(key = %key, hit = payload.is_some(), "Cache load");
        }
        result
    }

    /// Store `payload` under `key`. A successful save echoes the payload.
    pub async fn save(
        &self,
        key: &str,
        payload: impl Into<Payload>,
        hash_key: Option<&str>,
    ) -> CachetResult<SaveOutcome> {
        let key = self.key(key);
        let hash_key = self.hash_key(hash_key);
        let result = self
            .observe(
                "save",
                Some(&key),
                self.adapter.save(&key, payload.into(), hash_key.as_deref()),
            )
            .await;

        if let Ok(outcome) = &result {
            debug!(key = %key, saved = outcome.is_saved(), "Cache save");
        }
        result
    }

    pub async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
        let key = self.key(key);
        self.observe("list", Some(&key), self.adapter.list(&key)).await
    }

    /// Remove an entry, or every entry under a `prefix*` pattern.
    ///
    /// The prefix must be non-empty: a bare `*` is purged as a literal key.
    /// Pattern purges on adapters without prefix support return `false`.
    pub async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        let key = self.key(key);
        if let Some(prefix) = key.strip_suffix('*').filter(|prefix| !prefix.is_empty()) {
            let removed = self
                .observe("purge", Some(prefix), self.adapter.purge_prefix(prefix))
                .await?;
            debug!(prefix, removed = ?removed, "Cache prefix purge");
            return Ok(matches!(removed, Some(count) if count > 0));
        }

        let hash_key = self.hash_key(hash_key);
        self.observe(
            "purge",
            Some(&key),
            self.adapter.purge(&key, hash_key.as_deref()),
        )
        .await
    }

    pub async fn flush(&self) -> CachetResult<bool> {
        self.observe("flush", None, self.adapter.flush()).await
    }

    /// Liveness check. Never errors.
    pub async fn ping(&self) -> bool {
        let start = Instant::now();
        let alive = self.adapter.ping().await;
        if let Some(recorder) = &self.recorder {
            recorder.record("ping", &self.adapter.name(None), start.elapsed(), None);
        }
        alive
    }

    pub async fn size(&self) -> CachetResult<u64> {
        self.observe("size", None, self.adapter.size()).await
    }

    /// Name of the adapter serving `key`, or of the whole adapter.
    pub fn name(&self, key: Option<&str>) -> String {
        let key = key.map(|key| self.key(key));
        self.adapter.name(key.as_deref())
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.adapter.set_max_retries(max_retries);
    }

    pub fn set_retry_delay(&self, retry_delay_ms: u64) {
        self.adapter.set_retry_delay(retry_delay_ms);
    }

    pub fn max_retries(&self) -> u32 {
        self.adapter.max_retries()
    }

    pub fn retry_delay(&self) -> u64 {
        self.adapter.retry_delay()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("adapter", &self.adapter.name(None))
            .field("case_sensitive", &self.case_sensitive)
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}
