//! cachet Test Utilities
//!
//! Shared test infrastructure for the cachet workspace:
//! - A manual clock for TTL tests without sleeping
//! - Mock adapters and recorders
//! - Proptest generators for keys and payloads
//! - Fixtures and custom assertions

pub use cachet_core::{
    CacheAdapter, CacheSettings, CachetError, CachetResult, Clock, ConnectionDescriptor,
    NotSavedReason, OperationRecorder, Payload, SaveOutcome, StoreError,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Move the clock forward by `secs` seconds.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Shared handle suitable for adapter constructors.
    pub fn shared(&self) -> Arc<dyn Clock> {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::new(1_704_067_200)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MOCK ADAPTERS
// ============================================================================

pub mod mocks {
    //! In-process adapters and recorders with knobs for failure injection.

    use super::*;

    type EntryKey = (String, String);

    /// Adapter backed by a plain map. Entries never expire.
    ///
    /// Counts calls and concurrent callers so composite adapters (router,
    /// pool) can be observed from the outside.
    #[derive(Debug)]
    pub struct MockAdapter {
        name: String,
        entries: Mutex<HashMap<EntryKey, Payload>>,
        delay: Duration,
        fail_flush: AtomicBool,
        fail_ping: AtomicBool,
        fail_commands: AtomicBool,
        calls: AtomicUsize,
        flushes: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        max_retries: AtomicU32,
        retry_delay: AtomicU64,
    }

    impl MockAdapter {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                entries: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
                fail_flush: AtomicBool::new(false),
                fail_ping: AtomicBool::new(false),
                fail_commands: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                flushes: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                max_retries: AtomicU32::new(0),
                retry_delay: AtomicU64::new(0),
            }
        }

        /// Hold every call for `delay` before answering.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Make `flush` answer `false`.
        pub fn failing_flush(self) -> Self {
            self.fail_flush.store(true, Ordering::SeqCst);
            self
        }

        pub fn set_fail_ping(&self, fail: bool) {
            self.fail_ping.store(fail, Ordering::SeqCst);
        }

        /// Make every keyed operation fail with a command error.
        pub fn set_fail_commands(&self, fail: bool) {
            self.fail_commands.store(fail, Ordering::SeqCst);
        }

        /// Total contract calls received.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn flushes(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        /// Highest number of callers observed inside this adapter at once.
        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        /// Number of stored entries.
        pub fn len(&self) -> usize {
            self.lock().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntryKey, Payload>> {
            match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            }
        }

        async fn enter(&self) -> CachetResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_commands.load(Ordering::SeqCst) {
                return Err(StoreError::command(&self.name, "mock command failure").into());
            }
            Ok(())
        }

        fn entry_key(key: &str, hash_key: Option<&str>) -> EntryKey {
            (key.to_string(), hash_key.unwrap_or(key).to_string())
        }
    }

    #[async_trait]
    impl CacheAdapter for MockAdapter {
        async fn load(
            &self,
            key: &str,
            _ttl: u64,
            hash_key: Option<&str>,
        ) -> CachetResult<Option<Payload>> {
            self.enter().await?;
            Ok(self.lock().get(&Self::entry_key(key, hash_key)).cloned())
        }

        async fn save(
            &self,
            key: &str,
            payload: Payload,
            hash_key: Option<&str>,
        ) -> CachetResult<SaveOutcome> {
            if let Some(outcome) = SaveOutcome::precheck(key, &payload) {
                return Ok(outcome);
            }
            self.enter().await?;
            self.lock()
                .insert(Self::entry_key(key, hash_key), payload.clone());
            Ok(SaveOutcome::Saved(payload))
        }

        async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
            self.enter().await?;
            let mut fields: Vec<String> = self
                .lock()
                .keys()
                .filter(|(k, _)| k == key)
                .map(|(_, field)| field.clone())
                .collect();
            fields.sort();
            Ok(fields)
        }

        async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
            self.enter().await?;
            let mut entries = self.lock();
            match hash_key {
                Some(_) => Ok(entries.remove(&Self::entry_key(key, hash_key)).is_some()),
                None => {
                    let before = entries.len();
                    entries.retain(|(k, _), _| k != key);
                    Ok(entries.len() < before)
                }
            }
        }

        async fn flush(&self) -> CachetResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_commands.load(Ordering::SeqCst) {
                return Err(StoreError::command(&self.name, "mock flush failure").into());
            }
            if self.fail_flush.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.lock().clear();
            Ok(true)
        }

        async fn ping(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            !self.fail_ping.load(Ordering::SeqCst)
        }

        async fn size(&self) -> CachetResult<u64> {
            self.enter().await?;
            Ok(self.len() as u64)
        }

        fn name(&self, _key: Option<&str>) -> String {
            self.name.clone()
        }

        async fn purge_prefix(&self, prefix: &str) -> CachetResult<Option<u64>> {
            self.enter().await?;
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|(k, _), _| !k.starts_with(prefix));
            Ok(Some((before - entries.len()) as u64))
        }

        fn set_max_retries(&self, max_retries: u32) {
            self.max_retries
                .store(cachet_core::retry::clamp_retries(max_retries), Ordering::SeqCst);
        }

        fn set_retry_delay(&self, retry_delay_ms: u64) {
            self.retry_delay.store(retry_delay_ms, Ordering::SeqCst);
        }

        fn max_retries(&self) -> u32 {
            self.max_retries.load(Ordering::SeqCst)
        }

        fn retry_delay(&self) -> u64 {
            self.retry_delay.load(Ordering::SeqCst)
        }
    }

    /// One observation captured by [`RecordingRecorder`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Observation {
        pub operation: String,
        pub adapter: String,
        pub error_type: Option<String>,
    }

    /// Recorder that keeps every observation in memory.
    #[derive(Debug, Default)]
    pub struct RecordingRecorder {
        observations: Mutex<Vec<Observation>>,
    }

    impl RecordingRecorder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn observations(&self) -> Vec<Observation> {
            match self.observations.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }

        /// Operation names in the order they were recorded.
        pub fn operations(&self) -> Vec<String> {
            self.observations()
                .into_iter()
                .map(|o| o.operation)
                .collect()
        }
    }

    impl OperationRecorder for RecordingRecorder {
        fn record(
            &self,
            operation: &str,
            adapter: &str,
            _elapsed: Duration,
            error_type: Option<&str>,
        ) {
            let observation = Observation {
                operation: operation.to_string(),
                adapter: adapter.to_string(),
                error_type: error_type.map(str::to_string),
            };
            match self.observations.lock() {
                Ok(mut guard) => guard.push(observation),
                Err(poisoned) => poisoned.into_inner().push(observation),
            }
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and payloads.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map, Value};

    /// Generate a non-empty cache key of the usual `segment:segment` shape.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_-]{0,15}(:[a-zA-Z0-9_-]{1,12}){0,3}"
    }

    /// Generate a non-empty hash key.
    pub fn arb_hash_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_-]{1,24}"
    }

    /// Generate a TTL in seconds, at least one second.
    pub fn arb_ttl() -> impl Strategy<Value = u64> {
        1u64..86_400 * 30
    }

    /// Generate a non-empty text payload.
    pub fn arb_text_payload() -> impl Strategy<Value = Payload> {
        "[ -~]{1,64}".prop_map(Payload::text)
    }

    /// Generate a non-empty structured payload.
    pub fn arb_structured_payload() -> impl Strategy<Value = Payload> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z0-9 ]{0,16}".prop_map(Value::from),
        ]
        .boxed();
        prop_oneof![
            ("[a-z]{1,8}", leaf.clone()).prop_map(|(k, v)| {
                let mut object = Map::new();
                object.insert(k, v);
                Payload::structured(Value::Object(object))
            }),
            prop::collection::vec(leaf, 1..6).prop_map(|v| Payload::structured(Value::Array(v))),
            any::<i64>().prop_map(|n| Payload::structured(json!(n))),
        ]
    }

    /// Generate any non-empty payload.
    pub fn arb_payload() -> impl Strategy<Value = Payload> {
        prop_oneof![arb_text_payload(), arb_structured_payload()]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Settings with fast retries for tests.
    pub fn fast_settings() -> CacheSettings {
        CacheSettings {
            max_retries: 2,
            retry_delay_ms: 10,
            pool_size: 2,
            pool_wait_timeout_ms: 200,
            ..Default::default()
        }
    }

    /// Descriptor pointing at a port nothing listens on.
    pub fn unreachable_descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("127.0.0.1", 1).with_timeout(Duration::from_millis(200))
    }

    /// `count` named mock adapters, `shard-0` onwards.
    pub fn mock_shards(count: usize) -> Vec<Arc<mocks::MockAdapter>> {
        (0..count)
            .map(|i| Arc::new(mocks::MockAdapter::new(format!("shard-{i}"))))
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cachet-specific outcomes.

    use super::*;

    /// Assert that a save stored and echoed exactly `expected`.
    #[track_caller]
    pub fn assert_saved(outcome: &SaveOutcome, expected: &Payload) {
        match outcome {
            SaveOutcome::Saved(payload) => assert_eq!(payload, expected),
            other => panic!("Expected Saved, got: {:?}", other),
        }
    }

    /// Assert that a save stored nothing for `reason`.
    #[track_caller]
    pub fn assert_not_saved(outcome: &SaveOutcome, reason: NotSavedReason) {
        assert_eq!(outcome.reason(), Some(reason), "Expected NotSaved({:?})", reason);
    }

    /// Assert that a result is a retries-exhausted failure.
    #[track_caller]
    pub fn assert_unreachable<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::RetriesExhausted { .. }) => {}
            other => panic!("Expected RetriesExhausted, got: {:?}", other),
        }
    }

    /// Assert that a result is a config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
