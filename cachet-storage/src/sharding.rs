//! Sharding router.
//!
//! Spreads keys across a fixed list of adapters with `crc32(key) % N`.
//! Keyed operations go to the routed shard; `flush`, `ping`, `size` and
//! prefix purges fan out to every shard.
//!
//! The router never migrates data: changing the shard count re-routes most
//! keys.

use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{
    CacheAdapter, CachetError, CachetResult, ConfigError, Payload, SaveOutcome,
};
use tracing::warn;

/// Adapter composed of N shards, each itself an adapter.
pub struct ShardedAdapter {
    shards: Vec<Arc<dyn CacheAdapter>>,
}

impl ShardedAdapter {
    /// Build a router over `shards`.
    ///
    /// Fails with a config error when `shards` is empty.
    pub fn new(shards: Vec<Arc<dyn CacheAdapter>>) -> CachetResult<Self> {
        if shards.is_empty() {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "shards".to_string(),
                value: "0".to_string(),
                reason: "a sharding router needs at least one adapter".to_string(),
            }));
        }
        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard serving `key`.
    pub fn route_index(&self, key: &str) -> usize {
        crc32fast::hash(key.as_bytes()) as usize % self.shards.len()
    }

    /// The shard serving `key`.
    pub fn route(&self, key: &str) -> &Arc<dyn CacheAdapter> {
        &self.shards[self.route_index(key)]
    }

    pub fn shards(&self) -> &[Arc<dyn CacheAdapter>] {
        &self.shards
    }
}

#[async_trait]
impl CacheAdapter for ShardedAdapter {
    async fn load(
        &self,
        key: &str,
        ttl: u64,
        hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        self.route(key).load(key, ttl, hash_key).await
    }

    async fn save(
        &self,
        key: &str,
        payload: Payload,
        hash_key: Option<&str>,
    ) -> CachetResult<SaveOutcome> {
        self.route(key).save(key, payload, hash_key).await
    }

    async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
        self.route(key).list(key).await
    }

    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        self.route(key).purge(key, hash_key).await
    }

    /// Flush every shard, even after one fails. Succeeds only if all do.
    /// The first error, if any, is returned once every shard was attempted.
    async fn flush(&self) -> CachetResult<bool> {
        let mut flushed = true;
        let mut first_error = None;

        for (index, shard) in self.shards.iter().enumerate() {
            match shard.flush().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(shard = index, adapter = %shard.name(None), "Shard flush failed");
                    flushed = false;
                }
                Err(e) => {
                    warn!(shard = index, adapter = %shard.name(None), error = %e, "Shard flush failed");
                    flushed = false;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    async fn ping(&self) -> bool {
        for shard in &self.shards {
            if !shard.ping().await {
                return false;
            }
        }
        true
    }

    async fn size(&self) -> CachetResult<u64> {
        let mut total = 0u64;
        for shard in &self.shards {
            total += shard.size().await?;
        }
        Ok(total)
    }

    fn name(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => self.route(key).name(Some(key)),
            None => self.shards[0].name(None),
        }
    }

    /// Fan out to every shard. Unsupported unless every shard supports it.
    async fn purge_prefix(&self, prefix: &str) -> CachetResult<Option<u64>> {
        let mut removed = 0u64;
        let mut supported = true;
        for shard in &self.shards {
            match shard.purge_prefix(prefix).await? {
                Some(count) => removed += count,
                None => supported = false,
            }
        }
        Ok(supported.then_some(removed))
    }

    fn set_max_retries(&self, max_retries: u32) {
        for shard in &self.shards {
            shard.set_max_retries(max_retries);
        }
    }

    fn set_retry_delay(&self, retry_delay_ms: u64) {
        for shard in &self.shards {
            shard.set_retry_delay(retry_delay_ms);
        }
    }

    fn max_retries(&self) -> u32 {
        self.shards[0].max_retries()
    }

    fn retry_delay(&self) -> u64 {
        self.shards[0].retry_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::StoreError;
    use cachet_test_utils::generators::arb_key;
    use cachet_test_utils::mocks::MockAdapter;
    use cachet_test_utils::{assertions, fixtures};
    use proptest::prelude::*;

    fn router(mocks: &[Arc<MockAdapter>]) -> ShardedAdapter {
        let shards = mocks
            .iter()
            .map(|mock| Arc::clone(mock) as Arc<dyn CacheAdapter>)
            .collect();
        ShardedAdapter::new(shards).unwrap()
    }

    #[test]
    fn test_zero_shards_is_rejected() {
        let result = ShardedAdapter::new(Vec::new()).map(|_| ());
        assertions::assert_config_error(&result);
    }

    #[test]
    fn test_route_index_matches_crc32() {
        let mocks = fixtures::mock_shards(3);
        let router = router(&mocks);
        for key in ["user:1", "user:2", "session:abc"] {
            let expected = crc32fast::hash(key.as_bytes()) as usize % 3;
            assert_eq!(router.route_index(key), expected);
        }
    }

    #[tokio::test]
    async fn test_keyed_operations_go_to_routed_shard() {
        let mocks = fixtures::mock_shards(4);
        let router = router(&mocks);

        router.save("user:1", Payload::text("a"), None).await.unwrap();
        let index = router.route_index("user:1");
        for (i, mock) in mocks.iter().enumerate() {
            assert_eq!(mock.len(), usize::from(i == index));
        }

        assert_eq!(
            router.load("user:1", 60, None).await.unwrap(),
            Some(Payload::text("a"))
        );
        assert_eq!(router.name(Some("user:1")), format!("shard-{index}"));
        assert_eq!(router.name(None), "shard-0");
    }

    #[tokio::test]
    async fn test_flush_attempts_every_shard() {
        let mocks: Vec<Arc<MockAdapter>> = vec![
            Arc::new(MockAdapter::new("shard-0")),
            Arc::new(MockAdapter::new("shard-1")),
            Arc::new(MockAdapter::new("shard-2").failing_flush()),
            Arc::new(MockAdapter::new("shard-3")),
        ];
        let router = router(&mocks);

        assert!(!router.flush().await.unwrap());
        for mock in &mocks {
            assert_eq!(mock.flushes(), 1);
        }
    }

    #[tokio::test]
    async fn test_flush_error_still_attempts_every_shard() {
        let mocks = fixtures::mock_shards(4);
        for mock in &mocks {
            mock.save("k", Payload::text("v"), None).await.unwrap();
        }
        mocks[1].set_fail_commands(true);
        mocks[2].set_fail_commands(true);
        let router = router(&mocks);

        match router.flush().await {
            Err(CachetError::Store(StoreError::Command { backend, .. })) => {
                assert_eq!(backend, "shard-1");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        for mock in &mocks {
            assert_eq!(mock.flushes(), 1);
        }
        // Healthy shards after the failing ones were still flushed.
        assert!(mocks[0].is_empty() && mocks[3].is_empty());
        assert_eq!(mocks[2].len(), 1);
    }

    #[tokio::test]
    async fn test_flush_succeeds_when_all_shards_do() {
        let mocks = fixtures::mock_shards(3);
        assert!(router(&mocks).flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_fails_fast() {
        let mocks = fixtures::mock_shards(3);
        mocks[0].set_fail_ping(true);
        let router = router(&mocks);

        assert!(!router.ping().await);
        assert_eq!(mocks[1].calls(), 0);
        assert_eq!(mocks[2].calls(), 0);
    }

    #[tokio::test]
    async fn test_size_sums_shards() {
        let mocks = fixtures::mock_shards(3);
        let router = router(&mocks);
        for i in 0..10 {
            router
                .save(&format!("key:{i}"), Payload::text("v"), None)
                .await
                .unwrap();
        }
        assert_eq!(router.size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_purge_prefix_fans_out() {
        let mocks = fixtures::mock_shards(3);
        let router = router(&mocks);
        for i in 0..6 {
            router
                .save(&format!("session:{i}"), Payload::text("v"), None)
                .await
                .unwrap();
        }
        router.save("user:1", Payload::text("v"), None).await.unwrap();

        assert_eq!(router.purge_prefix("session:").await.unwrap(), Some(6));
        assert_eq!(router.size().await.unwrap(), 1);
    }

    #[test]
    fn test_retry_setters_fan_out() {
        let mocks = fixtures::mock_shards(3);
        let router = router(&mocks);
        router.set_max_retries(4);
        router.set_retry_delay(250);

        for mock in &mocks {
            assert_eq!(mock.max_retries(), 4);
            assert_eq!(mock.retry_delay(), 250);
        }
        assert_eq!(router.max_retries(), 4);
        assert_eq!(router.retry_delay(), 250);
    }

    proptest! {
        #[test]
        fn prop_routing_is_deterministic(key in arb_key(), count in 1usize..16) {
            let mocks = fixtures::mock_shards(count);
            let router = router(&mocks);
            let first = router.route_index(&key);
            prop_assert!(first < count);
            prop_assert_eq!(router.route_index(&key), first);
        }
    }
}
