//! Pooled adapter.
//!
//! Wraps a fixed set of homogeneous adapter instances in a
//! `deadpool::unmanaged` pool. Every call borrows one instance for its whole
//! duration, so no two concurrent callers ever share an instance (and its
//! connection). The borrow guard hands the instance back on every exit path.
//!
//! An exhausted pool makes callers wait up to the configured timeout; past
//! that the call fails with [`CachetError::Pool`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{
    CacheAdapter, CacheSettings, CachetError, CachetResult, ConfigError, Payload, SaveOutcome,
};
use deadpool::unmanaged::{Object, Pool, PoolConfig};
use deadpool::Runtime;
use tracing::warn;

/// Adapter that serves each call from an exclusively borrowed instance.
pub struct PooledAdapter<A: CacheAdapter + 'static> {
    pool: Pool<Arc<A>>,
    members: Vec<Arc<A>>,
    wait_timeout: Duration,
}

impl<A: CacheAdapter + 'static> PooledAdapter<A> {
    /// Pool the given instances. Callers wait at most `wait_timeout` for one.
    ///
    /// Fails with a config error when `instances` is empty.
    pub fn new(instances: Vec<Arc<A>>, wait_timeout: Duration) -> CachetResult<Self> {
        if instances.is_empty() {
            return Err(CachetError::Config(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                value: "0".to_string(),
                reason: "a pooled adapter needs at least one instance".to_string(),
            }));
        }

        let mut config = PoolConfig::new(instances.len());
        config.timeout = Some(wait_timeout);
        config.runtime = Some(Runtime::Tokio1);
        let pool = Pool::from_config(&config);

        for instance in &instances {
            pool.try_add(Arc::clone(instance))
                .map_err(|(_, e)| CachetError::Pool {
                    reason: e.to_string(),
                })?;
        }

        Ok(Self {
            pool,
            members: instances,
            wait_timeout,
        })
    }

    /// Build `settings.pool_size` instances with `factory` and pool them.
    pub fn from_factory<F>(settings: &CacheSettings, mut factory: F) -> CachetResult<Self>
    where
        F: FnMut() -> A,
    {
        settings.validate()?;
        let instances = (0..settings.pool_size)
            .map(|_| Arc::new(factory()))
            .collect();
        let pool = Self::new(instances, settings.pool_wait_timeout())?;
        pool.set_max_retries(settings.max_retries);
        pool.set_retry_delay(settings.retry_delay_ms);
        Ok(pool)
    }

    pub fn pool_size(&self) -> usize {
        self.members.len()
    }

    /// Instances currently waiting in the pool.
    pub fn available(&self) -> usize {
        let available = self.pool.status().available;
        usize::try_from(available).unwrap_or(0)
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    async fn borrow(&self) -> CachetResult<Object<Arc<A>>> {
        self.pool.get().await.map_err(|e| {
            warn!(pool_size = self.members.len(), error = %e, "Pool borrow failed");
            CachetError::Pool {
                reason: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl<A: CacheAdapter + 'static> CacheAdapter for PooledAdapter<A> {
    async fn load(
        &self,
        key: &str,
        ttl: u64,
        hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        let instance = self.borrow().await?;
        instance.load(key, ttl, hash_key).await
    }

    async fn save(
        &self,
        key: &str,
        payload: Payload,
        hash_key: Option<&str>,
    ) -> CachetResult<SaveOutcome> {
        let instance = self.borrow().await?;
        instance.save(key, payload, hash_key).await
    }

    async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
        let instance = self.borrow().await?;
        instance.list(key).await
    }

    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        let instance = self.borrow().await?;
        instance.purge(key, hash_key).await
    }

    async fn flush(&self) -> CachetResult<bool> {
        let instance = self.borrow().await?;
        instance.flush().await
    }

    async fn ping(&self) -> bool {
        match self.borrow().await {
            Ok(instance) => instance.ping().await,
            Err(_) => false,
        }
    }

    async fn size(&self) -> CachetResult<u64> {
        let instance = self.borrow().await?;
        instance.size().await
    }

    fn name(&self, key: Option<&str>) -> String {
        self.members[0].name(key)
    }

    async fn purge_prefix(&self, prefix: &str) -> CachetResult<Option<u64>> {
        let instance = self.borrow().await?;
        instance.purge_prefix(prefix).await
    }

    fn set_max_retries(&self, max_retries: u32) {
        for member in &self.members {
            member.set_max_retries(max_retries);
        }
    }

    fn set_retry_delay(&self, retry_delay_ms: u64) {
        for member in &self.members {
            member.set_retry_delay(retry_delay_ms);
        }
    }

    fn max_retries(&self) -> u32 {
        self.members[0].max_retries()
    }

    fn retry_delay(&self) -> u64 {
        self.members[0].retry_delay()
    }
}
