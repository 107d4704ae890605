//! Redis and Redis Cluster adapters.
//!
//! Every entry lives in a hash: the cache key is the Redis key and the hash
//! key is the field, so related entries can be listed with `HKEYS` and
//! dropped together with `DEL`. Values are encoded envelopes; expiry is
//! evaluated on read, Redis itself never expires anything.
//!
//! Standalone servers use one multiplexed connection with fixed retry delay.
//! Clusters use a cluster connection with exponential backoff. Either way a
//! reconnect builds a brand new client from the saved descriptor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::envelope::{self, fresh_payload};
use cachet_core::{
    classify, system_clock, Backoff, CacheAdapter, CachetError, CachetResult, Clock,
    ConfigError, ConnectionDescriptor, Connector, Payload, ResilientExecutor, RetryPolicy,
    SaveOutcome, StoreError,
};
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError, RedisResult};
use tracing::{debug, warn};

use super::field_for;

const REDIS: &str = "redis";
const REDIS_CLUSTER: &str = "redis-cluster";

/// Keys fetched per `SCAN` round trip during prefix purges.
const SCAN_BATCH: usize = 100;

/// Classify a native Redis error, preferring the client's own hints.
pub fn classify_redis(backend: &str, err: &RedisError) -> StoreError {
    if err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_io_error()
        || err.is_timeout()
    {
        return StoreError::connection(backend, err.to_string());
    }
    classify(backend, err.to_string())
}

/// Await one Redis command, bounded by `timeout`.
async fn command<T, F>(backend: &str, timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify_redis(backend, &e)),
        Err(_) => Err(StoreError::connection(backend, "command timed out")),
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

// ============================================================================
// CONNECTORS
// ============================================================================

/// Builds multiplexed connections to one standalone server.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    descriptor: ConnectionDescriptor,
}

impl RedisConnector {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.descriptor.host.clone(), self.descriptor.port),
            redis: RedisConnectionInfo {
                db: self.descriptor.database,
                username: self.descriptor.username.clone(),
                password: self.descriptor.password.clone(),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = MultiplexedConnection;

    fn backend(&self) -> &str {
        REDIS
    }

    async fn connect(&self) -> Result<MultiplexedConnection, StoreError> {
        let client = redis::Client::open(self.connection_info())
            .map_err(|e| classify_redis(REDIS, &e))?;

        match tokio::time::timeout(
            self.descriptor.timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(connection)) => {
                debug!(address = %self.descriptor.address(), "Connected to Redis");
                Ok(connection)
            }
            Ok(Err(e)) => Err(classify_redis(REDIS, &e)),
            Err(_) => Err(StoreError::connection(
                REDIS,
                format!("connect to {} timed out", self.descriptor.address()),
            )),
        }
    }

    fn persistent(&self) -> bool {
        self.descriptor.persistent
    }
}

/// Builds cluster connections from a list of seed nodes.
#[derive(Debug, Clone)]
pub struct RedisClusterConnector {
    seeds: Vec<ConnectionDescriptor>,
}

impl RedisClusterConnector {
    /// Create a connector. At least one seed node is required.
    pub fn new(seeds: Vec<ConnectionDescriptor>) -> CachetResult<Self> {
        if seeds.is_empty() {
            return Err(CachetError::Config(ConfigError::MissingRequired {
                field: "seeds".to_string(),
            }));
        }
        Ok(Self { seeds })
    }

    pub fn seeds(&self) -> &[ConnectionDescriptor] {
        &self.seeds
    }

    fn primary(&self) -> &ConnectionDescriptor {
        // Non-empty by construction.
        &self.seeds[0]
    }
}

#[async_trait]
impl Connector for RedisClusterConnector {
    type Connection = ClusterConnection;

    fn backend(&self) -> &str {
        REDIS_CLUSTER
    }

    async fn connect(&self) -> Result<ClusterConnection, StoreError> {
        let nodes: Vec<String> = self
            .seeds
            .iter()
            .map(|seed| format!("redis://{}", seed.address()))
            .collect();

        let primary = self.primary();
        let mut builder = ClusterClient::builder(nodes);
        if let Some(username) = &primary.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &primary.password {
            builder = builder.password(password.clone());
        }
        let client = builder
            .build()
            .map_err(|e| classify_redis(REDIS_CLUSTER, &e))?;

        match tokio::time::timeout(primary.timeout, client.get_async_connection()).await {
            Ok(Ok(connection)) => {
                debug!(seeds = self.seeds.len(), "Connected to Redis cluster");
                Ok(connection)
            }
            Ok(Err(e)) => Err(classify_redis(REDIS_CLUSTER, &e)),
            Err(_) => Err(StoreError::connection(
                REDIS_CLUSTER,
                "cluster connect timed out",
            )),
        }
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

/// Hash-backed Redis adapter over any connector.
pub struct RedisAdapter<K: Connector> {
    executor: ResilientExecutor<K>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    name: String,
    scan_purge: bool,
}

/// Adapter for one standalone Redis server.
pub type RedisStandaloneAdapter = RedisAdapter<RedisConnector>;

/// Adapter for a Redis Cluster.
pub type RedisClusterAdapter = RedisAdapter<RedisClusterConnector>;

impl RedisAdapter<RedisConnector> {
    /// Create an adapter that connects on first use.
    pub fn new(descriptor: ConnectionDescriptor, policy: RetryPolicy) -> Self {
        let name = format!("{}@{}", REDIS, descriptor.address());
        let timeout = descriptor.timeout;
        Self {
            executor: ResilientExecutor::new(RedisConnector::new(descriptor), policy, Backoff::Fixed),
            clock: system_clock(),
            timeout,
            name,
            scan_purge: true,
        }
    }

    /// Create an adapter and establish its connection up front.
    pub async fn connect(descriptor: ConnectionDescriptor, policy: RetryPolicy) -> CachetResult<Self> {
        let adapter = Self::new(descriptor, policy);
        adapter.executor.connection().await?;
        Ok(adapter)
    }
}

impl RedisAdapter<RedisClusterConnector> {
    /// Create a cluster adapter that connects on first use.
    ///
    /// Fails with a config error when `seeds` is empty.
    pub fn cluster(seeds: Vec<ConnectionDescriptor>, policy: RetryPolicy) -> CachetResult<Self> {
        let connector = RedisClusterConnector::new(seeds)?;
        let timeout = connector.primary().timeout;
        Ok(Self {
            executor: ResilientExecutor::new(connector, policy, Backoff::Exponential),
            clock: system_clock(),
            timeout,
            name: REDIS_CLUSTER.to_string(),
            // SCAN only walks the node it lands on.
            scan_purge: false,
        })
    }
}

impl<K> RedisAdapter<K>
where
    K: Connector,
    K::Connection: ConnectionLike,
{
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn executor(&self) -> &ResilientExecutor<K> {
        &self.executor
    }

    fn backend(&self) -> &str {
        self.executor.connector().backend()
    }
}

#[async_trait]
impl<K> CacheAdapter for RedisAdapter<K>
where
    K: Connector,
    K::Connection: ConnectionLike,
{
    async fn load(
        &self,
        key: &str,
        ttl: u64,
        hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        if key.is_empty() {
            return Ok(None);
        }

        let (backend, timeout) = (self.backend(), self.timeout);
        let field = field_for(key, hash_key);
        let raw = self
            .executor
            .execute("load", |mut conn| async move {
                let mut cmd = redis::cmd("HGET");
                cmd.arg(key).arg(field);
                command::<Option<String>, _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await?;

        Ok(raw.and_then(|raw| fresh_payload(&raw, ttl, self.clock.as_ref())))
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

        let (backend, timeout) = (self.backend(), self.timeout);
        let field = field_for(key, hash_key);
        let raw = envelope::encode(&payload, self.clock.as_ref())?;
        let raw = raw.as_str();
        self.executor
            .execute("save", |mut conn| async move {
                let mut cmd = redis::cmd("HSET");
                cmd.arg(key).arg(field).arg(raw);
                command::<(), _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await?;

        Ok(SaveOutcome::Saved(payload))
    }

    async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }

        let (backend, timeout) = (self.backend(), self.timeout);
        self.executor
            .execute("list", |mut conn| async move {
                let mut cmd = redis::cmd("HKEYS");
                cmd.arg(key);
                command::<Vec<String>, _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await
    }

    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let (backend, timeout) = (self.backend(), self.timeout);
        let field = hash_key.filter(|field| !field.is_empty());
        let removed = self
            .executor
            .execute("purge", |mut conn| async move {
                let cmd = match field {
                    Some(field) => {
                        let mut cmd = redis::cmd("HDEL");
                        cmd.arg(key).arg(field);
                        cmd
                    }
                    None => {
                        let mut cmd = redis::cmd("DEL");
                        cmd.arg(key);
                        cmd
                    }
                };
                command::<u64, _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await?;

        Ok(removed > 0)
    }

    async fn flush(&self) -> CachetResult<bool> {
        let (backend, timeout) = (self.backend(), self.timeout);
        self.executor
            .execute("flush", |mut conn| async move {
                let cmd = redis::cmd("FLUSHALL");
                command::<(), _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await?;
        Ok(true)
    }

    async fn ping(&self) -> bool {
        let (backend, timeout) = (self.backend(), self.timeout);
        let result = self
            .executor
            .execute("ping", |mut conn| async move {
                let cmd = redis::cmd("PING");
                command::<String, _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await;

        match result {
            Ok(pong) => pong == "PONG",
            Err(e) => {
                warn!(backend, error = %e, "Ping failed");
                false
            }
        }
    }

    async fn size(&self) -> CachetResult<u64> {
        let (backend, timeout) = (self.backend(), self.timeout);
        self.executor
            .execute("size", |mut conn| async move {
                let cmd = redis::cmd("DBSIZE");
                command::<u64, _>(backend, timeout, cmd.query_async(&mut conn)).await
            })
            .await
    }

    fn name(&self, _key: Option<&str>) -> String {
        self.name.clone()
    }

    async fn purge_prefix(&self, prefix: &str) -> CachetResult<Option<u64>> {
        if !self.scan_purge {
            return Ok(None);
        }

        let (backend, timeout) = (self.backend(), self.timeout);
        let pattern = escape_pattern(prefix);
        let pattern = pattern.as_str();
        let removed = self
            .executor
            .execute("purge_prefix", |mut conn| async move {
                let mut removed = 0u64;
                let mut cursor = 0u64;
                loop {
                    let mut scan = redis::cmd("SCAN");
                    scan.arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH);
                    let (next, keys) = command::<(u64, Vec<String>), _>(
                        backend,
                        timeout,
                        scan.query_async(&mut conn),
                    )
                    .await?;

                    if !keys.is_empty() {
                        let mut del = redis::cmd("DEL");
                        del.arg(&keys);
                        removed +=
                            command::<u64, _>(backend, timeout, del.query_async(&mut conn)).await?;
                    }

                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Ok::<_, StoreError>(removed)
            })
            .await?;

        debug!(backend, prefix, removed, "Purged keys by prefix");
        Ok(Some(removed))
    }

    fn set_max_retries(&self, max_retries: u32) {
        self.executor.set_max_retries(max_retries);
    }

    fn set_retry_delay(&self, retry_delay_ms: u64) {
        self.executor.set_retry_delay(retry_delay_ms);
    }

    fn max_retries(&self) -> u32 {
        self.executor.policy().max_retries
    }

    fn retry_delay(&self) -> u64 {
        self.executor.policy().retry_delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_test_utils::{assertions, fixtures};
    use std::time::Duration;

    #[test]
    fn test_escape_pattern() {
        assert_eq!(escape_pattern("session:"), "session:*");
        assert_eq!(escape_pattern("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }

    #[test]
    fn test_connection_info_carries_auth_and_db() {
        let connector = RedisConnector::new(
            ConnectionDescriptor::new("cache.internal", 6380)
                .with_auth(Some("app".to_string()), "secret")
                .with_database(2),
        );
        let info = connector.connection_info();
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.username.as_deref(), Some("app"));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_cluster_requires_seeds() {
        let result = RedisAdapter::cluster(Vec::new(), RetryPolicy::default()).map(|_| ());
        assertions::assert_config_error(&result);
    }

    #[test]
    fn test_cluster_uses_exponential_backoff() {
        let adapter = RedisAdapter::cluster(
            vec![ConnectionDescriptor::new("127.0.0.1", 7000)],
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(adapter.executor().backoff(), Backoff::Exponential);
        assert_eq!(adapter.name(None), "redis-cluster");
    }

    #[test]
    fn test_retry_setters_clamp() {
        let adapter = RedisAdapter::new(fixtures::unreachable_descriptor(), RetryPolicy::default());
        adapter.set_max_retries(25);
        adapter.set_retry_delay(40);
        assert_eq!(adapter.max_retries(), 10);
        assert_eq!(adapter.retry_delay(), 40);
        assert_eq!(adapter.executor().backoff(), Backoff::Fixed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_command_times_out_as_connection_failure() {
        let stalled = std::future::pending::<RedisResult<String>>();
        let result = command(REDIS, Duration::from_millis(50), stalled).await;
        assert!(matches!(result, Err(StoreError::Connection { .. })));

        let adapter = RedisAdapter::new(
            fixtures::unreachable_descriptor().with_timeout(Duration::from_millis(75)),
            RetryPolicy::default(),
        );
        assert_eq!(adapter.timeout, Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_unreachable_server_exhausts_retries() {
        cachet_test_utils::init_tracing();
        let adapter = RedisAdapter::new(
            fixtures::unreachable_descriptor(),
            RetryPolicy::new(1, 10),
        );

        let result = adapter.load("k", 60, None).await;
        match result {
            Err(CachetError::RetriesExhausted { attempts, backend, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(backend, "redis");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!adapter.ping().await);
    }

    #[tokio::test]
    async fn test_empty_input_never_contacts_server() {
        let adapter = RedisAdapter::new(
            fixtures::unreachable_descriptor().with_timeout(Duration::from_secs(30)),
            RetryPolicy::new(10, 1000),
        );
        let outcome = adapter.save("", Payload::text("v"), None).await.unwrap();
        assert!(!outcome.is_saved());
        assert_eq!(adapter.load("", 60, None).await.unwrap(), None);
        assert!(!adapter.purge("", None).await.unwrap());
    }
}
