//! Memcached-compatible adapter.
//!
//! Speaks the text protocol, so it also works against stores that only
//! emulate memcached (Hazelcast and friends). Those usually reject
//! `flush_all`; build the adapter with flush disabled and `flush` reports
//! `false` instead of erroring.

use std::collections::HashMap;
use std::future::Future;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Duration;

use async_memcached::{AsciiProtocol, Client};
use async_trait::async_trait;
use cachet_core::envelope::{self, fresh_payload};
use cachet_core::{
    classify, system_clock, Backoff, CacheAdapter, CachetResult, Clock, ConnectionDescriptor,
    Connector, Payload, ResilientExecutor, RetryPolicy, SaveOutcome, StoreError,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MEMCACHED: &str = "memcached";

/// Shared handle to one client. The client is not multiplexed, so commands
/// take turns on the socket.
pub type MemcachedConnection = Arc<Mutex<Client>>;

/// Await one client command, bounded by `timeout`.
async fn command<T, E, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify(MEMCACHED, e.to_string())),
        Err(_) => Err(StoreError::connection(MEMCACHED, "command timed out")),
    }
}

/// Builds memcached clients from a descriptor.
#[derive(Debug, Clone)]
pub struct MemcachedConnector {
    descriptor: ConnectionDescriptor,
}

impl MemcachedConnector {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }

    fn dsn(&self) -> String {
        format!("tcp://{}", self.descriptor.address())
    }
}

#[async_trait]
impl Connector for MemcachedConnector {
    type Connection = MemcachedConnection;

    fn backend(&self) -> &str {
        MEMCACHED
    }

    async fn connect(&self) -> Result<MemcachedConnection, StoreError> {
        match tokio::time::timeout(self.descriptor.timeout, Client::new(self.dsn())).await {
            Ok(Ok(client)) => {
                debug!(address = %self.descriptor.address(), "Connected to memcached");
                Ok(Arc::new(Mutex::new(client)))
            }
            // Nothing was sent yet, so any failure here is a connection failure.
            Ok(Err(e)) => Err(StoreError::connection(MEMCACHED, e.to_string())),
            Err(_) => Err(StoreError::connection(
                MEMCACHED,
                format!("connect to {} timed out", self.descriptor.address()),
            )),
        }
    }

    fn persistent(&self) -> bool {
        self.descriptor.persistent
    }
}

/// Adapter for memcached-protocol stores.
///
/// Memcached has no native grouping: a hash key is folded into the stored
/// key as `key:hash_key` and `list` always answers empty.
///
/// The folded key shares the plain key space, so `("user", "1")` and the
/// plain key `user:1` address the same item. `purge(key, None)` removes only
/// the plain key; fields saved under it stay until purged one by one or
/// flushed.
pub struct MemcachedAdapter {
    executor: ResilientExecutor<MemcachedConnector>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    flush_enabled: bool,
    name: String,
}

impl MemcachedAdapter {
    /// Create an adapter that connects on first use.
    pub fn new(descriptor: ConnectionDescriptor, policy: RetryPolicy) -> Self {
        let name = format!("{}@{}", MEMCACHED, descriptor.address());
        let timeout = descriptor.timeout;
        Self {
            executor: ResilientExecutor::new(
                MemcachedConnector::new(descriptor),
                policy,
                Backoff::Fixed,
            ),
            clock: system_clock(),
            timeout,
            flush_enabled: true,
            name,
        }
    }

    /// Disable `flush_all` for endpoints that do not support it.
    pub fn with_flush_enabled(mut self, flush_enabled: bool) -> Self {
        self.flush_enabled = flush_enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn executor(&self) -> &ResilientExecutor<MemcachedConnector> {
        &self.executor
    }
}

/// Key actually stored for `key` and `hash_key`.
fn stored_key(key: &str, hash_key: Option<&str>) -> String {
    match hash_key {
        Some(hash_key) if !hash_key.is_empty() && hash_key != key => {
            format!("{key}:{hash_key}")
        }
        _ => key.to_string(),
    }
}

/// Item count reported by a `stats` reply.
fn current_items<S: BuildHasher>(stats: &HashMap<String, String, S>) -> u64 {
    stats
        .get("curr_items")
        .and_then(|items| items.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl CacheAdapter for MemcachedAdapter {
    async fn load(
        &self,
        key: &str,
        ttl: u64,
        hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        if key.is_empty() {
            return Ok(None);
        }

        let stored = stored_key(key, hash_key);
        let stored = stored.as_str();
        let timeout = self.timeout;
        let value = self
            .executor
            .execute("load", |conn| async move {
                let mut client = conn.lock().await;
                command(timeout, client.get(stored)).await
            })
            .await?;

        let Some(data) = value.and_then(|value| value.data) else {
            return Ok(None);
        };
        match String::from_utf8(data) {
            Ok(raw) => Ok(fresh_payload(&raw, ttl, self.clock.as_ref())),
            Err(e) => {
                warn!(key = stored, error = %e, "Discarding non UTF-8 cache entry");
                Ok(None)
            }
        }
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

        let stored = stored_key(key, hash_key);
        let stored = stored.as_str();
        let raw = envelope::encode(&payload, self.clock.as_ref())?;
        let raw = raw.as_bytes();
        let timeout = self.timeout;
        self.executor
            .execute("save", |conn| async move {
                let mut client = conn.lock().await;
                // Expiry is judged on read; the item itself never expires.
                command(timeout, client.set(stored, raw, None, None)).await
            })
            .await?;

        Ok(SaveOutcome::Saved(payload))
    }

    async fn list(&self, _key: &str) -> CachetResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let stored = stored_key(key, hash_key);
        let stored = stored.as_str();
        let timeout = self.timeout;
        self.executor
            .execute("purge", |conn| async move {
                let mut client = conn.lock().await;
                if command(timeout, client.get(stored)).await?.is_none() {
                    return Ok(false);
                }
                match command(timeout, client.delete(stored)).await {
                    Ok(()) => Ok(true),
                    // Gone between the lookup and the delete.
                    Err(StoreError::Command { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn flush(&self) -> CachetResult<bool> {
        if !self.flush_enabled {
            return Ok(false);
        }

        let timeout = self.timeout;
        self.executor
            .execute("flush", |conn| async move {
                let mut client = conn.lock().await;
                command(timeout, client.flush_all()).await
            })
            .await?;
        Ok(true)
    }

    async fn ping(&self) -> bool {
        let timeout = self.timeout;
        let result = self
            .executor
            .execute("ping", |conn| async move {
                let mut client = conn.lock().await;
                command(timeout, client.version()).await
            })
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(backend = MEMCACHED, error = %e, "Ping failed");
                false
            }
        }
    }

    async fn size(&self) -> CachetResult<u64> {
        let timeout = self.timeout;
        let stats = self
            .executor
            .execute("size", |conn| async move {
                let mut client = conn.lock().await;
                command(timeout, client.stats()).await
            })
            .await?;

        Ok(current_items(&stats))
    }

    fn name(&self, _key: Option<&str>) -> String {
        self.name.clone()
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

    #[test]
    fn test_stored_key_folds_hash_key() {
        assert_eq!(stored_key("user:1", None), "user:1");
        assert_eq!(stored_key("user:1", Some("user:1")), "user:1");
        assert_eq!(stored_key("user:1", Some("")), "user:1");
        assert_eq!(stored_key("user:1", Some("profile")), "user:1:profile");
    }

    #[test]
    fn test_dsn_and_name() {
        let descriptor = ConnectionDescriptor::new("10.0.0.5", 11211);
        let connector = MemcachedConnector::new(descriptor.clone());
        assert_eq!(connector.dsn(), "tcp://10.0.0.5:11211");

        let adapter = MemcachedAdapter::new(descriptor, RetryPolicy::default());
        assert_eq!(adapter.name(Some("k")), "memcached@10.0.0.5:11211");
    }

    #[test]
    fn test_current_items_from_stats() {
        let mut stats = HashMap::new();
        assert_eq!(current_items(&stats), 0);
        stats.insert("curr_items".to_string(), "42".to_string());
        assert_eq!(current_items(&stats), 42);
        stats.insert("curr_items".to_string(), "garbage".to_string());
        assert_eq!(current_items(&stats), 0);
    }

    /// Minimal text-protocol server keeping items in memory.
    async fn spawn_memcached() -> ConnectionDescriptor {
        use std::collections::HashMap as Items;
        use std::sync::Mutex as SyncMutex;
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        let items: Arc<SyncMutex<Items<String, Vec<u8>>>> = Arc::default();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let items = Arc::clone(&items);
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut reader = BufReader::new(read);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let parts: Vec<String> =
                            line.split_whitespace().map(str::to_string).collect();
                        let Some(verb) = parts.first() else { continue };
                        let reply = match verb.as_str() {
                            "get" | "gets" => {
                                let mut reply = Vec::new();
                                let items = items.lock().unwrap();
                                for key in &parts[1..] {
                                    if let Some(data) = items.get(key) {
                                        let header = if verb == "gets" {
                                            format!("VALUE {} 0 {} 1\r\n", key, data.len())
                                        } else {
                                            format!("VALUE {} 0 {}\r\n", key, data.len())
                                        };
                                        reply.extend_from_slice(header.as_bytes());
                                        reply.extend_from_slice(data);
                                        reply.extend_from_slice(b"\r\n");
                                    }
                                }
                                reply.extend_from_slice(b"END\r\n");
                                reply
                            }
                            "set" => {
                                let len: usize = parts[4].parse().unwrap();
                                let mut data = vec![0u8; len + 2];
                                reader.read_exact(&mut data).await.unwrap();
                                data.truncate(len);
                                items.lock().unwrap().insert(parts[1].clone(), data);
                                b"STORED\r\n".to_vec()
                            }
                            "delete" => {
                                let removed = items.lock().unwrap().remove(&parts[1]);
                                match removed {
                                    Some(_) => b"DELETED\r\n".to_vec(),
                                    None => b"NOT_FOUND\r\n".to_vec(),
                                }
                            }
                            "flush_all" => {
                                items.lock().unwrap().clear();
                                b"OK\r\n".to_vec()
                            }
                            "version" => b"VERSION 1.6.21\r\n".to_vec(),
                            "stats" => {
                                let count = items.lock().unwrap().len();
                                format!("STAT curr_items {count}\r\nEND\r\n").into_bytes()
                            }
                            _ => b"ERROR\r\n".to_vec(),
                        };
                        if write.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        ConnectionDescriptor::new("127.0.0.1", port).with_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_roundtrip_against_text_protocol_server() {
        let descriptor = spawn_memcached().await;
        let clock = cachet_test_utils::ManualClock::default();
        let adapter = MemcachedAdapter::new(descriptor, RetryPolicy::new(1, 10))
            .with_clock(clock.shared());
        let payload = Payload::structured(serde_json::json!({"name": "a"}));

        assert!(adapter.ping().await);
        let outcome = adapter.save("user:1", payload.clone(), None).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved(payload.clone()));
        adapter.save("user:1", Payload::text("x"), Some("profile")).await.unwrap();

        assert_eq!(adapter.load("user:1", 60, None).await.unwrap(), Some(payload));
        assert_eq!(
            adapter.load("user:1", 60, Some("profile")).await.unwrap(),
            Some(Payload::text("x"))
        );
        assert_eq!(adapter.load("user:2", 60, None).await.unwrap(), None);
        assert_eq!(adapter.size().await.unwrap(), 2);

        clock.advance(60);
        assert_eq!(adapter.load("user:1", 60, None).await.unwrap(), None);

        // Only the plain key goes; the folded field stays.
        assert!(adapter.purge("user:1", None).await.unwrap());
        assert!(!adapter.purge("user:1", None).await.unwrap());
        assert_eq!(adapter.size().await.unwrap(), 1);

        assert!(adapter.flush().await.unwrap());
        assert_eq!(adapter.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_folded_field_shares_plain_key_space() {
        let descriptor = spawn_memcached().await;
        let adapter = MemcachedAdapter::new(descriptor, RetryPolicy::new(1, 10));

        adapter.save("user", Payload::text("a"), Some("1")).await.unwrap();
        assert_eq!(
            adapter.load("user:1", 60, None).await.unwrap(),
            Some(Payload::text("a"))
        );

        assert!(!adapter.purge("user", None).await.unwrap());
        assert!(adapter.purge("user", Some("1")).await.unwrap());
        assert_eq!(adapter.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disabled_flush_reports_false_without_contact() {
        let adapter = MemcachedAdapter::new(fixtures::unreachable_descriptor(), RetryPolicy::default())
            .with_flush_enabled(false);
        assert!(!adapter.flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_always_empty() {
        let adapter = MemcachedAdapter::new(fixtures::unreachable_descriptor(), RetryPolicy::default());
        assert!(adapter.list("user:1").await.unwrap().is_empty());
        assert_eq!(adapter.purge_prefix("user:").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_exhausts_retries() {
        cachet_test_utils::init_tracing();
        let adapter = MemcachedAdapter::new(fixtures::unreachable_descriptor(), RetryPolicy::new(1, 10));
        let result = adapter.load("k", 60, None).await;
        assertions::assert_unreachable(&result);
        assert!(!adapter.ping().await);
    }
}
