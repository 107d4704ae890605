//! cachet - Uniform Cache Access
//!
//! One contract over many key-value stores. Application code talks to the
//! [`Cache`] facade; behind it sits any [`CacheAdapter`]: a single store, a
//! sharding router over several, or a pool of identical instances.
//!
//! ```ignore
//! use std::sync::Arc;
//! use cachet::{Cache, ConnectionDescriptor, RedisAdapter, RetryPolicy};
//!
//! let redis = RedisAdapter::new(ConnectionDescriptor::new("127.0.0.1", 6379), RetryPolicy::new(3, 100));
//! let cache = Cache::new(Arc::new(redis));
//!
//! cache.save("user:1", serde_json::json!({"name": "a"}), None).await?;
//! let hit = cache.load("USER:1", 3600, None).await?;
//! ```

pub mod cache;
pub mod telemetry;

pub use cache::Cache;
pub use telemetry::PrometheusRecorder;

// Re-export the contract and adapters for application code
pub use cachet_core::{
    CacheAdapter, CacheEnvelope, CacheSettings, CachetError, CachetResult, Clock, CodecError,
    ConfigError, ConnectionDescriptor, NotSavedReason, OperationRecorder, Payload, RetryPolicy,
    SaveOutcome, StoreError,
};
pub use cachet_storage::{
    FilesystemAdapter, MemcachedAdapter, MemoryAdapter, NoneAdapter, PooledAdapter, RedisAdapter,
    RedisClusterAdapter, RedisStandaloneAdapter, ShardedAdapter,
};
