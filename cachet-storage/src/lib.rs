//! cachet Storage - Adapters and Composites
//!
//! Concrete [`CacheAdapter`](cachet_core::CacheAdapter) implementations for
//! memory, disk, Redis, Redis Cluster and memcached-compatible stores, plus
//! the two composites built from them: the sharding router and the pooled
//! adapter. Composites are adapters too, so they nest freely.

pub mod adapters;
pub mod pool;
pub mod sharding;

pub use adapters::{
    FilesystemAdapter, MemcachedAdapter, MemcachedConnector, MemoryAdapter, NoneAdapter,
    RedisAdapter, RedisClusterAdapter, RedisClusterConnector, RedisConnector,
    RedisStandaloneAdapter,
};
pub use pool::PooledAdapter;
pub use sharding::ShardedAdapter;
