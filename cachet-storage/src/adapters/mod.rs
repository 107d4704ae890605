//! Concrete cache adapters.
//!
//! Each adapter implements [`cachet_core::CacheAdapter`] over one kind of
//! store. Network-backed adapters compose a
//! [`cachet_core::ResilientExecutor`] so connection failures are retried
//! with reconnect; local adapters have nothing to retry.

pub mod filesystem;
pub mod memcached;
pub mod memory;
pub mod none;
pub mod redis;

pub use filesystem::FilesystemAdapter;
pub use memcached::{MemcachedAdapter, MemcachedConnector};
pub use memory::MemoryAdapter;
pub use none::NoneAdapter;
pub use self::redis::{
    RedisAdapter, RedisClusterAdapter, RedisClusterConnector, RedisConnector,
    RedisStandaloneAdapter,
};

/// Field used when a caller passes no hash key.
pub(crate) fn field_for<'a>(key: &'a str, hash_key: Option<&'a str>) -> &'a str {
    match hash_key {
        Some(hash_key) if !hash_key.is_empty() => hash_key,
        _ => key,
    }
}
