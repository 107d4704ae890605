//! Process-local adapter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{
    system_clock, CacheAdapter, CacheEnvelope, CachetResult, Clock, Payload, SaveOutcome,
};
use tokio::sync::RwLock;

use super::field_for;

type Groups = HashMap<String, HashMap<String, CacheEnvelope>>;

/// In-memory adapter grouping envelopes by key and hash key.
///
/// Entries live as long as the adapter. An expired envelope is evicted by
/// the load that finds it. The TTL is an argument of each read, so a read
/// with a short TTL also removes the entry for later readers passing a
/// longer one.
#[derive(Debug)]
pub struct MemoryAdapter {
    groups: RwLock<Groups>,
    clock: Arc<dyn Clock>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheAdapter for MemoryAdapter {
    async fn load(
        &self,
        key: &str,
        ttl: u64,
        hash_key: Option<&str>,
    ) -> CachetResult<Option<Payload>> {
        let field = field_for(key, hash_key);
        {
            let groups = self.groups.read().await;
            match groups.get(key).and_then(|fields| fields.get(field)) {
                None => return Ok(None),
                Some(envelope) if envelope.is_valid(ttl, self.clock.as_ref()) => {
                    return Ok(Some(envelope.data.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: evict unless a fresh save landed in between.
        let mut groups = self.groups.write().await;
        if let Some(fields) = groups.get_mut(key) {
            let expired = fields
                .get(field)
                .is_some_and(|envelope| !envelope.is_valid(ttl, self.clock.as_ref()));
            if expired {
                fields.remove(field);
            }
            if fields.is_empty() {
                groups.remove(key);
            }
        }
        Ok(None)
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

        let envelope = CacheEnvelope::now(payload.clone(), self.clock.as_ref());
        self.groups
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field_for(key, hash_key).to_string(), envelope);

        Ok(SaveOutcome::Saved(payload))
    }

    async fn list(&self, key: &str) -> CachetResult<Vec<String>> {
        let groups = self.groups.read().await;
        let mut fields: Vec<String> = groups
            .get(key)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        Ok(fields)
    }

    async fn purge(&self, key: &str, hash_key: Option<&str>) -> CachetResult<bool> {
        let mut groups = self.groups.write().await;
        match hash_key {
            Some(field) if !field.is_empty() => {
                let Some(fields) = groups.get_mut(key) else {
                    return Ok(false);
                };
                let removed = fields.remove(field).is_some();
                if fields.is_empty() {
                    groups.remove(key);
                }
                Ok(removed)
            }
            _ => Ok(groups.remove(key).is_some()),
        }
    }

    async fn flush(&self) -> CachetResult<bool> {
        self.groups.write().await.clear();
        Ok(true)
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn size(&self) -> CachetResult<u64> {
        let groups = self.groups.read().await;
        Ok(groups.values().map(|fields| fields.len() as u64).sum())
    }

    fn name(&self, _key: Option<&str>) -> String {
        "memory".to_string()
    }

    async fn purge_prefix(&self, prefix: &str) -> CachetResult<Option<u64>> {
        let mut groups = self.groups.write().await;
        let mut removed = 0u64;
        groups.retain(|key, fields| {
            if key.starts_with(prefix) {
                removed += fields.len() as u64;
                false
            } else {
                true
            }
        });
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::NotSavedReason;
    use cachet_test_utils::ManualClock;
    use serde_json::json;

    fn adapter() -> (MemoryAdapter, ManualClock) {
        let clock = ManualClock::default();
        (MemoryAdapter::with_clock(clock.shared()), clock)
    }

    #[tokio::test]
    async fn test_save_echoes_and_load_returns_payload() {
        let (adapter, _clock) = adapter();
        let payload = Payload::structured(json!({"name": "a"}));

        let outcome = adapter.save("user:1", payload.clone(), None).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Saved(payload.clone()));
        assert_eq!(adapter.load("user:1", 60, None).await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (adapter, clock) = adapter();
        adapter.save("k", Payload::text("v"), None).await.unwrap();

        clock.advance(59);
        assert!(adapter.load("k", 60, None).await.unwrap().is_some());
        clock.advance(1);
        assert!(adapter.load("k", 60, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_load_evicts() {
        let (adapter, clock) = adapter();
        adapter.save("user:1", Payload::text("a"), Some("name")).await.unwrap();
        adapter.save("user:1", Payload::text("b"), Some("email")).await.unwrap();
        clock.advance(120);

        assert!(adapter.load("user:1", 60, Some("name")).await.unwrap().is_none());
        assert_eq!(adapter.list("user:1").await.unwrap(), vec!["email"]);
        assert!(!adapter.purge("user:1", Some("name")).await.unwrap());

        assert!(adapter.load("user:1", 60, Some("email")).await.unwrap().is_none());
        assert!(!adapter.purge("user:1", None).await.unwrap());
        assert_eq!(adapter.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_short_ttl_read_evicts_for_longer_ttl_readers() {
        let (adapter, clock) = adapter();
        adapter.save("k", Payload::text("v"), None).await.unwrap();
        clock.advance(30);

        assert!(adapter.load("k", 60, None).await.unwrap().is_some());
        assert!(adapter.load("k", 10, None).await.unwrap().is_none());
        assert!(adapter.load("k", 60, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_input_is_not_saved() {
        let (adapter, _clock) = adapter();
        let outcome = adapter.save("", Payload::text("v"), None).await.unwrap();
        assert_eq!(outcome.reason(), Some(NotSavedReason::EmptyKey));

        let outcome = adapter.save("k", Payload::text(""), None).await.unwrap();
        assert_eq!(outcome.reason(), Some(NotSavedReason::EmptyPayload));
        assert_eq!(adapter.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hash_keys_group_under_key() {
        let (adapter, _clock) = adapter();
        adapter.save("user:1", Payload::text("a"), Some("name")).await.unwrap();
        adapter.save("user:1", Payload::text("b"), Some("email")).await.unwrap();

        assert_eq!(adapter.list("user:1").await.unwrap(), vec!["email", "name"]);
        assert_eq!(
            adapter.load("user:1", 60, Some("email")).await.unwrap(),
            Some(Payload::text("b"))
        );
        assert!(adapter.list("user:2").await.unwrap().is_empty());

        assert!(adapter.purge("user:1", Some("email")).await.unwrap());
        assert_eq!(adapter.list("user:1").await.unwrap(), vec!["name"]);
        assert!(adapter.purge("user:1", None).await.unwrap());
        assert!(adapter.list("user:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_is_idempotent() {
        let (adapter, _clock) = adapter();
        adapter.save("k", Payload::text("v"), None).await.unwrap();
        assert!(adapter.purge("k", None).await.unwrap());
        assert!(!adapter.purge("k", None).await.unwrap());
        assert!(!adapter.purge("k", Some("field")).await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_and_size() {
        let (adapter, _clock) = adapter();
        adapter.save("a", Payload::text("1"), None).await.unwrap();
        adapter.save("b", Payload::text("2"), Some("x")).await.unwrap();
        adapter.save("b", Payload::text("3"), Some("y")).await.unwrap();
        assert_eq!(adapter.size().await.unwrap(), 3);

        assert!(adapter.flush().await.unwrap());
        assert_eq!(adapter.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_prefix() {
        let (adapter, _clock) = adapter();
        adapter.save("session:1", Payload::text("a"), None).await.unwrap();
        adapter.save("session:2", Payload::text("b"), None).await.unwrap();
        adapter.save("user:1", Payload::text("c"), None).await.unwrap();

        assert_eq!(adapter.purge_prefix("session:").await.unwrap(), Some(2));
        assert_eq!(adapter.size().await.unwrap(), 1);
        assert_eq!(adapter.purge_prefix("session:").await.unwrap(), Some(0));
    }
}
