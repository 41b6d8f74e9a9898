//! Key-value cache used as a read-through layer over the profile store.
//!
//! The cache is never authoritative: misses fall back to the store and
//! repopulate with a bounded TTL, and every write path that could change
//! profile content deletes the key outright — entries are never updated in
//! place, accepting thundering-herd-on-miss over staleness.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Cache key for a user's serialized profile list.
#[must_use]
pub fn profile_cache_key(project_id: &str, user_id: &str) -> String {
    format!("profile::{project_id}::{user_id}")
}

/// String KV cache with TTL semantics. Redis-shaped so a shared-store
/// backend can be swapped in behind the same seam.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
}

// ── In-memory implementation ─────────────────────────────────────

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KvCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v".into(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = InMemoryCache::new();
        assert!(cache.get("absent").await.is_none());
    }

    #[test]
    fn profile_cache_key_layout() {
        assert_eq!(profile_cache_key("proj", "u1"), "profile::proj::u1");
    }
}
