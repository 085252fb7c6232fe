//! Manager-local metadata cache keyed by (thread, agent).
//!
//! Entries live for the cache TTL from the moment they are written, or less
//! when [`MetadataCache::put_bounded`] caps them at the remaining lifetime of
//! the stored state. The cache only sees changes made through the manager:
//! an entry removed underneath it by capacity eviction stays visible until
//! its own TTL runs out.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agui_state_store::StateMetadata;
use tokio::time::Instant;

type CacheKey = (String, String);

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: StateMetadata,
    /// `None` when the TTL is too long to represent
    expires_at: Option<Instant>,
}

impl CachedMetadata {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CachedMetadata>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // Every mutation is a single insert or remove, so a poisoned map is
    // still consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedMetadata>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(thread_id: &str, agent_name: &str) -> CacheKey {
        (thread_id.to_string(), agent_name.to_string())
    }

    /// Cached metadata, or `None` when absent or expired.
    pub fn get(&self, thread_id: &str, agent_name: &str) -> Option<StateMetadata> {
        let now = Instant::now();
        let key = Self::key(thread_id, agent_name);
        let mut entries = self.entries();
        match entries.get(&key) {
            Some(cached) if cached.is_live(now) => Some(cached.metadata.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, thread_id: &str, agent_name: &str, metadata: StateMetadata) {
        self.insert(thread_id, agent_name, metadata, self.ttl);
    }

    /// Cache `metadata` for at most `lifetime`, never longer than the cache TTL.
    pub fn put_bounded(
        &self,
        thread_id: &str,
        agent_name: &str,
        metadata: StateMetadata,
        lifetime: Duration,
    ) {
        self.insert(thread_id, agent_name, metadata, lifetime.min(self.ttl));
    }

    fn insert(&self, thread_id: &str, agent_name: &str, metadata: StateMetadata, lifetime: Duration) {
        let expires_at = Instant::now().checked_add(lifetime);
        self.entries().insert(
            Self::key(thread_id, agent_name),
            CachedMetadata {
                metadata,
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, thread_id: &str, agent_name: &str) {
        self.entries().remove(&Self::key(thread_id, agent_name));
    }

    /// Drop every entry for `thread_id`, returning how many were removed.
    pub fn invalidate_thread(&self, thread_id: &str) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(thread, _), _| thread != thread_id);
        before - entries.len()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, cached| cached.is_live(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of entries, expired ones included until they are purged.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(version: u64) -> StateMetadata {
        let now = Utc::now();
        StateMetadata {
            created_at: now,
            updated_at: now,
            version,
            size_bytes: 2,
            checksum: "00".repeat(32),
            tags: Default::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MetadataCache::new(Duration::from_secs(300));
        cache.put("t", "a", metadata(1));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("t", "a").map(|m| m.version), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("t", "a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn put_replaces_and_invalidate_removes() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.put("t", "a", metadata(1));
        cache.put("t", "a", metadata(2));
        assert_eq!(cache.get("t", "a").map(|m| m.version), Some(2));

        cache.invalidate("t", "a");
        assert!(cache.get("t", "a").is_none());
    }

    #[tokio::test]
    async fn invalidate_thread_is_scoped() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.put("t1", "a", metadata(1));
        cache.put("t1", "b", metadata(1));
        cache.put("t2", "a", metadata(1));

        assert_eq!(cache.invalidate_thread("t1"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("t2", "a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_counts_removed() {
        let cache = MetadataCache::new(Duration::from_secs(10));
        cache.put("t", "old", metadata(1));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.put("t", "new", metadata(1));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_entries_expire_with_the_state() {
        let cache = MetadataCache::new(Duration::from_secs(300));
        cache.put_bounded("t", "a", metadata(1), Duration::from_secs(2));
        cache.put_bounded("t", "b", metadata(1), Duration::from_secs(900));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("t", "a").is_none());
        assert!(cache.get("t", "b").is_some());

        tokio::time::advance(Duration::from_secs(298)).await;
        assert!(cache.get("t", "b").is_none());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let cache = MetadataCache::new(Duration::from_secs(u64::MAX));
        cache.put("t", "a", metadata(1));
        assert_eq!(cache.get("t", "a").map(|m| m.version), Some(1));
        assert_eq!(cache.purge_expired(), 0);
    }
}
