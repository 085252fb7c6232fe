//! In-memory byte storage backend.
//!
//! One table of entries guarded by a single mutex. Every operation, including
//! the expired-entry purges triggered by reads, runs inside that critical
//! section, so eviction never interleaves with a concurrent get or set.
//!
//! Capacity is enforced before insertion: expired entries are purged first,
//! then least-recently-accessed entries are evicted until the incoming value
//! fits. TTL is checked lazily on every read path; [`MemoryBackend::purge_expired`]
//! exists for periodic hygiene only.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::types::{BackendStats, KeyTtl};
use crate::StorageResult;

/// Default capacity (100 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: usize = 100 * 1024 * 1024;

const HEALTH_CHECK_PREFIX: &str = "__health_check__";
const HEALTH_CHECK_VALUE: &[u8] = b"health_check_test";
const HEALTH_CHECK_TTL: Duration = Duration::from_secs(60);

/// Construction parameters for [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBackendConfig {
    /// Upper bound on the sum of stored value sizes
    pub max_size_bytes: usize,
    /// TTL applied when `set` is called without one; `None` never expires
    pub default_ttl: Option<Duration>,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            default_ttl: None,
        }
    }
}

impl MemoryBackendConfig {
    pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_max_size_mb(self, max_size_mb: usize) -> Self {
        self.with_max_size_bytes(max_size_mb.saturating_mul(1024 * 1024))
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    created_at: Instant,
    expires_at: Option<Instant>,
    last_access: Instant,
    /// Logical access clock; strictly increasing, breaks `last_access` ties
    access_seq: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Tables {
    entries: BTreeMap<String, Entry>,
    total_size_bytes: usize,
    clock: u64,
    access_count: u64,
    eviction_count: u64,
    expired_count: u64,
}

impl Tables {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.total_size_bytes -= entry.value.len();
        Some(entry)
    }

    /// Drop `key` if it has expired. Returns `true` when it was dropped.
    fn purge_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.remove(key);
            self.expired_count += 1;
            debug!(key = %key, "expired entry purged");
        }
        expired
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.expired_count += expired.len() as u64;
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired entries purged");
        }
        expired.len()
    }

    /// Make room for `required` bytes under `key`, evicting least recently
    /// accessed entries other than `key` itself.
    fn ensure_space(&mut self, key: &str, required: usize, max_size_bytes: usize, now: Instant) {
        self.purge_expired(now);

        let replaced = self.entries.get(key).map_or(0, |e| e.value.len());
        let mut usage = self.total_size_bytes - replaced;
        if usage + required <= max_size_bytes {
            return;
        }

        let mut candidates: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, e)| (e.access_seq, k.clone()))
            .collect();
        candidates.sort_unstable();

        for (_, victim) in candidates {
            if usage + required <= max_size_bytes {
                break;
            }
            if let Some(entry) = self.remove(&victim) {
                usage -= entry.value.len();
                self.eviction_count += 1;
                debug!(key = %victim, size_bytes = entry.value.len(), "entry evicted");
            }
        }
    }
}

/// In-memory [`StorageBackend`] with TTL expiry and LRU eviction.
#[derive(Debug)]
pub struct MemoryBackend {
    config: MemoryBackendConfig,
    tables: Mutex<Tables>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryBackendConfig::default())
    }
}

impl MemoryBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        info!(
            max_size_bytes = config.max_size_bytes,
            default_ttl_secs = config.default_ttl.map(|t| t.as_secs()),
            "memory storage backend initialized"
        );
        Self {
            config,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn config(&self) -> &MemoryBackendConfig {
        &self.config
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::poisoned("memory backend"))
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.filter(|t| !t.is_zero()).or(self.config.default_ttl)
    }

    /// Expiry instant for an entry written at `now`. A lifetime too long to
    /// represent never expires.
    fn expiry(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
        ttl.and_then(|t| now.checked_add(t))
    }

    fn stats_of(&self, tables: &Tables) -> BackendStats {
        let max = self.config.max_size_bytes;
        BackendStats {
            total_keys: tables.entries.len(),
            total_size_bytes: tables.total_size_bytes,
            max_size_bytes: max,
            usage_percentage: if max == 0 {
                0.0
            } else {
                tables.total_size_bytes as f64 / max as f64 * 100.0
            },
            access_count: tables.access_count,
            eviction_count: tables.eviction_count,
            expired_count: tables.expired_count,
        }
    }

    /// Snapshot every live entry, least recently accessed first.
    pub fn export_data(&self) -> StorageResult<BackendSnapshot> {
        let now = Instant::now();
        let tables = self.lock()?;

        let mut live: Vec<(&String, &Entry)> = tables
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .collect();
        live.sort_by_key(|(_, e)| e.access_seq);

        let entries = live
            .into_iter()
            .map(|(key, e)| SnapshotEntry {
                key: key.clone(),
                value_hex: hex::encode(&e.value),
                ttl_remaining_ms: e
                    .expires_at
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            })
            .collect();

        Ok(BackendSnapshot {
            entries,
            stats: self.stats_of(&tables),
        })
    }

    /// Replace the whole table with `snapshot`.
    ///
    /// Fails without touching existing data if an entry is not valid hex or
    /// the snapshot does not fit within capacity.
    pub fn import_data(&self, snapshot: BackendSnapshot) -> StorageResult<usize> {
        let mut decoded = Vec::with_capacity(snapshot.entries.len());
        let mut total = 0usize;
        for entry in snapshot.entries {
            let value = hex::decode(&entry.value_hex).map_err(|e| {
                StorageError::corruption(entry.key.clone(), format!("invalid hex value: {e}"))
            })?;
            total += value.len();
            decoded.push((entry.key, value, entry.ttl_remaining_ms));
        }
        if total > self.config.max_size_bytes {
            return Err(StorageError::CapacityExceeded {
                key: "<snapshot>".to_string(),
                size_bytes: total,
                max_size_bytes: self.config.max_size_bytes,
            });
        }

        let now = Instant::now();
        let mut tables = self.lock()?;
        tables.entries.clear();
        tables.total_size_bytes = 0;

        let count = decoded.len();
        for (key, value, ttl_ms) in decoded {
            let seq = tables.tick();
            tables.total_size_bytes += value.len();
            let previous = tables.entries.insert(
                key,
                Entry {
                    value,
                    created_at: now,
                    expires_at: Self::expiry(now, ttl_ms.map(Duration::from_millis)),
                    last_access: now,
                    access_seq: seq,
                },
            );
            if let Some(previous) = previous {
                tables.total_size_bytes -= previous.value.len();
            }
        }

        info!(entries = count, "memory backend snapshot imported");
        Ok(count)
    }

    /// Age of the entry under `key`, if it is live.
    pub fn entry_age(&self, key: &str) -> StorageResult<Option<Duration>> {
        let now = Instant::now();
        let tables = self.lock()?;
        Ok(tables
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| now.saturating_duration_since(e.created_at)))
    }

    /// Time since the entry under `key` was last read or written.
    pub fn idle_time(&self, key: &str) -> StorageResult<Option<Duration>> {
        let now = Instant::now();
        let tables = self.lock()?;
        Ok(tables
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| now.saturating_duration_since(e.last_access)))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        if tables.purge_if_expired(key, now) || !tables.entries.contains_key(key) {
            return Ok(None);
        }

        let seq = tables.tick();
        tables.access_count += 1;
        Ok(tables.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.access_seq = seq;
            entry.value.clone()
        }))
    }

    async fn peek(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        if tables.purge_if_expired(key, now) {
            return Ok(None);
        }
        Ok(tables.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        if tables.purge_if_expired(key, now) {
            return Ok(KeyTtl::Missing);
        }
        Ok(tables
            .entries
            .get(key)
            .map_or(KeyTtl::Missing, |entry| match entry.expires_at {
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(now)),
                None => KeyTtl::Persistent,
            }))
    }

    fn max_value_size(&self) -> Option<usize> {
        Some(self.config.max_size_bytes)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        let size = value.len();
        let max = self.config.max_size_bytes;
        if size > max {
            return Err(StorageError::CapacityExceeded {
                key: key.to_string(),
                size_bytes: size,
                max_size_bytes: max,
            });
        }

        let now = Instant::now();
        let expires_at = Self::expiry(now, self.effective_ttl(ttl));

        let mut tables = self.lock()?;
        tables.ensure_space(key, size, max, now);

        let seq = tables.tick();
        let previous = tables.entries.insert(
            key.to_string(),
            Entry {
                value,
                created_at: now,
                expires_at,
                last_access: now,
                access_seq: seq,
            },
        );
        if let Some(previous) = previous {
            tables.total_size_bytes -= previous.value.len();
        }
        tables.total_size_bytes += size;

        debug!(key = %key, size_bytes = size, "value stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        if tables.purge_if_expired(key, now) {
            return Ok(false);
        }
        Ok(tables.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        if tables.purge_if_expired(key, now) {
            return Ok(false);
        }
        Ok(tables.entries.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        tables.purge_expired(now);
        Ok(tables
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        let key = format!("{HEALTH_CHECK_PREFIX}:{}", uuid::Uuid::new_v4());
        let round_trip = async {
            self.set(&key, HEALTH_CHECK_VALUE.to_vec(), Some(HEALTH_CHECK_TTL))
                .await?;
            let read = self.get(&key).await?;
            self.delete(&key).await?;
            Ok::<_, StorageError>(read.as_deref() == Some(HEALTH_CHECK_VALUE))
        };
        match round_trip.await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(error = %e, "memory backend health check failed");
                false
            }
        }
    }

    async fn cleanup(&self) -> StorageResult<()> {
        let mut tables = self.lock()?;
        tables.entries.clear();
        tables.total_size_bytes = 0;
        info!("memory storage backend cleaned up");
        Ok(())
    }

    async fn stats(&self) -> StorageResult<BackendStats> {
        let tables = self.lock()?;
        Ok(self.stats_of(&tables))
    }

    async fn purge_expired(&self) -> StorageResult<usize> {
        let now = Instant::now();
        let mut tables = self.lock()?;
        Ok(tables.purge_expired(now))
    }
}

/// Serializable copy of a [`MemoryBackend`]'s live entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSnapshot {
    pub entries: Vec<SnapshotEntry>,
    pub stats: BackendStats,
}

/// One exported entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value_hex: String,
    /// Remaining lifetime at export time; `None` never expires
    pub ttl_remaining_ms: Option<u64>,
}
