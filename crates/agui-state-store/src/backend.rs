//! Byte storage backend trait.
//!
//! A backend stores opaque byte values under string keys, each with an
//! optional time-to-live. Expired entries are invisible to every read path
//! whether or not they have been physically removed yet.
//!
//! All methods are async so networked backends can suspend mid-operation;
//! the in-memory backend never does.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{BackendStats, KeyTtl};
use crate::StorageResult;

/// Key-value byte store with per-entry TTL.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend identifier used in logs and errors (e.g. `"memory"`).
    fn name(&self) -> &'static str;

    /// Fetch the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Like [`get`](Self::get), but leaves the entry's recency untouched so
    /// it does not influence which entries are evicted next.
    async fn peek(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.get(key).await
    }

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl>;

    /// Largest single value `set` can ever accept, if bounded.
    fn max_value_size(&self) -> Option<usize> {
        None
    }

    /// Store `value` under `key`. `ttl = None` applies the backend default,
    /// which may itself be "never expires".
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()>;

    /// Remove `key`. Returns `true` iff a live entry existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Whether a live entry exists for `key`. Expired entries are purged.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Live keys starting with `prefix`, in ascending order.
    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Round-trip self-test: write, read back and delete a sentinel key.
    async fn health_check(&self) -> bool;

    /// Release every entry and any resources held by the backend.
    async fn cleanup(&self) -> StorageResult<()>;

    /// Current counters.
    async fn stats(&self) -> StorageResult<BackendStats>;

    /// Physically remove expired entries, returning how many were dropped.
    ///
    /// Backends with native expiry can leave this as a no-op.
    async fn purge_expired(&self) -> StorageResult<usize> {
        Ok(0)
    }
}
