//! Operation metrics for the state store manager.
//!
//! Totals and cache counters are plain atomics incremented at the call site.
//! Per-operation call counts, error counts and the most recent duration
//! samples sit behind one mutex. Call [`StoreMetrics::flush`] to emit the
//! current values as a single `tracing::info!` event, or
//! [`StoreMetrics::snapshot`] for a serializable report.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Duration samples retained per operation.
pub const MAX_DURATION_SAMPLES: usize = 1024;

#[derive(Debug, Default)]
struct OperationStats {
    count: u64,
    errors: u64,
    durations: VecDeque<Duration>,
}

impl OperationStats {
    fn record(&mut self, duration: Duration, success: bool) {
        self.count += 1;
        if !success {
            self.errors += 1;
        }
        if self.durations.len() == MAX_DURATION_SAMPLES {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    fn report(&self) -> OperationReport {
        let millis = |d: &Duration| d.as_secs_f64() * 1000.0;
        let samples = self.durations.len();
        let (avg, min, max) = if samples == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let total: f64 = self.durations.iter().map(millis).sum();
            let min = self.durations.iter().map(millis).fold(f64::INFINITY, f64::min);
            let max = self.durations.iter().map(millis).fold(0.0, f64::max);
            (total / samples as f64, min, max)
        };
        OperationReport {
            count: self.count,
            errors: self.errors,
            avg_duration_ms: avg,
            min_duration_ms: min,
            max_duration_ms: max,
        }
    }
}

/// Counters for one manager instance.
#[derive(Debug)]
pub struct StoreMetrics {
    started: Instant,
    operations: Mutex<BTreeMap<&'static str, OperationStats>>,
    states_stored: AtomicU64,
    states_loaded: AtomicU64,
    states_deleted: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            operations: Mutex::new(BTreeMap::new()),
            states_stored: AtomicU64::new(0),
            states_loaded: AtomicU64::new(0),
            states_deleted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    fn operations(&self) -> MutexGuard<'_, BTreeMap<&'static str, OperationStats>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one call of `operation`.
    pub fn record_operation(&self, operation: &'static str, duration: Duration, success: bool) {
        self.operations()
            .entry(operation)
            .or_default()
            .record(duration, success);
        tracing::trace!(metric = "operation", operation, success, "operation recorded");
    }

    pub fn add_stored(&self, n: u64) {
        self.states_stored.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_loaded(&self, n: u64) {
        self.states_loaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_deleted(&self, n: u64) {
        self.states_deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_misses", "counter incremented");
    }

    pub fn states_stored(&self) -> u64 {
        self.states_stored.load(Ordering::Relaxed)
    }

    pub fn states_loaded(&self) -> u64 {
        self.states_loaded.load(Ordering::Relaxed)
    }

    pub fn states_deleted(&self) -> u64 {
        self.states_deleted.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricsReport {
        let operations: BTreeMap<String, OperationReport> = self
            .operations()
            .iter()
            .map(|(name, stats)| (name.to_string(), stats.report()))
            .collect();
        let total_operations = operations.values().map(|r| r.count).sum();
        let total_errors = operations.values().map(|r| r.errors).sum();

        let hits = self.cache_hits();
        let misses = self.cache_misses();
        let lookups = hits + misses;

        MetricsReport {
            uptime_seconds: self.uptime().as_secs_f64(),
            total_operations,
            total_errors,
            operations,
            states_stored: self.states_stored(),
            states_loaded: self.states_loaded(),
            states_deleted: self.states_deleted(),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate_percent: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64 * 100.0
            },
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (shutdown, a periodic tick) rather
    /// than on every increment.
    pub fn flush(&self) {
        let report = self.snapshot();
        tracing::info!(
            metric = "flush",
            uptime_seconds = report.uptime_seconds,
            total_operations = report.total_operations,
            total_errors = report.total_errors,
            states_stored = report.states_stored,
            states_loaded = report.states_loaded,
            states_deleted = report.states_deleted,
            cache_hits = report.cache_hits,
            cache_misses = report.cache_misses,
            cache_hit_rate_percent = report.cache_hit_rate_percent,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.operations().clear();
        self.states_stored.store(0, Ordering::Relaxed);
        self.states_loaded.store(0, Ordering::Relaxed);
        self.states_deleted.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}

/// Aggregates for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub count: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Serializable point-in-time view of [`StoreMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub uptime_seconds: f64,
    pub total_operations: u64,
    pub total_errors: u64,
    pub operations: BTreeMap<String, OperationReport>,
    pub states_stored: u64,
    pub states_loaded: u64,
    pub states_deleted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate_percent: f64,
}
