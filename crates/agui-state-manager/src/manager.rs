//! The managed state store.
//!
//! [`StateStoreManager::open`] validates the configuration, builds the store
//! through a [`BackendFactory`], runs one health check and starts the
//! background tasks. The returned handle is ready for use; there is no
//! separate initialisation step. [`StateStoreManager::shutdown`] stops the
//! tasks, releases the backend and moves the manager to
//! [`Lifecycle::Stopped`], after which every state operation fails with
//! `BackendUnavailable`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agui_state_store::{
    keys, AgentStateStore, BackendSnapshot, KeyTtl, StateData, StateMetadata, StorageError,
    StorageResult, StoreStats, StoredState, Tags,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, Instrument};

use crate::cache::MetadataCache;
use crate::config::{ConfigSummary, StoreConfig};
use crate::factory::BackendFactory;
use crate::metrics::{MetricsReport, StoreMetrics};
use crate::obs;
use crate::tasks::Supervisor;
use crate::validator::StateValidator;

/// Whether a manager still accepts state operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Ready,
    Stopped,
}

/// One (thread, agent) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateAddress {
    pub thread_id: String,
    pub agent_name: String,
}

impl StateAddress {
    pub fn new(thread_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            agent_name: agent_name.into(),
        }
    }
}

/// One item of [`StateStoreManager::bulk_save_states`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSaveItem {
    pub thread_id: String,
    pub agent_name: String,
    pub data: StateData,
    #[serde(default = "default_merge")]
    pub merge: bool,
    #[serde(default)]
    pub tags: Option<Tags>,
}

fn default_merge() -> bool {
    true
}

impl BulkSaveItem {
    pub fn new(thread_id: impl Into<String>, agent_name: impl Into<String>, data: StateData) -> Self {
        Self {
            thread_id: thread_id.into(),
            agent_name: agent_name.into(),
            data,
            merge: true,
            tags: None,
        }
    }

    pub fn replace(mut self) -> Self {
        self.merge = false;
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Metrics report plus manager status, as returned by
/// [`StateStoreManager::get_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerMetrics {
    #[serde(flatten)]
    pub report: MetricsReport,
    pub lifecycle: Lifecycle,
    pub cache_size: usize,
    pub cache_ttl_seconds: u64,
    pub is_healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_backup: Option<DateTime<Utc>>,
    pub config: ConfigSummary,
}

#[derive(Debug, Default)]
struct HealthState {
    is_healthy: bool,
    last_health_check: Option<DateTime<Utc>>,
    last_backup: Option<DateTime<Utc>>,
    latest_backup: Option<BackendSnapshot>,
}

#[derive(Debug)]
struct ManagerInner {
    config: StoreConfig,
    store: AgentStateStore,
    validator: StateValidator,
    cache: MetadataCache,
    metrics: Option<StoreMetrics>,
    health: Mutex<HealthState>,
    stopped: AtomicBool,
    supervisor: Supervisor,
}

/// Cloneable handle to a running state store.
#[derive(Debug, Clone)]
pub struct StateStoreManager {
    inner: Arc<ManagerInner>,
}

impl StateStoreManager {
    /// Open a manager with the default factory (memory only) and no schemas.
    pub async fn open(config: StoreConfig) -> StorageResult<Self> {
        Self::open_with(config, &BackendFactory::default(), StateValidator::new()).await
    }

    /// Open a manager with an explicit factory and validator.
    pub async fn open_with(
        config: StoreConfig,
        factory: &BackendFactory,
        validator: StateValidator,
    ) -> StorageResult<Self> {
        config.validate()?;
        let store = factory.create(&config)?;

        let backend = store.backend().name();
        if !store.health_check().await {
            return Err(StorageError::BackendUnavailable {
                backend: backend.to_string(),
                reason: "initial health check failed".to_string(),
            });
        }

        let inner = Arc::new(ManagerInner {
            cache: MetadataCache::new(config.metadata_cache_ttl()),
            metrics: config.metrics_enabled.then(StoreMetrics::new),
            health: Mutex::new(HealthState {
                is_healthy: true,
                last_health_check: Some(Utc::now()),
                ..HealthState::default()
            }),
            stopped: AtomicBool::new(false),
            supervisor: Supervisor::new(),
            validator,
            store,
            config,
        });
        inner.start_tasks();

        info!(
            backend = backend,
            namespace = %inner.config.namespace,
            metrics_enabled = inner.config.metrics_enabled,
            backup_enabled = inner.config.backup_enabled,
            "state store manager ready"
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Schema registry consulted on every save.
    pub fn validator(&self) -> &StateValidator {
        &self.inner.validator
    }

    /// The underlying store, bypassing validation, caching and metrics.
    pub fn store(&self) -> &AgentStateStore {
        &self.inner.store
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.inner.stopped.load(Ordering::Acquire) {
            Lifecycle::Stopped
        } else {
            Lifecycle::Ready
        }
    }

    /// Number of background tasks still running.
    pub fn background_tasks(&self) -> usize {
        self.inner.supervisor.running()
    }

    /// Save state for `(thread_id, agent_name)` after schema validation.
    pub async fn save_agent_state(
        &self,
        thread_id: &str,
        agent_name: &str,
        data: StateData,
        merge: bool,
        tags: Option<Tags>,
    ) -> StorageResult<StoredState> {
        let inner = &self.inner;
        inner
            .observe(
                "save_agent_state",
                inner.save(thread_id, agent_name, data, merge, tags),
            )
            .await
    }

    /// Load state for `(thread_id, agent_name)`; `None` if absent or expired.
    pub async fn load_agent_state(
        &self,
        thread_id: &str,
        agent_name: &str,
    ) -> StorageResult<Option<StoredState>> {
        let inner = &self.inner;
        inner
            .observe("load_agent_state", inner.load(thread_id, agent_name))
            .await
    }

    /// Delete state for `(thread_id, agent_name)`. Returns `true` if it existed.
    pub async fn delete_agent_state(&self, thread_id: &str, agent_name: &str) -> StorageResult<bool> {
        let inner = &self.inner;
        inner
            .observe("delete_agent_state", inner.delete(thread_id, agent_name))
            .await
    }

    pub async fn list_thread_agents(&self, thread_id: &str) -> StorageResult<Vec<String>> {
        let inner = &self.inner;
        inner
            .observe("list_thread_agents", inner.store.list_thread_agents(thread_id))
            .await
    }

    pub async fn list_agent_threads(&self, agent_name: &str) -> StorageResult<Vec<String>> {
        let inner = &self.inner;
        inner
            .observe("list_agent_threads", inner.store.list_agent_threads(agent_name))
            .await
    }

    /// Delete every agent state in `thread_id`, returning how many were removed.
    pub async fn clear_thread_state(&self, thread_id: &str) -> StorageResult<usize> {
        let inner = &self.inner;
        inner
            .observe("clear_thread_state", inner.clear(thread_id))
            .await
    }

    /// Metadata for `(thread_id, agent_name)`, served from the cache when fresh.
    pub async fn get_state_metadata(
        &self,
        thread_id: &str,
        agent_name: &str,
    ) -> StorageResult<Option<StateMetadata>> {
        let inner = &self.inner;
        inner
            .observe("get_state_metadata", inner.metadata(thread_id, agent_name))
            .await
    }

    /// Save each item in order. Stops at the first failure; items saved
    /// before it stay saved.
    pub async fn bulk_save_states(&self, items: Vec<BulkSaveItem>) -> StorageResult<Vec<StoredState>> {
        self.inner
            .observe("bulk_save_states", self.save_each(items))
            .await
    }

    async fn save_each(&self, items: Vec<BulkSaveItem>) -> StorageResult<Vec<StoredState>> {
        let mut saved = Vec::with_capacity(items.len());
        for item in items {
            let state = self
                .save_agent_state(
                    &item.thread_id,
                    &item.agent_name,
                    item.data,
                    item.merge,
                    item.tags,
                )
                .await?;
            saved.push(state);
        }
        Ok(saved)
    }

    /// Load each address in order, one result per address. Stops at the
    /// first failure.
    pub async fn bulk_load_states(
        &self,
        addresses: &[StateAddress],
    ) -> StorageResult<Vec<Option<StoredState>>> {
        self.inner
            .observe("bulk_load_states", self.load_each(addresses))
            .await
    }

    async fn load_each(&self, addresses: &[StateAddress]) -> StorageResult<Vec<Option<StoredState>>> {
        let mut loaded = Vec::with_capacity(addresses.len());
        for address in addresses {
            loaded.push(
                self.load_agent_state(&address.thread_id, &address.agent_name)
                    .await?,
            );
        }
        Ok(loaded)
    }

    /// Round-trip self-test against the backend. Always `false` once stopped.
    pub async fn health_check(&self) -> bool {
        if self.inner.ensure_ready().is_err() {
            return false;
        }
        self.inner.run_health_check().await
    }

    /// Store statistics: backend counters plus distinct threads and agents.
    pub async fn get_stats(&self) -> StorageResult<StoreStats> {
        let inner = &self.inner;
        inner.observe("get_stats", inner.store.get_stats()).await
    }

    /// Metrics and status, or `None` when metrics are disabled.
    pub fn get_metrics(&self) -> Option<ManagerMetrics> {
        let inner = &self.inner;
        let report = inner.metrics.as_ref()?.snapshot();
        let health = inner.health();
        Some(ManagerMetrics {
            report,
            lifecycle: self.lifecycle(),
            cache_size: inner.cache.len(),
            cache_ttl_seconds: inner.cache.ttl().as_secs(),
            is_healthy: health.is_healthy,
            last_health_check: health.last_health_check,
            last_backup: health.last_backup,
            config: inner.config.to_summary(),
        })
    }

    /// Snapshot every live entry of a memory-backed store.
    pub async fn export_states(&self) -> StorageResult<BackendSnapshot> {
        let inner = &self.inner;
        let export = async { inner.store.export_states() };
        inner.observe("export_states", export).await
    }

    /// Replace every entry of a memory-backed store with `snapshot`.
    pub async fn import_states(&self, snapshot: BackendSnapshot) -> StorageResult<usize> {
        let inner = &self.inner;
        inner
            .observe("import_states", inner.import(snapshot))
            .await
    }

    /// The snapshot taken by the most recent backup run, if any.
    pub fn latest_backup(&self) -> Option<BackendSnapshot> {
        self.inner.health().latest_backup.clone()
    }

    /// Stop background tasks, release the backend and clear the cache.
    ///
    /// Idempotent: calls after the first return `Ok(())` immediately.
    pub async fn shutdown(&self) -> StorageResult<()> {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("state store manager shutting down");

        inner.supervisor.shutdown(inner.config.shutdown_grace()).await;
        inner.cache.clear();
        inner.with_metrics(StoreMetrics::flush);
        inner.store.cleanup().await?;

        info!("state store manager stopped");
        Ok(())
    }
}

impl ManagerInner {
    fn health(&self) -> MutexGuard<'_, HealthState> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_metrics(&self, f: impl FnOnce(&StoreMetrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }

    fn ensure_ready(&self) -> StorageResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StorageError::BackendUnavailable {
                backend: self.store.backend().name().to_string(),
                reason: "state store manager has been shut down".to_string(),
            });
        }
        Ok(())
    }

    /// Run `operation` if the manager is ready, recording its duration and
    /// outcome.
    async fn observe<T, Fut>(&self, operation: &'static str, fut: Fut) -> StorageResult<T>
    where
        Fut: Future<Output = StorageResult<T>>,
    {
        let started = Instant::now();
        let result = match self.ensure_ready() {
            Ok(()) => fut.instrument(obs::operation_span(operation)).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        self.with_metrics(|m| m.record_operation(operation, elapsed, result.is_ok()));
        match &result {
            Ok(_) => debug!(
                operation,
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                "operation completed"
            ),
            Err(e) => obs::emit_operation_failed(operation, e),
        }
        result
    }

    async fn save(
        &self,
        thread_id: &str,
        agent_name: &str,
        data: StateData,
        merge: bool,
        tags: Option<Tags>,
    ) -> StorageResult<StoredState> {
        keys::validate_address(thread_id, agent_name)?;
        self.validator.validate_state(agent_name, &data)?;

        let outcome = self
            .store
            .save_and_report_evictions(thread_id, agent_name, data, merge, tags)
            .await?;
        for evicted in &outcome.evicted {
            self.cache.invalidate(thread_id, evicted);
            obs::emit_thread_eviction(thread_id, evicted, self.store.max_states_per_thread());
        }

        let state = outcome.state;
        self.cache_metadata(thread_id, agent_name, &state.metadata).await;
        self.with_metrics(|m| m.add_stored(1));
        obs::emit_state_saved(
            thread_id,
            agent_name,
            state.metadata.version,
            state.metadata.size_bytes,
        );
        Ok(state)
    }

    async fn load(&self, thread_id: &str, agent_name: &str) -> StorageResult<Option<StoredState>> {
        let loaded = self.store.load_agent_state(thread_id, agent_name).await?;
        match &loaded {
            Some(state) => {
                self.cache_metadata(thread_id, agent_name, &state.metadata).await;
                self.with_metrics(|m| m.add_loaded(1));
            }
            None => self.cache.invalidate(thread_id, agent_name),
        }
        Ok(loaded)
    }

    async fn delete(&self, thread_id: &str, agent_name: &str) -> StorageResult<bool> {
        let deleted = self.store.delete_agent_state(thread_id, agent_name).await?;
        self.cache.invalidate(thread_id, agent_name);
        if deleted {
            self.with_metrics(|m| m.add_deleted(1));
            obs::emit_state_deleted(thread_id, agent_name);
        }
        Ok(deleted)
    }

    async fn clear(&self, thread_id: &str) -> StorageResult<usize> {
        let deleted = self.store.clear_thread_state(thread_id).await?;
        self.cache.invalidate_thread(thread_id);
        self.with_metrics(|m| m.add_deleted(deleted as u64));
        Ok(deleted)
    }

    async fn metadata(
        &self,
        thread_id: &str,
        agent_name: &str,
    ) -> StorageResult<Option<StateMetadata>> {
        keys::validate_address(thread_id, agent_name)?;
        if let Some(metadata) = self.cache.get(thread_id, agent_name) {
            self.with_metrics(StoreMetrics::inc_cache_hit);
            return Ok(Some(metadata));
        }
        self.with_metrics(StoreMetrics::inc_cache_miss);

        let metadata = self.store.get_state_metadata(thread_id, agent_name).await?;
        if let Some(metadata) = &metadata {
            self.cache_metadata(thread_id, agent_name, metadata).await;
        }
        Ok(metadata)
    }

    /// Cache `metadata` for no longer than the stored state itself lives.
    async fn cache_metadata(&self, thread_id: &str, agent_name: &str, metadata: &StateMetadata) {
        match self.store.state_ttl(thread_id, agent_name).await {
            Ok(KeyTtl::Persistent) => self.cache.put(thread_id, agent_name, metadata.clone()),
            Ok(KeyTtl::Expires(remaining)) => {
                self.cache
                    .put_bounded(thread_id, agent_name, metadata.clone(), remaining)
            }
            Ok(KeyTtl::Missing) => self.cache.invalidate(thread_id, agent_name),
            Err(e) => {
                debug!(error = %e, "state ttl unavailable, metadata not cached");
                self.cache.invalidate(thread_id, agent_name);
            }
        }
    }

    async fn import(&self, snapshot: BackendSnapshot) -> StorageResult<usize> {
        let imported = self.store.import_states(snapshot)?;
        self.cache.clear();
        Ok(imported)
    }

    fn start_tasks(self: &Arc<Self>) {
        let target = Arc::downgrade(self);

        self.supervisor.spawn_periodic(
            "health_check",
            self.config.health_check_interval(),
            target.clone(),
            |inner: Arc<ManagerInner>| async move {
                inner.run_health_check().await;
                Ok(())
            },
        );

        self.supervisor.spawn_periodic(
            "expired_sweep",
            self.config.cleanup_interval(),
            target.clone(),
            |inner: Arc<ManagerInner>| async move { inner.run_sweep().await },
        );

        if self.config.backup_enabled {
            self.supervisor.spawn_periodic(
                "backup",
                self.config.backup_interval(),
                target,
                |inner: Arc<ManagerInner>| async move { inner.run_backup() },
            );
        }
    }

    async fn run_health_check(&self) -> bool {
        let healthy = self.store.health_check().await;
        {
            let mut health = self.health();
            health.is_healthy = healthy;
            health.last_health_check = Some(Utc::now());
        }
        obs::emit_health_checked(self.store.backend().name(), healthy);
        healthy
    }

    async fn run_sweep(&self) -> StorageResult<()> {
        let expired = self.store.backend().purge_expired().await?;
        let cached = self.cache.purge_expired();
        if expired > 0 || cached > 0 {
            debug!(expired, cached, "expired entries swept");
        }
        Ok(())
    }

    fn run_backup(&self) -> StorageResult<()> {
        let snapshot = match self.store.export_states() {
            Ok(snapshot) => snapshot,
            Err(StorageError::NotImplemented { backend }) => {
                debug!(backend = %backend, "backup skipped, backend cannot export");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let entries = snapshot.entries.len();
        {
            let mut health = self.health();
            health.last_backup = Some(Utc::now());
            health.latest_backup = Some(snapshot);
        }
        obs::emit_backup_completed(entries);
        Ok(())
    }
}
