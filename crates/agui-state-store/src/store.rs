//! Agent state store built on a [`StorageBackend`].
//!
//! Each (thread, agent) pair owns one envelope holding its data and metadata.
//! Saves are versioned and checksummed, optionally merged into the previous
//! data, and bounded by a per-thread agent count.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::backend::StorageBackend;
use crate::codec;
use crate::error::StorageError;
use crate::keys::{self, KeySpace, DEFAULT_NAMESPACE};
use crate::locks::ThreadLocks;
use crate::memory::{BackendSnapshot, MemoryBackend, MemoryBackendConfig};
use crate::types::{
    Envelope, KeyTtl, SaveOutcome, StateData, StateMetadata, StoreStats, StoredState, Tags,
};
use crate::StorageResult;

/// Default bound on distinct agents per thread.
pub const DEFAULT_MAX_STATES_PER_THREAD: usize = 50;

/// Store-level options independent of the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStoreOptions {
    pub namespace: String,
    pub max_states_per_thread: usize,
}

impl Default for StateStoreOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_states_per_thread: DEFAULT_MAX_STATES_PER_THREAD,
        }
    }
}

impl StateStoreOptions {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_states_per_thread(mut self, max: usize) -> Self {
        self.max_states_per_thread = max;
        self
    }
}

/// Versioned, checksummed agent state on top of a byte store.
pub struct AgentStateStore {
    backend: Arc<dyn StorageBackend>,
    memory: Option<Arc<MemoryBackend>>,
    keys: KeySpace,
    max_states_per_thread: usize,
    locks: ThreadLocks,
}

impl std::fmt::Debug for AgentStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStateStore")
            .field("backend", &self.backend.name())
            .field("namespace", &self.keys.namespace())
            .field("max_states_per_thread", &self.max_states_per_thread)
            .finish()
    }
}

impl AgentStateStore {
    /// Build a store over an arbitrary backend.
    pub fn new(backend: Arc<dyn StorageBackend>, options: StateStoreOptions) -> Self {
        Self {
            backend,
            memory: None,
            keys: KeySpace::new(options.namespace),
            max_states_per_thread: options.max_states_per_thread.max(1),
            locks: ThreadLocks::default(),
        }
    }

    /// Build a store over a fresh [`MemoryBackend`]; enables export/import.
    pub fn in_memory(config: MemoryBackendConfig, options: StateStoreOptions) -> Self {
        Self::with_memory_backend(Arc::new(MemoryBackend::new(config)), options)
    }

    /// Build a store over an existing [`MemoryBackend`]; enables export/import.
    pub fn with_memory_backend(memory: Arc<MemoryBackend>, options: StateStoreOptions) -> Self {
        let backend: Arc<dyn StorageBackend> = memory.clone();
        let mut store = Self::new(backend, options);
        store.memory = Some(memory);
        store
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    pub fn max_states_per_thread(&self) -> usize {
        self.max_states_per_thread
    }

    /// `<ns>:state:<thread_id>:<agent_name>`
    pub fn generate_state_key(&self, thread_id: &str, agent_name: &str) -> String {
        self.keys.state_key(thread_id, agent_name)
    }

    /// `<ns>:thread:<thread_id>`
    pub fn generate_thread_key(&self, thread_id: &str) -> String {
        self.keys.thread_key(thread_id)
    }

    async fn read_envelope(&self, state_key: &str) -> StorageResult<Option<Envelope>> {
        match self.backend.get(state_key).await? {
            Some(bytes) => codec::decode_envelope(state_key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// [`read_envelope`](Self::read_envelope) without refreshing recency.
    async fn peek_envelope(&self, state_key: &str) -> StorageResult<Option<Envelope>> {
        match self.backend.peek(state_key).await? {
            Some(bytes) => codec::decode_envelope(state_key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Save state for `(thread_id, agent_name)`.
    ///
    /// With `merge = true` the incoming top-level fields overwrite the stored
    /// ones of the same name and every other stored field is kept; nested
    /// objects are replaced whole, not merged. With `merge = false` the
    /// incoming data replaces the stored data entirely. Tags always replace.
    ///
    /// The whole sequence runs under the thread's write lock. Every check that
    /// can reject the save runs before other agents are evicted from the
    /// thread, so a failed save leaves the thread as it was.
    pub async fn save_agent_state(
        &self,
        thread_id: &str,
        agent_name: &str,
        data: StateData,
        merge: bool,
        tags: Option<Tags>,
    ) -> StorageResult<StoredState> {
        self.save_and_report_evictions(thread_id, agent_name, data, merge, tags)
            .await
            .map(|outcome| outcome.state)
    }

    /// Same as [`save_agent_state`](Self::save_agent_state), also naming the
    /// agents evicted from the thread to make room.
    #[instrument(skip(self, data, tags))]
    pub async fn save_and_report_evictions(
        &self,
        thread_id: &str,
        agent_name: &str,
        data: StateData,
        merge: bool,
        tags: Option<Tags>,
    ) -> StorageResult<SaveOutcome> {
        keys::validate_address(thread_id, agent_name)?;
        let state_key = self.keys.state_key(thread_id, agent_name);

        let _guard = self.locks.acquire(thread_id).await?;

        let previous = match self.read_envelope(&state_key).await {
            Ok(previous) => previous,
            Err(e @ StorageError::StateCorruption { .. }) if !merge => {
                warn!(state_key = %state_key, error = %e, "replacing corrupted state");
                None
            }
            Err(e) => return Err(e),
        };

        let final_data = match (&previous, merge) {
            (Some(previous), true) => {
                let mut merged = previous.data.clone();
                merged.extend(data);
                merged
            }
            _ => data,
        };

        let canonical = codec::canonical_state(&final_data)?;
        let now = Utc::now();
        let metadata = StateMetadata {
            created_at: previous
                .as_ref()
                .map_or(now, |p| p.metadata.created_at),
            updated_at: now,
            version: previous.as_ref().map_or(1, |p| p.metadata.version + 1),
            size_bytes: canonical.len() as u64,
            checksum: codec::checksum(&canonical),
            tags: tags.unwrap_or_default(),
        };

        let envelope = Envelope {
            data: final_data,
            metadata,
        };
        let blob = codec::encode_envelope(&state_key, &envelope)?;
        if let Some(max) = self.backend.max_value_size() {
            if blob.len() > max {
                return Err(StorageError::CapacityExceeded {
                    key: state_key,
                    size_bytes: blob.len(),
                    max_size_bytes: max,
                });
            }
        }

        let evicted = self.enforce_thread_limit(thread_id, agent_name).await?;
        self.backend.set(&state_key, blob, None).await?;

        info!(
            thread_id = %thread_id,
            agent_name = %agent_name,
            size_bytes = envelope.metadata.size_bytes,
            version = envelope.metadata.version,
            "agent state saved"
        );
        Ok(SaveOutcome {
            state: envelope.into_stored(state_key),
            evicted,
        })
    }

    /// Load state for `(thread_id, agent_name)`; `None` if absent or expired.
    pub async fn load_agent_state(
        &self,
        thread_id: &str,
        agent_name: &str,
    ) -> StorageResult<Option<StoredState>> {
        keys::validate_address(thread_id, agent_name)?;
        let state_key = self.keys.state_key(thread_id, agent_name);

        let loaded = self.read_envelope(&state_key).await?;
        if let Some(envelope) = &loaded {
            debug!(
                thread_id = %thread_id,
                agent_name = %agent_name,
                size_bytes = envelope.metadata.size_bytes,
                version = envelope.metadata.version,
                "agent state loaded"
            );
        }
        Ok(loaded.map(|e| e.into_stored(state_key)))
    }

    /// Delete state for `(thread_id, agent_name)`. Returns `true` if it existed.
    pub async fn delete_agent_state(&self, thread_id: &str, agent_name: &str) -> StorageResult<bool> {
        keys::validate_address(thread_id, agent_name)?;
        let _guard = self.locks.acquire(thread_id).await?;
        self.delete_unlocked(thread_id, agent_name).await
    }

    async fn delete_unlocked(&self, thread_id: &str, agent_name: &str) -> StorageResult<bool> {
        let deleted = self
            .backend
            .delete(&self.keys.state_key(thread_id, agent_name))
            .await?;
        if deleted {
            info!(thread_id = %thread_id, agent_name = %agent_name, "agent state deleted");
        }
        Ok(deleted)
    }

    /// Agents with live state in `thread_id`, sorted.
    pub async fn list_thread_agents(&self, thread_id: &str) -> StorageResult<Vec<String>> {
        keys::validate_thread_id(thread_id)?;
        let keys = self
            .backend
            .list_keys(&self.keys.thread_prefix(thread_id))
            .await?;

        let mut agents: Vec<String> = keys
            .iter()
            .filter_map(|k| self.keys.parse_state_key(k))
            .filter(|(t, _)| *t == thread_id)
            .map(|(_, agent)| agent.to_string())
            .collect();
        agents.sort();
        Ok(agents)
    }

    /// Threads in which `agent_name` has live state, sorted.
    pub async fn list_agent_threads(&self, agent_name: &str) -> StorageResult<Vec<String>> {
        keys::validate_agent_name(agent_name)?;
        let keys = self.backend.list_keys(&self.keys.state_prefix()).await?;

        let threads: BTreeSet<String> = keys
            .iter()
            .filter_map(|k| self.keys.parse_state_key(k))
            .filter(|(_, a)| *a == agent_name)
            .map(|(thread, _)| thread.to_string())
            .collect();
        Ok(threads.into_iter().collect())
    }

    /// Delete every agent state in `thread_id`, returning how many were removed.
    pub async fn clear_thread_state(&self, thread_id: &str) -> StorageResult<usize> {
        keys::validate_thread_id(thread_id)?;
        let _guard = self.locks.acquire(thread_id).await?;

        let mut deleted = 0;
        for agent_name in self.list_thread_agents(thread_id).await? {
            if self.delete_unlocked(thread_id, &agent_name).await? {
                deleted += 1;
            }
        }
        info!(thread_id = %thread_id, deleted, "thread state cleared");
        Ok(deleted)
    }

    /// Metadata for `(thread_id, agent_name)` without returning the data.
    ///
    /// The envelope is still read and verified in full: data and metadata
    /// share one stored blob.
    pub async fn get_state_metadata(
        &self,
        thread_id: &str,
        agent_name: &str,
    ) -> StorageResult<Option<StateMetadata>> {
        keys::validate_address(thread_id, agent_name)?;
        let state_key = self.keys.state_key(thread_id, agent_name);
        Ok(self.read_envelope(&state_key).await?.map(|e| e.metadata))
    }

    /// Remaining lifetime of the state for `(thread_id, agent_name)`.
    pub async fn state_ttl(&self, thread_id: &str, agent_name: &str) -> StorageResult<KeyTtl> {
        keys::validate_address(thread_id, agent_name)?;
        self.backend
            .ttl(&self.keys.state_key(thread_id, agent_name))
            .await
    }

    /// Evict the least recently updated agents of `thread_id` (other than
    /// `incoming`) until one more agent fits under the limit.
    ///
    /// Entries that fail to decode sort before every valid entry. Siblings
    /// are peeked so the scan does not reorder backend eviction.
    async fn enforce_thread_limit(
        &self,
        thread_id: &str,
        incoming: &str,
    ) -> StorageResult<Vec<String>> {
        let others: Vec<String> = self
            .list_thread_agents(thread_id)
            .await?
            .into_iter()
            .filter(|a| a != incoming)
            .collect();
        if others.len() < self.max_states_per_thread {
            return Ok(Vec::new());
        }
        let to_remove = others.len() - self.max_states_per_thread + 1;

        let mut by_age: Vec<(DateTime<Utc>, String)> = Vec::with_capacity(others.len());
        for agent_name in others {
            let state_key = self.keys.state_key(thread_id, &agent_name);
            match self.peek_envelope(&state_key).await {
                Ok(Some(envelope)) => by_age.push((envelope.metadata.updated_at, agent_name)),
                Ok(None) => {}
                Err(StorageError::StateCorruption { reason, .. }) => {
                    warn!(state_key = %state_key, reason = %reason, "corrupted state queued for eviction");
                    by_age.push((DateTime::<Utc>::MIN_UTC, agent_name));
                }
                Err(e) => return Err(e),
            }
        }
        by_age.sort();

        let mut evicted = Vec::with_capacity(to_remove);
        for (_, agent_name) in by_age.into_iter().take(to_remove) {
            self.delete_unlocked(thread_id, &agent_name).await?;
            warn!(
                thread_id = %thread_id,
                agent_name = %agent_name,
                limit = self.max_states_per_thread,
                "evicted agent state to respect thread limit"
            );
            evicted.push(agent_name);
        }
        Ok(evicted)
    }

    /// Backend counters plus distinct thread and agent counts.
    pub async fn get_stats(&self) -> StorageResult<StoreStats> {
        let backend = self.backend.stats().await?;
        let keys = self.backend.list_keys(&self.keys.state_prefix()).await?;

        let mut threads = BTreeSet::new();
        let mut agents = BTreeSet::new();
        for (thread_id, agent_name) in keys.iter().filter_map(|k| self.keys.parse_state_key(k)) {
            threads.insert(thread_id);
            agents.insert(agent_name);
        }

        Ok(StoreStats {
            backend,
            unique_threads: threads.len(),
            unique_agents: agents.len(),
            max_states_per_thread: self.max_states_per_thread,
        })
    }

    fn memory_backend(&self) -> StorageResult<&Arc<MemoryBackend>> {
        self.memory.as_ref().ok_or_else(|| StorageError::NotImplemented {
            backend: format!("{} (export/import)", self.backend.name()),
        })
    }

    /// Snapshot every live entry. Only available over a memory backend.
    pub fn export_states(&self) -> StorageResult<BackendSnapshot> {
        self.memory_backend()?.export_data()
    }

    /// Replace all entries with `snapshot`. Only available over a memory backend.
    pub fn import_states(&self, snapshot: BackendSnapshot) -> StorageResult<usize> {
        self.memory_backend()?.import_data(snapshot)
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    pub async fn cleanup(&self) -> StorageResult<()> {
        self.backend.cleanup().await
    }
}
