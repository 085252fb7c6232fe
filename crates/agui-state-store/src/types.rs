//! Data model for persisted agent state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level agent state: a JSON object of named fields.
pub type StateData = Map<String, Value>;

/// Free-form string tags attached to a saved state.
pub type Tags = BTreeMap<String, String>;

/// Metadata describing one stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1, increments by exactly 1 per successful write
    pub version: u64,
    /// Length of the canonical serialization of `data`
    pub size_bytes: u64,
    /// SHA-256 hex of the canonical serialization of `data`
    pub checksum: String,
    #[serde(default)]
    pub tags: Tags,
}

/// State data together with its key and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub state_key: String,
    pub data: StateData,
    pub metadata: StateMetadata,
}

/// The unit persisted under one key: `{"data": ..., "metadata": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: StateData,
    pub metadata: StateMetadata,
}

impl Envelope {
    pub fn into_stored(self, state_key: String) -> StoredState {
        StoredState {
            state_key,
            data: self.data,
            metadata: self.metadata,
        }
    }
}

/// Result of a save: the stored state plus any agents evicted from the
/// thread to keep it under the per-thread limit.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub state: StoredState,
    pub evicted: Vec<String>,
}

/// Remaining lifetime of a key, as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// No live entry under the key
    Missing,
    /// Live and never expires
    Persistent,
    /// Live for at most this long
    Expires(Duration),
}

/// Counters reported by a byte storage backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub total_keys: usize,
    pub total_size_bytes: usize,
    pub max_size_bytes: usize,
    pub usage_percentage: f64,
    pub access_count: u64,
    pub eviction_count: u64,
    pub expired_count: u64,
}

/// Aggregate statistics for an agent state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub backend: BackendStats,
    pub unique_threads: usize,
    pub unique_agents: usize,
    pub max_states_per_thread: usize,
}
