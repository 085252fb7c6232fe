//! agui-state-store: agent state persistence (Layer 0)
//!
//! This crate holds the storage half of the AG-UI runtime's agent state
//! subsystem: a byte-oriented backend interface with TTL, an in-memory
//! implementation with size-bounded eviction, and an agent state store that
//! persists versioned, checksummed envelopes per (thread, agent).
//!
//! ## Key Components
//!
//! - [`StorageBackend`]: raw get/set/delete/exists/list over byte values
//! - [`MemoryBackend`]: single-lock in-memory backend with LRU eviction
//! - [`AgentStateStore`]: key derivation, merge-on-write, per-thread limits
//! - [`StorageError`]: error taxonomy with stable machine-readable codes

pub mod backend;
pub mod codec;
mod error;
pub mod keys;
mod locks;
pub mod memory;
mod store;
mod types;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use keys::{validate_agent_name, validate_thread_id, KeySpace, DEFAULT_NAMESPACE};
pub use memory::{BackendSnapshot, MemoryBackend, MemoryBackendConfig, SnapshotEntry};
pub use store::{AgentStateStore, StateStoreOptions, DEFAULT_MAX_STATES_PER_THREAD};
pub use types::{
    BackendStats, Envelope, KeyTtl, SaveOutcome, StateData, StateMetadata, StoreStats, StoredState,
    Tags,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
