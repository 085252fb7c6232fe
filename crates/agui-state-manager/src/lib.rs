//! agui-state-manager: managed agent state store (Layer 1)
//!
//! Wraps one [`agui_state_store::AgentStateStore`] with schema validation, a
//! metadata cache, operation metrics and supervised background tasks
//! (health monitor, expired-entry sweep, optional backup).
//!
//! ## Key Components
//!
//! - [`StateStoreManager`]: explicit `open` / `shutdown` lifecycle around the store
//! - [`StoreConfig`]: defaults, TOML and `AGUI_STATE_*` environment loading
//! - [`BackendFactory`]: backend kind to store constructor, passed by reference
//! - [`StateValidator`]: per-agent field type schemas
//! - [`StoreMetrics`]: per-operation counts, durations and cache hit rate

pub mod cache;
pub mod config;
pub mod factory;
mod manager;
pub mod metrics;
pub mod obs;
mod tasks;
pub mod telemetry;
pub mod validator;

pub use cache::MetadataCache;
pub use config::{BackendKind, ConfigSummary, StoreConfig};
pub use factory::{BackendFactory, StoreConstructor};
pub use manager::{BulkSaveItem, Lifecycle, ManagerMetrics, StateAddress, StateStoreManager};
pub use metrics::{MetricsReport, OperationReport, StoreMetrics};
pub use obs::{
    emit_backup_completed, emit_health_checked, emit_operation_failed, emit_state_deleted,
    emit_state_saved, emit_thread_eviction, operation_span,
};
pub use telemetry::init_tracing;
pub use validator::{AgentSchema, FieldType, StateValidator};

pub use agui_state_store::{
    BackendSnapshot, KeyTtl, StateData, StateMetadata, StorageError, StorageResult, StoreStats,
    StoredState, Tags,
};
