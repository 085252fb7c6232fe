//! Structured observability hooks for agent state lifecycle events.
//!
//! This module provides:
//! - Operation-scoped tracing spans via [`operation_span`]
//! - Emission functions for key events: save, delete, thread eviction,
//!   operation failure, health check and backup
//!
//! Events are emitted at `info!` level (failures at `warn!`). For JSON output
//! see [`crate::telemetry::init_tracing`].

use agui_state_store::StorageError;
use tracing::{info, warn};

/// Span wrapping one manager operation.
///
/// Attach it to the operation's future with `tracing::Instrument` so every
/// event emitted inside is tagged with the operation name.
pub fn operation_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("agui.state", operation = operation)
}

/// Emit event: agent state saved.
///
/// ```ignore
/// emit_state_saved("thread-1", "chef", 2, 148);
/// // logs: event=state.saved thread_id=thread-1 agent_name=chef version=2 size_bytes=148
/// ```
pub fn emit_state_saved(thread_id: &str, agent_name: &str, version: u64, size_bytes: u64) {
    info!(
        event = "state.saved",
        thread_id = %thread_id,
        agent_name = %agent_name,
        version = version,
        size_bytes = size_bytes,
    );
}

/// Emit event: agent state deleted.
pub fn emit_state_deleted(thread_id: &str, agent_name: &str) {
    info!(event = "state.deleted", thread_id = %thread_id, agent_name = %agent_name);
}

/// Emit event: an agent was evicted to keep its thread under the limit.
pub fn emit_thread_eviction(thread_id: &str, evicted_agent: &str, limit: usize) {
    info!(
        event = "state.thread_eviction",
        thread_id = %thread_id,
        agent_name = %evicted_agent,
        limit = limit,
    );
}

/// Emit event: a manager operation failed (warning level).
pub fn emit_operation_failed(operation: &str, error: &StorageError) {
    warn!(
        event = "operation.failed",
        operation = %operation,
        code = error.code(),
        error = %error,
    );
}

/// Emit event: backend health check completed.
pub fn emit_health_checked(backend: &str, healthy: bool) {
    if healthy {
        info!(event = "health.checked", backend = %backend, healthy = healthy);
    } else {
        warn!(event = "health.checked", backend = %backend, healthy = healthy);
    }
}

/// Emit event: backup snapshot taken.
pub fn emit_backup_completed(entries: usize) {
    info!(event = "backup.completed", entries = entries);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_span_create() {
        let span = operation_span("save");
        let _entered = span.enter();
    }
}
