//! Error types for agui-state-store

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors that can occur in the state persistence layer.
///
/// Every variant carries a stable machine-readable code (see [`StorageError::code`])
/// and a flat details map (see [`StorageError::details`]) so callers outside
/// Rust can branch on the failure without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A thread id or agent name failed format validation
    #[error("[INVALID_IDENTIFIER] Invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    /// State data did not satisfy the registered agent schema
    #[error("[VALIDATION_FAILED] State for agent {agent_name} failed validation: {}", problems.join("; "))]
    Validation {
        agent_name: String,
        problems: Vec<String>,
    },

    /// Requested state does not exist
    #[error("[STATE_NOT_FOUND] State not found for key: {state_key}")]
    StateNotFound { state_key: String },

    /// Stored state could not be serialized, deserialized or verified
    #[error("[STATE_CORRUPTION] State corruption detected for key {state_key}: {reason}")]
    StateCorruption { state_key: String, reason: String },

    /// Backend cannot currently serve requests
    #[error("[STORAGE_BACKEND_UNAVAILABLE] Storage backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Backend kind is recognised but has no implementation
    #[error("[NOT_IMPLEMENTED] Storage backend '{backend}' is not implemented")]
    NotImplemented { backend: String },

    /// A single value cannot fit into the backend even when empty
    #[error("[CAPACITY_EXCEEDED] Value for key {key} is {size_bytes} bytes, capacity is {max_size_bytes} bytes")]
    CapacityExceeded {
        key: String,
        size_bytes: usize,
        max_size_bytes: usize,
    },

    /// Invalid configuration value
    #[error("[CONFIGURATION_ERROR] Invalid configuration for {field}: {reason}")]
    Configuration { field: String, reason: String },

    /// Generic backend fault
    #[error("[STORAGE_ERROR] {0}")]
    Backend(String),
}

impl StorageError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            StorageError::Validation { .. } => "VALIDATION_FAILED",
            StorageError::StateNotFound { .. } => "STATE_NOT_FOUND",
            StorageError::StateCorruption { .. } => "STATE_CORRUPTION",
            StorageError::BackendUnavailable { .. } => "STORAGE_BACKEND_UNAVAILABLE",
            StorageError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            StorageError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            StorageError::Configuration { .. } => "CONFIGURATION_ERROR",
            StorageError::Backend(_) => "STORAGE_ERROR",
        }
    }

    /// Structured details describing the failure.
    pub fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        match self {
            StorageError::InvalidIdentifier { kind, value } => {
                details.insert("kind".to_string(), kind.to_string());
                details.insert("value".to_string(), value.clone());
            }
            StorageError::Validation {
                agent_name,
                problems,
            } => {
                details.insert("agent_name".to_string(), agent_name.clone());
                for (i, problem) in problems.iter().enumerate() {
                    details.insert(format!("problem_{i}"), problem.clone());
                }
            }
            StorageError::StateNotFound { state_key } => {
                details.insert("state_key".to_string(), state_key.clone());
            }
            StorageError::StateCorruption { state_key, reason } => {
                details.insert("state_key".to_string(), state_key.clone());
                details.insert("reason".to_string(), reason.clone());
            }
            StorageError::BackendUnavailable { backend, reason } => {
                details.insert("backend_name".to_string(), backend.clone());
                details.insert("reason".to_string(), reason.clone());
            }
            StorageError::NotImplemented { backend } => {
                details.insert("backend_name".to_string(), backend.clone());
            }
            StorageError::CapacityExceeded {
                key,
                size_bytes,
                max_size_bytes,
            } => {
                details.insert("key".to_string(), key.clone());
                details.insert("size_bytes".to_string(), size_bytes.to_string());
                details.insert("max_size_bytes".to_string(), max_size_bytes.to_string());
            }
            StorageError::Configuration { field, reason } => {
                details.insert("field".to_string(), field.clone());
                details.insert("reason".to_string(), reason.clone());
            }
            StorageError::Backend(message) => {
                details.insert("message".to_string(), message.clone());
            }
        }
        details
    }

    /// Build a corruption error for `state_key`.
    pub fn corruption(state_key: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::StateCorruption {
            state_key: state_key.into(),
            reason: reason.into(),
        }
    }

    /// Build a poisoned-lock error.
    pub fn poisoned(what: &str) -> Self {
        StorageError::Backend(format!("{what} lock poisoned"))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::StateCorruption {
            state_key: "serialization".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = StorageError::StateNotFound {
            state_key: "copilotkit:state:t:a".to_string(),
        };
        assert_eq!(err.code(), "STATE_NOT_FOUND");
        assert!(err.to_string().contains("copilotkit:state:t:a"));

        let err = StorageError::corruption("k", "Invalid JSON");
        assert_eq!(err.code(), "STATE_CORRUPTION");
        assert!(err.to_string().contains("Invalid JSON"));
        assert_eq!(err.details()["reason"], "Invalid JSON");
    }

    #[test]
    fn validation_lists_every_problem() {
        let err = StorageError::Validation {
            agent_name: "chef".to_string(),
            problems: vec!["missing field 'step'".into(), "field 'count' expected integer".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing field 'step'"));
        assert!(msg.contains("expected integer"));
        assert_eq!(err.details().len(), 3);
    }

    #[test]
    fn serde_errors_become_corruption() {
        let err: StorageError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "STATE_CORRUPTION");
    }
}
