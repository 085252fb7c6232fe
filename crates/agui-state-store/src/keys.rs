//! Identifier validation and storage key derivation.
//!
//! Keys are laid out as:
//! - `<ns>:state:<thread_id>:<agent_name>` per-agent state envelope
//! - `<ns>:thread:<thread_id>` reserved for thread-level metadata
//!
//! Identifiers are restricted to `[A-Za-z0-9_-]`, so `:` never appears inside
//! a segment and parsing a key back into its parts is unambiguous.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::StorageError;
use crate::StorageResult;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "copilotkit";

/// Maximum thread id length in bytes.
pub const MAX_THREAD_ID_LEN: usize = 255;

/// Maximum agent name length in bytes.
pub const MAX_AGENT_NAME_LEN: usize = 100;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier pattern is valid"));

fn validate_identifier(kind: &'static str, value: &str, max_len: usize) -> StorageResult<()> {
    if value.is_empty() || value.len() > max_len || !IDENTIFIER_RE.is_match(value) {
        return Err(StorageError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate a thread id (1-255 chars of `[A-Za-z0-9_-]`).
pub fn validate_thread_id(thread_id: &str) -> StorageResult<()> {
    validate_identifier("thread ID", thread_id, MAX_THREAD_ID_LEN)
}

/// Validate an agent name (1-100 chars of `[A-Za-z0-9_-]`).
pub fn validate_agent_name(agent_name: &str) -> StorageResult<()> {
    validate_identifier("agent name", agent_name, MAX_AGENT_NAME_LEN)
}

/// Validate both halves of a state address.
pub fn validate_address(thread_id: &str, agent_name: &str) -> StorageResult<()> {
    validate_thread_id(thread_id)?;
    validate_agent_name(agent_name)
}

/// Deterministic key derivation within one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<ns>:state:<thread_id>:<agent_name>`
    pub fn state_key(&self, thread_id: &str, agent_name: &str) -> String {
        format!("{}:state:{}:{}", self.namespace, thread_id, agent_name)
    }

    /// `<ns>:thread:<thread_id>`
    pub fn thread_key(&self, thread_id: &str) -> String {
        format!("{}:thread:{}", self.namespace, thread_id)
    }

    /// Prefix shared by every state key in the namespace.
    pub fn state_prefix(&self) -> String {
        format!("{}:state:", self.namespace)
    }

    /// Prefix shared by every agent state key of one thread.
    pub fn thread_prefix(&self, thread_id: &str) -> String {
        format!("{}:state:{}:", self.namespace, thread_id)
    }

    /// Split a state key back into `(thread_id, agent_name)`.
    ///
    /// Returns `None` for keys outside this namespace or with segments that
    /// would not pass identifier validation.
    pub fn parse_state_key<'k>(&self, key: &'k str) -> Option<(&'k str, &'k str)> {
        let rest = key
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(":state:")?;
        let (thread_id, agent_name) = rest.split_once(':')?;
        if validate_address(thread_id, agent_name).is_err() {
            return None;
        }
        Some((thread_id, agent_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifiers() {
        for id in ["thread-1", "thread_abc", "T123", "a", &"x".repeat(255)] {
            assert!(validate_thread_id(id).is_ok(), "{id}");
        }
        for name in ["chef", "agent-1", "agent_two", &"n".repeat(100)] {
            assert!(validate_agent_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_invalid_identifiers() {
        for id in ["", "thread 1", "thread:1", "th/read", "ünï", &"x".repeat(256)] {
            let err = validate_thread_id(id).unwrap_err();
            assert_eq!(err.code(), "INVALID_IDENTIFIER", "{id}");
        }
        assert!(validate_agent_name(&"n".repeat(101)).is_err());
        assert!(validate_agent_name("agent.name").is_err());
    }

    #[test]
    fn key_layout_matches_namespace() {
        let keys = KeySpace::default();
        assert_eq!(keys.state_key("t1", "chef"), "copilotkit:state:t1:chef");
        assert_eq!(keys.thread_key("t1"), "copilotkit:thread:t1");
        assert_eq!(keys.thread_prefix("t1"), "copilotkit:state:t1:");

        let custom = KeySpace::new("agui");
        assert_eq!(custom.state_key("t", "a"), "agui:state:t:a");
    }

    #[test]
    fn parse_state_key_round_trips() {
        let keys = KeySpace::default();
        let key = keys.state_key("thread-9", "agent_x");
        assert_eq!(keys.parse_state_key(&key), Some(("thread-9", "agent_x")));
        assert_eq!(keys.parse_state_key("other:state:t:a"), None);
        assert_eq!(keys.parse_state_key("copilotkit:thread:t"), None);
        assert_eq!(keys.parse_state_key("copilotkit:state:t:a:b"), None);
    }
}
