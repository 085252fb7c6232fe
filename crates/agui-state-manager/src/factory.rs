//! Explicit backend factory.
//!
//! A [`BackendFactory`] maps each [`BackendKind`] to a constructor producing a
//! ready [`AgentStateStore`]. It is built once and passed to
//! [`StateStoreManager::open_with`](crate::StateStoreManager::open_with); there
//! is no process-wide registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use agui_state_store::{AgentStateStore, StorageError, StorageResult};

use crate::config::{BackendKind, StoreConfig};

/// Builds a store for one backend kind from the manager configuration.
pub type StoreConstructor =
    Arc<dyn Fn(&StoreConfig) -> StorageResult<AgentStateStore> + Send + Sync>;

#[derive(Clone)]
pub struct BackendFactory {
    constructors: BTreeMap<BackendKind, StoreConstructor>,
}

impl Default for BackendFactory {
    /// Only the memory backend is registered.
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(BackendKind::Memory, |config| {
            Ok(AgentStateStore::in_memory(
                config.memory_config(),
                config.store_options(),
            ))
        });
        factory
    }
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl BackendFactory {
    /// A factory with no registered backends.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: BackendKind, constructor: F) -> &mut Self
    where
        F: Fn(&StoreConfig) -> StorageResult<AgentStateStore> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
        self
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.constructors.keys().copied().collect()
    }

    /// Build the store selected by `config.backend`.
    pub fn create(&self, config: &StoreConfig) -> StorageResult<AgentStateStore> {
        let constructor =
            self.constructors
                .get(&config.backend)
                .ok_or_else(|| StorageError::NotImplemented {
                    backend: config.backend.to_string(),
                })?;
        constructor(config)
    }
}
