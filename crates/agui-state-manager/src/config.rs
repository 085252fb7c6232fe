//! Manager configuration.
//!
//! Three ways to build a [`StoreConfig`]: `Default`, a TOML document via
//! [`StoreConfig::from_toml_str`], or `AGUI_STATE_*` environment variables via
//! [`StoreConfig::from_env`]. Every field has a default, so a TOML document or
//! environment only needs to name what it overrides.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use agui_state_store::{
    MemoryBackendConfig, StateStoreOptions, StorageError, StorageResult,
    DEFAULT_MAX_STATES_PER_THREAD, DEFAULT_NAMESPACE,
};
use serde::{Deserialize, Serialize};

/// Prefix of every environment variable read by [`StoreConfig::from_env`].
pub const ENV_PREFIX: &str = "AGUI_STATE_";

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
    Postgresql,
    Mongodb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Postgresql => "postgresql",
            BackendKind::Mongodb => "mongodb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            "postgresql" | "postgres" => Ok(BackendKind::Postgresql),
            "mongodb" | "mongo" => Ok(BackendKind::Mongodb),
            other => Err(StorageError::Configuration {
                field: "backend".to_string(),
                reason: format!("unknown backend '{other}'"),
            }),
        }
    }
}

/// Configuration for a [`StateStoreManager`](crate::StateStoreManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Connection string for networked backends; unused by memory
    pub connection_string: Option<String>,
    pub namespace: String,
    pub max_size_mb: u64,
    /// TTL applied to every saved state; `0` never expires
    pub default_ttl_seconds: u64,
    pub max_states_per_thread: usize,
    pub connection_pool_size: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    /// Accepted but inert
    pub compression_enabled: bool,
    /// Accepted but inert
    pub encryption_enabled: bool,
    pub backup_enabled: bool,
    pub backup_interval_seconds: u64,
    pub metrics_enabled: bool,
    pub health_check_interval_seconds: u64,
    pub metadata_cache_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    /// How long shutdown waits for each background task before aborting it
    pub shutdown_grace_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            connection_string: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_size_mb: 100,
            default_ttl_seconds: 3600,
            max_states_per_thread: DEFAULT_MAX_STATES_PER_THREAD,
            connection_pool_size: 10,
            timeout_seconds: 30,
            retry_attempts: 3,
            compression_enabled: false,
            encryption_enabled: false,
            backup_enabled: false,
            backup_interval_seconds: 3600,
            metrics_enabled: true,
            health_check_interval_seconds: 60,
            metadata_cache_ttl_seconds: 300,
            cleanup_interval_seconds: 300,
            shutdown_grace_ms: 5000,
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> StorageError {
    StorageError::Configuration {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<T: FromStr>(field: &str, raw: &str) -> StorageResult<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, format!("cannot parse '{raw}': {e}")))
}

fn parse_bool(field: &str, raw: &str) -> StorageResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(field, format!("cannot parse '{raw}' as a boolean"))),
    }
}

impl StoreConfig {
    /// Parse a TOML document and validate the result.
    pub fn from_toml_str(source: &str) -> StorageResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| invalid("toml", e.message()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read overrides from `AGUI_STATE_*` environment variables.
    ///
    /// Unset variables keep their defaults; a set but unparsable variable is
    /// an error rather than being ignored.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()));
        let mut config = Self::default();

        if let Some(raw) = var("backend") {
            config.backend = raw.parse()?;
        }
        if let Some(raw) = var("connection_string") {
            config.connection_string = Some(raw);
        }
        if let Some(raw) = var("namespace") {
            config.namespace = raw;
        }

        macro_rules! numeric {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(raw) = var(stringify!($field)) {
                        config.$field = parse_var(stringify!($field), &raw)?;
                    }
                )*
            };
        }
        numeric!(
            max_size_mb,
            default_ttl_seconds,
            max_states_per_thread,
            connection_pool_size,
            timeout_seconds,
            retry_attempts,
            backup_interval_seconds,
            health_check_interval_seconds,
            metadata_cache_ttl_seconds,
            cleanup_interval_seconds,
            shutdown_grace_ms,
        );

        macro_rules! flags {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(raw) = var(stringify!($field)) {
                        config.$field = parse_bool(stringify!($field), &raw)?;
                    }
                )*
            };
        }
        flags!(
            compression_enabled,
            encryption_enabled,
            backup_enabled,
            metrics_enabled,
        );

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the manager unusable.
    pub fn validate(&self) -> StorageResult<()> {
        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(invalid("namespace", "must be non-empty and must not contain ':'"));
        }
        let positive = [
            ("max_size_mb", self.max_size_mb),
            ("max_states_per_thread", self.max_states_per_thread as u64),
            ("connection_pool_size", u64::from(self.connection_pool_size)),
            ("timeout_seconds", self.timeout_seconds),
            ("backup_interval_seconds", self.backup_interval_seconds),
            ("health_check_interval_seconds", self.health_check_interval_seconds),
            ("metadata_cache_ttl_seconds", self.metadata_cache_ttl_seconds),
            ("cleanup_interval_seconds", self.cleanup_interval_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.max_size_mb > u64::MAX / (1024 * 1024) {
            return Err(invalid("max_size_mb", "too large"));
        }
        Ok(())
    }

    pub fn max_size_bytes(&self) -> usize {
        usize::try_from(self.max_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_seconds > 0).then(|| Duration::from_secs(self.default_ttl_seconds))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_cache_ttl_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn memory_config(&self) -> MemoryBackendConfig {
        MemoryBackendConfig::default()
            .with_max_size_bytes(self.max_size_bytes())
            .with_default_ttl(self.default_ttl())
    }

    pub fn store_options(&self) -> StateStoreOptions {
        StateStoreOptions::default()
            .with_namespace(self.namespace.clone())
            .with_max_states_per_thread(self.max_states_per_thread)
    }

    /// The subset of settings reported alongside metrics.
    pub fn to_summary(&self) -> ConfigSummary {
        ConfigSummary {
            backend: self.backend,
            namespace: self.namespace.clone(),
            max_size_mb: self.max_size_mb,
            default_ttl_seconds: self.default_ttl_seconds,
            max_states_per_thread: self.max_states_per_thread,
            compression_enabled: self.compression_enabled,
            encryption_enabled: self.encryption_enabled,
            backup_enabled: self.backup_enabled,
            metrics_enabled: self.metrics_enabled,
        }
    }
}

/// Serializable view of a [`StoreConfig`] without connection details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub backend: BackendKind,
    pub namespace: String,
    pub max_size_mb: u64,
    pub default_ttl_seconds: u64,
    pub max_states_per_thread: usize,
    pub compression_enabled: bool,
    pub encryption_enabled: bool,
    pub backup_enabled: bool,
    pub metrics_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.namespace, "copilotkit");
        assert_eq!(config.max_size_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.max_states_per_thread, 50);
        assert_eq!(config.metadata_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.health_check_interval(), Duration::from_secs(60));
        assert!(config.metrics_enabled);
        assert!(!config.backup_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = StoreConfig::from_toml_str(
            r#"
            backend = "memory"
            max_size_mb = 8
            default_ttl_seconds = 0
            backup_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_size_mb, 8);
        assert_eq!(config.default_ttl(), None);
        assert!(config.backup_enabled);
        assert_eq!(config.max_states_per_thread, 50);
    }

    #[test]
    fn toml_rejects_unknown_fields_and_zero_limits() {
        let err = StoreConfig::from_toml_str("max_size_gb = 1").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let err = StoreConfig::from_toml_str("max_states_per_thread = 0").unwrap_err();
        assert!(err.to_string().contains("max_states_per_thread"));
    }

    #[test]
    fn env_lookup_applies_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("AGUI_STATE_BACKEND", "Redis"),
            ("AGUI_STATE_CONNECTION_STRING", "redis://localhost:6379"),
            ("AGUI_STATE_MAX_STATES_PER_THREAD", "5"),
            ("AGUI_STATE_METRICS_ENABLED", "false"),
            ("AGUI_STATE_NAMESPACE", "tenant_a"),
        ]))
        .unwrap();
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(
            config.connection_string.as_deref(),
            Some("redis://localhost:6379")
        );
        assert_eq!(config.max_states_per_thread, 5);
        assert!(!config.metrics_enabled);
        assert_eq!(config.namespace, "tenant_a");
    }

    #[test]
    fn env_lookup_rejects_garbage() {
        let err = StoreConfig::from_lookup(lookup(&[("AGUI_STATE_MAX_SIZE_MB", "lots")]))
            .unwrap_err();
        assert_eq!(
            err.details().get("field").map(String::as_str),
            Some("max_size_mb")
        );

        let err = StoreConfig::from_lookup(lookup(&[("AGUI_STATE_BACKEND", "cassandra")]))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn namespace_must_not_contain_separator() {
        let config = StoreConfig {
            namespace: "a:b".to_string(),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_omits_connection_details() {
        let config = StoreConfig {
            connection_string: Some("postgres://secret".to_string()),
            ..StoreConfig::default()
        };
        let json = serde_json::to_string(&config.to_summary()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"backend\":\"memory\""));
    }
}
