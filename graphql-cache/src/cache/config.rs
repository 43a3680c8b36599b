//! Configuration for cache rules and the cache manager

use crate::backend::{Backend, BackendKind};
use crate::cache::types::Zone;
use crate::error::{CacheError, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Zone used by rules that do not name one
pub const DEFAULT_ZONE: &str = "default";

/// Configuration supplied when registering a query or field cache
///
/// Immutable once registered.
#[derive(Clone)]
pub struct CacheConfig {
    /// Namespace the rule writes into; cleared as a unit
    pub zone: Zone,

    /// Time-to-live for written values; `None` keeps them until cleared
    pub ttl: Option<Duration>,

    /// Scope keys to the current identity
    pub per_user: bool,

    /// Rule-specific backend; falls back to the manager's active backend
    pub backend: Option<Arc<dyn Backend>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            zone: DEFAULT_ZONE.to_string(),
            ttl: None,
            per_user: false,
            backend: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("zone", &self.zone)
            .field("ttl", &self.ttl)
            .field("per_user", &self.per_user)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.zone.trim().is_empty() {
            return Err(CacheError::ConfigError("zone must not be empty".to_string()));
        }

        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::ConfigError(
                "ttl must be greater than 0 (omit it to never expire)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for cache configuration
#[derive(Default)]
pub struct CacheConfigBuilder {
    zone: Option<Zone>,
    ttl: Option<Duration>,
    per_user: Option<bool>,
    backend: Option<Arc<dyn Backend>>,
}

impl CacheConfigBuilder {
    /// Set the zone
    pub fn zone(mut self, zone: impl Into<Zone>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Set the time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Scope keys per user
    pub fn per_user(mut self, per_user: bool) -> Self {
        self.per_user = Some(per_user);
        self
    }

    /// Use a dedicated backend for this rule
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            zone: self.zone.unwrap_or(defaults.zone),
            ttl: self.ttl.or(defaults.ttl),
            per_user: self.per_user.unwrap_or(defaults.per_user),
            backend: self.backend.or(defaults.backend),
        }
    }
}

/// Process-wide settings for the cache manager
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Root directory of the filesystem backend
    pub cache_dir: PathBuf,

    /// Global caching switch; when false the manager is a passthrough
    pub active: bool,

    /// Backend created at activation unless overridden
    pub backend: BackendKind,

    /// Entry bound for the memory backend
    pub max_memory_entries: Option<usize>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("graphql-cache"),
            active: true,
            backend: BackendKind::FileSystem,
            max_memory_entries: None,
        }
    }
}

impl ManagerSettings {
    /// Settings from `GRAPHQL_CACHE_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(dir) = std::env::var("GRAPHQL_CACHE_DIR") {
            settings.cache_dir = PathBuf::from(dir);
        }

        if let Ok(active) = std::env::var("GRAPHQL_CACHE_ACTIVE") {
            settings.active = parse_flag(&active).ok_or_else(|| {
                CacheError::ConfigError(format!("GRAPHQL_CACHE_ACTIVE: invalid flag '{}'", active))
            })?;
        }

        if let Ok(kind) = std::env::var("GRAPHQL_CACHE_BACKEND") {
            settings.backend = kind.parse()?;
        }

        if let Ok(max) = std::env::var("GRAPHQL_CACHE_MAX_ENTRIES") {
            let max = max.parse::<usize>().map_err(|e| {
                CacheError::ConfigError(format!("GRAPHQL_CACHE_MAX_ENTRIES: {}", e))
            })?;
            settings.max_memory_entries = Some(max);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::FileSystem && self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::ConfigError(
                "cache_dir must be set for the filesystem backend".to_string(),
            ));
        }

        if self.max_memory_entries == Some(0) {
            return Err(CacheError::ConfigError(
                "max_memory_entries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
