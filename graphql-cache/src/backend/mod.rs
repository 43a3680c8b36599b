//! Storage backends
//!
//! A backend persists [`CachedValue`]s under `(zone, key)` and enforces
//! their ttl. The manager treats every backend failure as non-fatal: a
//! failed read is a miss and a failed write is logged and dropped.

mod filesystem;
mod memory;

pub use filesystem::FileSystemBackend;
pub use memory::MemoryBackend;

use crate::cache::config::ManagerSettings;
use crate::cache::types::CachedValue;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Storage contract shared by all cache backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Read a live value; `Ok(None)` on miss or expiry
    async fn get(&self, zone: &str, key: &str) -> Result<Option<CachedValue>>;

    /// Write a value, replacing any existing one at `(zone, key)`
    async fn set(
        &self,
        zone: &str,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Remove every value stored under `zone`; true when the operation completed
    async fn clear_zone(&self, zone: &str) -> Result<bool>;

    /// Remove every value in every zone
    async fn clear(&self) -> Result<bool>;
}

/// Backend selectable through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    FileSystem,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::FileSystem => write!(f, "filesystem"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" | "file" => Ok(BackendKind::FileSystem),
            "memory" | "mem" => Ok(BackendKind::Memory),
            other => Err(CacheError::ConfigError(format!(
                "unknown cache backend '{}' (expected filesystem or memory)",
                other
            ))),
        }
    }
}

/// Build the backend described by `settings`
pub fn create_backend(settings: &ManagerSettings) -> Arc<dyn Backend> {
    match settings.backend {
        BackendKind::FileSystem => Arc::new(FileSystemBackend::new(settings.cache_dir.clone())),
        BackendKind::Memory => match settings.max_memory_entries {
            Some(max) => Arc::new(MemoryBackend::with_max_entries(max)),
            None => Arc::new(MemoryBackend::new()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("filesystem".parse::<BackendKind>().unwrap(), BackendKind::FileSystem);
        assert_eq!(" Memory ".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("redis".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Memory.to_string(), "memory");
    }

    #[test]
    fn test_create_backend() {
        let settings = ManagerSettings {
            backend: BackendKind::Memory,
            ..Default::default()
        };
        assert_eq!(create_backend(&settings).name(), "memory");

        let settings = ManagerSettings::default();
        assert_eq!(create_backend(&settings).name(), "filesystem");
    }
}
