//! Durable backend storing one JSON file per cache entry
//!
//! Layout: `<root>/<zone-dir>/<sha256(key)>.json`. Each zone owns a
//! directory, so clearing a zone removes the directory without knowing the
//! keys written under it.

use crate::backend::Backend;
use crate::cache::key::hash;
use crate::cache::types::CachedValue;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Hex characters of the zone hash in a zone directory name
const ZONE_HASH_LEN: usize = 12;

/// Filesystem-backed cache storage
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    /// Create a backend rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the cache
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the entries of `zone`
    ///
    /// The readable prefix is sanitized; the hash suffix keeps zones that
    /// sanitize to the same prefix apart.
    pub fn zone_dir(&self, zone: &str) -> PathBuf {
        let readable: String = zone
            .chars()
            .take(48)
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        self.root.join(format!("{}-{}", readable, &hash(zone)[..ZONE_HASH_LEN]))
    }

    /// File holding the entry at `(zone, key)`
    pub fn entry_path(&self, zone: &str, key: &str) -> PathBuf {
        self.zone_dir(zone).join(format!("{}.json", hash(key)))
    }

    async fn remove_file_quietly(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove cache file {:?}: {}", path, e);
            }
        }
    }

    async fn remove_dir(path: &Path) -> Result<bool> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(CacheError::BackendError {
                backend: "filesystem".to_string(),
                message: format!("failed to remove {:?}: {}", path, e),
            }),
        }
    }
}

/// Matches the `<readable>-<12 hex>` names produced by `zone_dir`
fn is_zone_dir_name(name: &str) -> bool {
    name.rsplit_once('-').is_some_and(|(_, suffix)| {
        suffix.len() == ZONE_HASH_LEN
            && suffix.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

#[async_trait]
impl Backend for FileSystemBackend {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn get(&self, zone: &str, key: &str) -> Result<Option<CachedValue>> {
        let path = self.entry_path(zone, key);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value: CachedValue = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding unreadable cache file {:?}: {}", path, e);
                Self::remove_file_quietly(&path).await;
                return Ok(None);
            }
        };

        if value.is_expired() {
            debug!(zone, key, "Filesystem cache entry expired");
            Self::remove_file_quietly(&path).await;
            return Ok(None);
        }

        Ok(Some(value))
    }

    async fn set(
        &self,
        zone: &str,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let dir = self.zone_dir(zone);
        fs::create_dir_all(&dir).await?;

        let value = value.with_ttl(ttl);
        let content = serde_json::to_vec(&value)?;

        // Write then rename so readers never see a partial file
        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, content).await?;

        let path = self.entry_path(zone, key);
        if let Err(e) = fs::rename(&tmp, &path).await {
            Self::remove_file_quietly(&tmp).await;
            return Err(e.into());
        }

        debug!(zone, key, "Wrote cache file {:?}", path);
        Ok(())
    }

    async fn clear_zone(&self, zone: &str) -> Result<bool> {
        let dir = self.zone_dir(zone);
        let done = Self::remove_dir(&dir).await?;

        info!("Cleared cache zone '{}' at {:?}", zone, dir);
        Ok(done)
    }

    async fn clear(&self) -> Result<bool> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        // Only zone directories belong to the cache; anything else in the
        // root is left alone
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let is_zone = entry.file_type().await?.is_dir()
                && entry.file_name().to_str().is_some_and(is_zone_dir_name);
            if is_zone {
                Self::remove_dir(&entry.path()).await?;
                removed += 1;
            }
        }

        info!("Cleared {} cache zone(s) at {:?}", removed, self.root);
        Ok(true)
    }
}
