//! In-process backend with ttl enforcement and an optional entry bound

use crate::backend::Backend;
use crate::cache::types::{CacheKey, CachedValue, Zone};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Counters kept by the memory backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Values currently stored
    pub entries: usize,

    /// Values dropped to honour `max_entries`
    pub evictions: u64,

    /// Values dropped because their ttl ran out
    pub expirations: u64,
}

/// Thread-safe in-memory backend
///
/// Values are grouped per zone so `clear_zone` drops a whole map without
/// looking at individual keys. When `max_entries` is set the oldest write is
/// evicted first.
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<RwLock<MemoryStore>>,
    max_entries: Option<usize>,
}

#[derive(Default)]
struct MemoryStore {
    zones: HashMap<Zone, HashMap<CacheKey, CachedValue>>,

    /// Write order for eviction
    order: VecDeque<(Zone, CacheKey)>,

    stats: MemoryStats,
}

impl MemoryStore {
    fn len(&self) -> usize {
        self.zones.values().map(HashMap::len).sum()
    }

    fn remove(&mut self, zone: &str, key: &str) -> Option<CachedValue> {
        let removed = self.zones.get_mut(zone).and_then(|entries| entries.remove(key));
        if removed.is_some() {
            self.order.retain(|(z, k)| !(z == zone && k == key));
            if self.zones.get(zone).is_some_and(HashMap::is_empty) {
                self.zones.remove(zone);
            }
        }
        removed
    }

    fn sync_entries(&mut self) {
        self.stats.entries = self.len();
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an unbounded memory backend
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::default())),
            max_entries: None,
        }
    }

    /// Create a memory backend holding at most `max_entries` values
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
            ..Self::new()
        }
    }

    /// Number of stored values, expired ones included until purged
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current counters
    pub async fn stats(&self) -> MemoryStats {
        self.store.read().await.stats
    }

    /// Drop every expired value, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut store = self.store.write().await;

        let expired: Vec<(Zone, CacheKey)> = store
            .zones
            .iter()
            .flat_map(|(zone, entries)| {
                entries
                    .iter()
                    .filter(|(_, value)| value.is_expired())
                    .map(move |(key, _)| (zone.clone(), key.clone()))
            })
            .collect();

        for (zone, key) in &expired {
            store.remove(zone, key);
        }

        store.stats.expirations += expired.len() as u64;
        store.sync_entries();

        if !expired.is_empty() {
            debug!("Purged {} expired entries", expired.len());
        }
        expired.len()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, zone: &str, key: &str) -> Result<Option<CachedValue>> {
        let mut store = self.store.write().await;

        let value = match store.zones.get(zone).and_then(|entries| entries.get(key)) {
            Some(value) => value.clone(),
            None => return Ok(None),
        };

        if value.is_expired() {
            debug!(zone, key, "Memory cache entry expired");
            store.remove(zone, key);
            store.stats.expirations += 1;
            store.sync_entries();
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
        let value = value.with_ttl(ttl);
        let mut store = self.store.write().await;

        // Overwrites move to the back of the eviction queue
        store.remove(zone, key);

        if let Some(max) = self.max_entries {
            while store.len() >= max {
                let Some((old_zone, old_key)) = store.order.pop_front() else {
                    break;
                };
                debug!(zone = %old_zone, key = %old_key, "Evicting entry due to max_entries limit");
                store.remove(&old_zone, &old_key);
                store.stats.evictions += 1;
            }
        }

        store
            .zones
            .entry(zone.to_string())
            .or_default()
            .insert(key.to_string(), value);
        store.order.push_back((zone.to_string(), key.to_string()));
        store.sync_entries();

        Ok(())
    }

    async fn clear_zone(&self, zone: &str) -> Result<bool> {
        let mut store = self.store.write().await;

        let count = store.zones.remove(zone).map(|entries| entries.len()).unwrap_or(0);
        store.order.retain(|(z, _)| z != zone);
        store.sync_entries();

        info!("Cleared {} entries from zone '{}'", count, zone);
        Ok(true)
    }

    async fn clear(&self) -> Result<bool> {
        let mut store = self.store.write().await;

        let count = store.len();
        store.zones.clear();
        store.order.clear();
        store.sync_entries();

        info!("Cleared {} entries from memory cache", count);
        Ok(true)
    }
}
