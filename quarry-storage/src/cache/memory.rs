//! In-process cache store backed by a concurrent map.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quarry_core::StoreError;

use super::envelope::CacheEntry;
use super::key::CacheKey;
use super::traits::CacheStore;

/// Writes between two sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 256;

/// Process-local store.
///
/// Expired entries are dropped when read, and every `sweep_interval`
/// writes a full sweep reclaims expired entries nobody reads again.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    writes: AtomicU64,
    sweep_interval: u64,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep after every `writes` puts. Zero is treated as one.
    pub fn with_sweep_interval(mut self, writes: u64) -> Self {
        self.sweep_interval = writes.max(1);
        self
    }

    /// Drop every entry expired at `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "swept expired cache entries");
        }
        removed
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let entry = match self.entries.get(key) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        if entry.is_expired(now) {
            // Only drop it if no writer replaced it in the meantime.
            self.entries.remove_if(key, |_, current| current.is_expired(now));
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_interval == 0 {
            self.purge_expired(Utc::now());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        Ok(self.entries.len() as u64)
    }
}
