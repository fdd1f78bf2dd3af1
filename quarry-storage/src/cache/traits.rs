//! Cache store trait and process-wide counters.
//!
//! This module defines the trait every cache store implements and the
//! counters the access layer updates on each cache decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quarry_core::StoreError;
use serde::{Deserialize, Serialize};

use super::envelope::CacheEntry;
use super::key::CacheKey;

/// Cache store trait for pluggable backends.
///
/// Implementations must be safe under concurrent readers and writers. Writes
/// are whole-entry overwrites: two writers racing on one key both store a
/// complete entry and the last one wins.
///
/// # Expiry
///
/// Expired entries read as absent. Stores may drop them lazily on read.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the live entry for `key` as of `now`.
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>)
        -> Result<Option<CacheEntry>, StoreError>;

    /// Store an entry, replacing any previous one under the same key.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove the entry for `key`. Returns whether one existed.
    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Number of stored entries, expired ones included until swept.
    async fn entry_count(&self) -> Result<u64, StoreError>;
}

static GLOBAL_COUNTERS: Lazy<Arc<CacheCounters>> = Lazy::new(|| Arc::new(CacheCounters::new()));

/// Hit, miss and invalidation counters.
///
/// Monotonic for the life of the value. Used for observability only.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance.
    pub fn global() -> Arc<CacheCounters> {
        Arc::clone(&GLOBAL_COUNTERS)
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Read-only copy of the current values.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of invalidation calls.
    pub invalidations: u64,
}

impl CounterSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
