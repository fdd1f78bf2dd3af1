//! QUARRY Storage - Result Cache and Access Layer
//!
//! The content-addressed result cache (keys, TTL policy, payload envelope,
//! stores, counters) and [`QueryAccess`], which ties the registry,
//! connectors, transform pipeline and freshness verifier to the cache.

pub mod access;
pub mod cache;

use std::sync::Arc;

use quarry_core::{CacheBackendKind, StoreError};

pub use access::{AccessSettings, QueryAccess};
pub use cache::{
    CacheCounters, CacheEntry, CacheKey, CacheStore, ClampedTtl, CounterSnapshot, EntryMetadata,
    LmdbCacheError, LmdbCacheStore, MemoryCacheStore, PayloadEncoding, TtlPolicy,
};

/// Open the store selected by configuration.
pub fn open_store(backend: &CacheBackendKind) -> Result<Arc<dyn CacheStore>, StoreError> {
    match backend {
        CacheBackendKind::Memory => Ok(Arc::new(MemoryCacheStore::new())),
        CacheBackendKind::Lmdb { path, max_size_mb } => {
            Ok(Arc::new(LmdbCacheStore::new(path, *max_size_mb)?))
        }
    }
}
