//! Content-addressed result cache.
//!
//! This module provides the pieces the access layer composes:
//!
//! - **Keys**: derived from `(id, source, canonical params)` only
//! - **TTL policy**: the only way to build the TTL a store write needs
//! - **Envelope**: serialized result plus encoding flag, sizes and expiry
//! - **Stores**: in-process (`dashmap`) and shared on-disk (LMDB)
//! - **Counters**: process-wide hit / miss / invalidation counts
//!
//! # Example
//!
//! ```ignore
//! let key = CacheKey::for_spec(&spec);
//! let ttl = TtlPolicy::default().resolve(Some(600)).expect("caching enabled");
//! let entry = CacheEntry::encode(key.clone(), &result, ttl, Utc::now(), 8192)?;
//! store.put(entry).await?;
//!
//! let cached = store.get(&key, Utc::now()).await?;
//! ```

mod envelope;
mod key;
mod lmdb_backend;
mod memory;
mod traits;
mod ttl;

pub use envelope::{CacheEntry, EntryMetadata, PayloadEncoding, FRAME_HEADER_LEN, FRAME_MAGIC};
pub use key::{CacheKey, KEY_DIGEST_LEN, KEY_NAMESPACE};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory::MemoryCacheStore;
pub use traits::{CacheCounters, CacheStore, CounterSnapshot};
pub use ttl::{ClampedTtl, TtlPolicy};
