//! Content-derived cache keys.
//!
//! A key is a pure function of `(id, source, canonical params)`. Nothing
//! time-dependent feeds into it, so two calls that would compute the same
//! result always address the same entry.

use std::fmt;

use quarry_core::{canonical_params, sha256_hex, ParamMap, QuerySpec};

/// Namespace prepended to every key.
pub const KEY_NAMESPACE: &str = "quarry:query:";

/// Number of hex digest characters kept in a key.
pub const KEY_DIGEST_LEN: usize = 24;

/// Separator between hashed components. Cannot appear in canonical text
/// unescaped, so component boundaries are unambiguous.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Address of a cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a query id, source and parameter mapping.
    pub fn derive(id: &str, source: &str, params: &ParamMap) -> Self {
        let canonical = canonical_params(params);
        let mut material = String::with_capacity(id.len() + source.len() + canonical.len() + 2);
        material.push_str(id);
        material.push(FIELD_SEPARATOR);
        material.push_str(source);
        material.push(FIELD_SEPARATOR);
        material.push_str(&canonical);

        let digest = sha256_hex(material.as_bytes());
        let key = Self(format!("{KEY_NAMESPACE}{}", &digest[..KEY_DIGEST_LEN]));
        tracing::debug!(query_id = id, source, cache_key = %key, "derived cache key");
        key
    }

    /// Key for an effective spec.
    pub fn for_spec(spec: &QuerySpec) -> Self {
        Self::derive(&spec.id, &spec.source, &spec.params)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
