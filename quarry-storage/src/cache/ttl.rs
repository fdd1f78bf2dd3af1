//! TTL policy.
//!
//! Stores only accept a [`ClampedTtl`], and the only way to obtain one is
//! through [`TtlPolicy`]. A write with an unclamped TTL does not compile.

use std::time::Duration;

use quarry_core::{DEFAULT_TTL_SECS, MAX_TTL_SECS, MIN_TTL_SECS};

/// A TTL already clamped into the accepted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClampedTtl {
    secs: i64,
}

impl ClampedTtl {
    pub fn as_secs(&self) -> i64 {
        self.secs
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs.unsigned_abs())
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.secs)
    }
}

/// Resolves caller TTLs against a default and the `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    default_secs: i64,
    min_secs: i64,
    max_secs: i64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            default_secs: DEFAULT_TTL_SECS,
            min_secs: MIN_TTL_SECS,
            max_secs: MAX_TTL_SECS,
        }
    }
}

impl TtlPolicy {
    /// Policy with a custom default; bounds stay fixed.
    pub fn with_default(default_secs: i64) -> Self {
        Self {
            default_secs,
            ..Self::default()
        }
    }

    /// Resolve a caller TTL.
    ///
    /// `None` uses the default. A value `<= 0` disables caching for the call
    /// and yields `None`. Anything else is clamped, never rejected.
    pub fn resolve(&self, requested: Option<i64>) -> Option<ClampedTtl> {
        let secs = requested.unwrap_or(self.default_secs);
        if secs <= 0 {
            return None;
        }
        Some(ClampedTtl {
            secs: secs.clamp(self.min_secs, self.max_secs),
        })
    }
}
