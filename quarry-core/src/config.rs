//! Runtime configuration
//!
//! Configuration is loaded from environment variables with defaults that
//! work for local development. The transform trace toggle is special: it is
//! read once per process and never re-evaluated.

use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default TTL applied when a caller does not specify one.
pub const DEFAULT_TTL_SECS: i64 = 300;
/// Lower TTL bound in seconds.
pub const MIN_TTL_SECS: i64 = 60;
/// Upper TTL bound in seconds (one day).
pub const MAX_TTL_SECS: i64 = 86_400;
/// Serialized payloads larger than this are gzip-compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 8 * 1024;

/// Environment variable controlling transform trace capture.
pub const TRANSFORM_TRACE_ENV: &str = "QUARRY_TRANSFORM_TRACE";

static TRANSFORM_TRACE: Lazy<bool> = Lazy::new(|| {
    std::env::var(TRANSFORM_TRACE_ENV)
        .map(|v| parse_bool(&v))
        .unwrap_or(false)
});

/// Whether transform trace entries are appended to result warnings.
/// Evaluated on first call and cached for the life of the process.
pub fn transform_trace_enabled() -> bool {
    *TRANSFORM_TRACE
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Which cache store backs the access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Process-local concurrent map.
    Memory,
    /// LMDB environment shared by every process that opens the same path.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

/// Quarry runtime configuration.
#[derive(Debug, Clone)]
pub struct QuarryConfig {
    /// Directory scanned for query spec files.
    pub spec_dir: PathBuf,
    /// Root directory for file-backed connectors.
    pub data_dir: PathBuf,
    /// TTL used when the caller passes none.
    pub default_ttl_secs: i64,
    /// Payloads strictly larger than this many bytes are compressed.
    pub compression_threshold_bytes: usize,
    /// Append `transform:<step>` entries to result warnings.
    pub trace_transforms: bool,
    /// Bound on a single connector call.
    pub connector_timeout: Duration,
    /// Bound on a single cache store operation.
    pub store_timeout: Duration,
    pub cache_backend: CacheBackendKind,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            spec_dir: PathBuf::from("queries"),
            data_dir: PathBuf::from("data"),
            default_ttl_secs: DEFAULT_TTL_SECS,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
            trace_transforms: false,
            connector_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(2),
            cache_backend: CacheBackendKind::Memory,
        }
    }
}

impl QuarryConfig {
    /// Create QuarryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `QUARRY_SPEC_DIR`: query spec directory (default: ./queries)
    /// - `QUARRY_DATA_DIR`: connector data root (default: ./data)
    /// - `QUARRY_DEFAULT_TTL_SECS`: default TTL (default: 300)
    /// - `QUARRY_COMPRESSION_THRESHOLD`: bytes before compression (default: 8192)
    /// - `QUARRY_TRANSFORM_TRACE`: "1"/"true"/"yes"/"on" (default: off)
    /// - `QUARRY_CONNECTOR_TIMEOUT_MS`: connector bound (default: 30000)
    /// - `QUARRY_STORE_TIMEOUT_MS`: cache store bound (default: 2000)
    /// - `QUARRY_CACHE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `QUARRY_LMDB_PATH`: LMDB directory (default: ./.quarry-cache)
    /// - `QUARRY_LMDB_MAX_MB`: LMDB map size (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let spec_dir = std::env::var("QUARRY_SPEC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.spec_dir);
        let data_dir = std::env::var("QUARRY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let default_ttl_secs =
            env_parse("QUARRY_DEFAULT_TTL_SECS")?.unwrap_or(defaults.default_ttl_secs);
        let compression_threshold_bytes = env_parse("QUARRY_COMPRESSION_THRESHOLD")?
            .unwrap_or(defaults.compression_threshold_bytes);

        let connector_timeout = env_parse::<u64>("QUARRY_CONNECTOR_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.connector_timeout);
        let store_timeout = env_parse::<u64>("QUARRY_STORE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);

        let cache_backend = match std::env::var("QUARRY_CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => CacheBackendKind::Memory,
            "lmdb" => CacheBackendKind::Lmdb {
                path: std::env::var("QUARRY_LMDB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(".quarry-cache")),
                max_size_mb: env_parse("QUARRY_LMDB_MAX_MB")?.unwrap_or(256),
            },
            other => {
                return Err(ConfigError::UnsupportedBackend {
                    backend: other.to_string(),
                })
            }
        };

        let config = Self {
            spec_dir,
            data_dir,
            default_ttl_secs,
            compression_threshold_bytes,
            trace_transforms: transform_trace_enabled(),
            connector_timeout,
            store_timeout,
            cache_backend,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the access layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_threshold_bytes == 0 {
            return Err(invalid_value(
                "compression_threshold_bytes",
                "0",
                "must be greater than zero",
            ));
        }
        if self.connector_timeout.is_zero() {
            return Err(invalid_value("connector_timeout", "0", "must be greater than zero"));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid_value("store_timeout", "0", "must be greater than zero"));
        }
        if let CacheBackendKind::Lmdb { max_size_mb, .. } = self.cache_backend {
            if max_size_mb == 0 {
                return Err(invalid_value("lmdb_max_size_mb", "0", "must be greater than zero"));
            }
            if max_size_mb.checked_mul(1024 * 1024).is_none() {
                return Err(invalid_value(
                    "lmdb_max_size_mb",
                    &max_size_mb.to_string(),
                    "map size overflows",
                ));
            }
        }
        Ok(())
    }

    /// Set the spec directory.
    pub fn with_spec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec_dir = dir.into();
        self
    }

    /// Set the connector data root.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Enable or disable transform tracing.
    pub fn with_trace_transforms(mut self, enabled: bool) -> Self {
        self.trace_transforms = enabled;
        self
    }

    /// Set the compression threshold.
    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = bytes;
        self
    }

    /// Set the connector timeout.
    pub fn with_connector_timeout(mut self, timeout: Duration) -> Self {
        self.connector_timeout = timeout;
        self
    }

    /// Set the cache store backend.
    pub fn with_cache_backend(mut self, backend: CacheBackendKind) -> Self {
        self.cache_backend = backend;
        self
    }
}

fn invalid_value(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid_value(name, &raw, "could not be parsed")),
        Err(_) => Ok(None),
    }
}
