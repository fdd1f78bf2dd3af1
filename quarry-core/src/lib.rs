//! QUARRY Core - Data Model
//!
//! Query specifications, result rows, the error taxonomy and runtime
//! configuration shared by every Quarry crate. The freshness verifier and
//! parameter canonicalization live here too since they are pure functions
//! over these types.

pub mod canonical;
pub mod config;
pub mod error;
pub mod freshness;
pub mod overrides;
pub mod result;
pub mod scalar;
pub mod spec;

pub use canonical::{canonical_params, sha256_hex};
pub use config::{
    transform_trace_enabled, CacheBackendKind, QuarryConfig, DEFAULT_COMPRESSION_THRESHOLD,
    DEFAULT_TTL_SECS, MAX_TTL_SECS, MIN_TTL_SECS,
};
pub use error::{
    ConfigError, ConnectorError, ErrorKind, FreshnessError, OverrideError, QuarryError,
    QuarryResult, RegistryError, StoreError, TransformError,
};
pub use freshness::{
    parse_timestamp, resolve_as_of, verify_freshness, AsOf, AsOfSource, FRESHNESS_PARSE_ERROR,
    FRESHNESS_SLA_VIOLATION,
};
pub use overrides::{OverrideParams, ALLOWED_OVERRIDE_KEYS};
pub use result::{FreshnessInfo, Provenance, QueryResult};
pub use scalar::{row, Row, Scalar};
pub use spec::{ParamMap, QueryConstraints, QuerySpec, SpecOverride, TransformStep};
