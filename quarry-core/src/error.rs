//! Error types for Quarry operations

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Registry errors. Load-time variants are fatal and operator-facing, so
/// they name the offending files.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("query not found: {id}")]
    NotFound { id: String },

    #[error("duplicate query id '{id}' declared in {first} and {second}")]
    DuplicateId {
        id: String,
        first: String,
        second: String,
    },

    #[error("malformed spec file {file}: {reason}")]
    Malformed { file: String, reason: String },

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("spec directory does not exist: {path}")]
    MissingDirectory { path: String },
}

/// Connector failures. Timeouts, missing data and malformed data stay
/// distinguishable all the way to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("connector '{source_name}' timed out after {timeout:?}")]
    Timeout {
        source_name: String,
        timeout: Duration,
    },

    #[error("no connector registered for source '{source_name}'")]
    UnknownSource { source_name: String },

    #[error("dataset not found for query '{query_id}'")]
    DatasetNotFound { query_id: String },

    #[error("malformed data for query '{query_id}': {reason}")]
    MalformedData { query_id: String, reason: String },

    #[error("connector '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },
}

/// Transform pipeline failures. All of them abort the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("unknown transform step '{name}' at position {position}; valid steps: {}", .valid.join(", "))]
    UnknownStep {
        name: String,
        position: usize,
        valid: Vec<String>,
    },

    #[error("invalid parameters for transform step '{step}' at position {position}: {reason}")]
    InvalidParams {
        step: String,
        position: usize,
        reason: String,
    },
}

/// Freshness configuration errors. Parse failures and SLA violations are
/// warnings, not errors; only an invalid SLA declaration lands here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FreshnessError {
    #[error("freshness_invalid_sla: freshness_sla_days must be a non-negative number, got {value}")]
    InvalidSla { value: String },
}

/// Malformed per-call override parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("invalid override '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Cache store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("cache store {operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("cache store backend failure: {reason}")]
    Backend { reason: String },

    #[error("corrupt cache payload: {reason}")]
    Corrupt { reason: String },

    #[error("failed to encode cache payload: {reason}")]
    Encode { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported cache backend: {backend}")]
    UnsupportedBackend { backend: String },
}

/// Stable, enumerable error kinds exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Timeout,
    Internal,
}

/// Master error type for all Quarry errors.
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Freshness error: {0}")]
    Freshness(#[from] FreshnessError),

    #[error("Override error: {0}")]
    Override(#[from] OverrideError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl QuarryError {
    /// Classify the error into the per-request taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(RegistryError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Registry(_) => ErrorKind::Internal,
            Self::Connector(ConnectorError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Connector(
                ConnectorError::UnknownSource { .. } | ConnectorError::DatasetNotFound { .. },
            ) => ErrorKind::NotFound,
            Self::Connector(ConnectorError::MalformedData { .. }) => ErrorKind::Validation,
            Self::Connector(ConnectorError::Unavailable { .. }) => ErrorKind::Internal,
            Self::Transform(_) | Self::Freshness(_) | Self::Override(_) => ErrorKind::Validation,
            Self::Store(StoreError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Store(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand to external callers.
    ///
    /// Validation and not-found messages are already free of paths and store
    /// internals. Everything classified as internal collapses to a fixed text.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => match self {
                Self::Registry(e) => e.to_string(),
                Self::Connector(e) => e.to_string(),
                Self::Transform(e) => e.to_string(),
                Self::Freshness(e) => e.to_string(),
                Self::Override(e) => e.to_string(),
                Self::Store(e) => e.to_string(),
                Self::Config(e) => e.to_string(),
            },
        }
    }

    /// Shorthand for a registry not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::Registry(RegistryError::NotFound { id: id.into() })
    }
}

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
