//! Whitelisted per-call parameter overrides
//!
//! Callers may adjust a query through a small fixed set of keys. Anything
//! else is dropped before it can reach the effective spec, which keeps the
//! parameter space (and therefore the cache key space) bounded.

use serde_json::Value;
use std::time::Duration;

use crate::error::OverrideError;
use crate::spec::{ParamMap, SpecOverride};

/// Year filter passed through to connectors.
pub const OVERRIDE_YEAR: &str = "year";
/// Connector timeout for this call, in seconds.
pub const OVERRIDE_TIMEOUT_S: &str = "timeout_s";
/// Maximum number of rows returned after the pipeline has run.
pub const OVERRIDE_LIMIT: &str = "limit";
/// Columns to scale to percent with an extra `to_percent` step appended
/// after the spec's own pipeline.
pub const OVERRIDE_PERCENT_COLUMNS: &str = "percent_columns";

/// Every key accepted by [`OverrideParams::from_map`].
pub const ALLOWED_OVERRIDE_KEYS: [&str; 4] = [
    OVERRIDE_YEAR,
    OVERRIDE_TIMEOUT_S,
    OVERRIDE_LIMIT,
    OVERRIDE_PERCENT_COLUMNS,
];

/// Validated override parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverrideParams {
    pub year: Option<i64>,
    /// Connector timeout from `timeout_s`.
    pub timeout: Option<Duration>,
    pub limit: Option<u64>,
    pub percent_columns: Option<Vec<String>>,
}

impl OverrideParams {
    /// Filter and validate a raw override mapping.
    ///
    /// Keys outside [`ALLOWED_OVERRIDE_KEYS`] are silently dropped. A
    /// whitelisted key carrying a malformed value is an error. `null` values
    /// are treated as absent.
    pub fn from_map(raw: &ParamMap) -> Result<Self, OverrideError> {
        let mut parsed = Self::default();
        for (key, value) in raw {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                OVERRIDE_YEAR => parsed.year = Some(parse_year(value)?),
                OVERRIDE_TIMEOUT_S => parsed.timeout = Some(parse_timeout(value)?),
                OVERRIDE_LIMIT => parsed.limit = Some(parse_limit(value)?),
                OVERRIDE_PERCENT_COLUMNS => {
                    parsed.percent_columns = Some(parse_columns(value)?)
                }
                other => {
                    tracing::debug!(key = other, "dropping non-whitelisted override");
                }
            }
        }
        Ok(parsed)
    }

    /// True when no override is set.
    pub fn is_empty(&self) -> bool {
        self.year.is_none()
            && self.timeout.is_none()
            && self.limit.is_none()
            && self.percent_columns.is_none()
    }

    /// Convert into a spec override. `year`, `limit` and `percent_columns`
    /// become params of the effective spec and so take part in cache key
    /// derivation; the timeout does not.
    pub fn into_spec_override(self) -> SpecOverride {
        let mut spec_override = SpecOverride::default();
        if let Some(year) = self.year {
            spec_override
                .params
                .insert(OVERRIDE_YEAR.to_string(), Value::from(year));
        }
        if let Some(limit) = self.limit {
            spec_override
                .params
                .insert(OVERRIDE_LIMIT.to_string(), Value::from(limit));
        }
        if let Some(columns) = self.percent_columns {
            spec_override
                .params
                .insert(OVERRIDE_PERCENT_COLUMNS.to_string(), Value::from(columns));
        }
        spec_override.connector_timeout = self.timeout;
        spec_override
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> OverrideError {
    OverrideError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_year(value: &Value) -> Result<i64, OverrideError> {
    let year = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match year {
        Some(y) if (1..=9999).contains(&y) => Ok(y),
        _ => Err(invalid(OVERRIDE_YEAR, "expected a four-digit year")),
    }
}

fn parse_timeout(value: &Value) -> Result<Duration, OverrideError> {
    let timeout = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    timeout
        .filter(|t| *t > 0.0)
        .and_then(|t| Duration::try_from_secs_f64(t).ok())
        .ok_or_else(|| invalid(OVERRIDE_TIMEOUT_S, "expected a positive number of seconds"))
}

fn parse_limit(value: &Value) -> Result<u64, OverrideError> {
    let limit = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    limit.ok_or_else(|| invalid(OVERRIDE_LIMIT, "expected a non-negative integer"))
}

fn parse_columns(value: &Value) -> Result<Vec<String>, OverrideError> {
    let Value::Array(items) = value else {
        return Err(invalid(OVERRIDE_PERCENT_COLUMNS, "expected an array of column names"));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(OVERRIDE_PERCENT_COLUMNS, "column names must be strings"))
        })
        .collect()
}
