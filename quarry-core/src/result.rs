//! Query results and their provenance / freshness metadata

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::scalar::Row;

/// Where a result's data came from and under what license.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// Connector kind that produced the rows (e.g. "csv").
    pub source_kind: String,
    /// Dataset identifier within that source.
    pub dataset_id: String,
    /// Locator of the dataset relative to its source root.
    pub locator: String,
    /// Columns present in the raw connector output.
    #[serde(default)]
    pub fields: Vec<String>,
    /// License string; "unspecified" when the dataset declares none.
    pub license: String,
}

/// Freshness metadata computed by the verifier.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FreshnessInfo {
    /// Explicit as-of signal as declared by the connector, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_as_of: Option<String>,
    /// Resolved as-of date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
    /// Age in whole days relative to the evaluation instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_days: Option<i64>,
}

/// The value produced by resolving a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    /// Semantic unit label, e.g. "percent".
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub rows: Vec<Row>,
    pub provenance: Provenance,
    #[serde(default)]
    pub freshness: FreshnessInfo,
    /// Human-readable warnings, append-only while the result is processed.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl QueryResult {
    /// Create an empty result for a query.
    pub fn new(query_id: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            query_id: query_id.into(),
            unit: String::new(),
            rows: Vec::new(),
            provenance,
            freshness: FreshnessInfo::default(),
            warnings: Vec::new(),
        }
    }

    /// Append a warning.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
