//! Query specifications
//!
//! A [`QuerySpec`] is the registered definition of one named query. Specs are
//! plain owned data: cloning one yields a fully independent copy, which is
//! what the registry hands out on every lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::FreshnessError;
use crate::overrides::{OVERRIDE_LIMIT, OVERRIDE_PERCENT_COLUMNS};

/// Parameter mapping. Values are JSON primitives or arrays.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// One named, parameterized row operation drawn from the transform catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    /// Catalog name of the transform.
    pub name: String,
    /// Step-specific parameters.
    #[serde(default)]
    pub params: ParamMap,
}

impl TransformStep {
    /// Create a step with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: ParamMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Optional constraints attached to a spec.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryConstraints {
    /// Maximum acceptable data age in days.
    ///
    /// Kept as a raw JSON value so a malformed SLA loads fine and is reported
    /// as `freshness_invalid_sla` when the query runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_sla_days: Option<serde_json::Value>,
}

impl QueryConstraints {
    /// Validated SLA in days. `Ok(None)` when no SLA is declared.
    pub fn sla_days(&self) -> Result<Option<f64>, FreshnessError> {
        let Some(raw) = &self.freshness_sla_days else {
            return Ok(None);
        };
        let parsed = match raw {
            serde_json::Value::Null => return Ok(None),
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(days) if days.is_finite() && days >= 0.0 => Ok(Some(days)),
            _ => Err(FreshnessError::InvalidSla {
                value: raw.to_string(),
            }),
        }
    }
}

/// Registered definition of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Unique identifier across the registry.
    pub id: String,
    /// Connector / dataset type that answers this query.
    pub source: String,
    /// Default arguments.
    #[serde(default)]
    pub params: ParamMap,
    /// Ordered transform steps applied to the connector rows.
    #[serde(default)]
    pub postprocess: Vec<TransformStep>,
    #[serde(default)]
    pub constraints: QueryConstraints,
}

impl QuerySpec {
    /// Create a spec with no params, steps or constraints.
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            params: ParamMap::new(),
            postprocess: Vec::new(),
            constraints: QueryConstraints::default(),
        }
    }

    /// Set a default parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Append a transform step.
    pub fn with_step(mut self, step: TransformStep) -> Self {
        self.postprocess.push(step);
        self
    }

    /// Set the freshness SLA.
    pub fn with_sla_days(mut self, days: serde_json::Value) -> Self {
        self.constraints.freshness_sla_days = Some(days);
        self
    }

    /// Produce the effective spec for one call: a copy of `self` with the
    /// override merged on top. `self` is never modified.
    pub fn with_override(&self, spec_override: &SpecOverride) -> QuerySpec {
        let mut effective = self.clone();
        for (key, value) in &spec_override.params {
            effective.params.insert(key.clone(), value.clone());
        }
        effective
    }

    /// The steps the pipeline runs for this spec: the declared `postprocess`
    /// followed by a `to_percent` step when `percent_columns` is set.
    pub fn pipeline_steps(&self) -> Vec<TransformStep> {
        let mut steps = self.postprocess.clone();
        if let Some(columns @ serde_json::Value::Array(_)) =
            self.params.get(OVERRIDE_PERCENT_COLUMNS)
        {
            steps.push(TransformStep::new("to_percent").with_param("columns", columns.clone()));
        }
        steps
    }

    /// Row cap applied after the pipeline, from the `limit` param.
    pub fn row_limit(&self) -> Option<usize> {
        self.params
            .get(OVERRIDE_LIMIT)
            .and_then(|v| v.as_u64())
            .map(|v| usize::try_from(v).unwrap_or(usize::MAX))
    }
}

/// Per-call adjustments merged over a registered spec.
///
/// Only `params` reach the effective spec, so everything that can change a
/// result is captured by the cache key. The connector timeout changes how
/// long we wait, never what comes back, and stays out of the key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecOverride {
    /// Parameters replacing or extending the spec defaults.
    pub params: ParamMap,
    /// Connector timeout for this call only.
    pub connector_timeout: Option<Duration>,
}

impl SpecOverride {
    /// Override that only replaces parameters.
    pub fn with_params(params: ParamMap) -> Self {
        Self {
            params,
            connector_timeout: None,
        }
    }

    /// True when the override changes nothing.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.connector_timeout.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_override_leaves_original_untouched() {
        let spec = QuerySpec::new("q_demo", "csv").with_param("year", json!(2023));
        let spec_override = SpecOverride::with_params(
            [("year".to_string(), json!(2024))].into_iter().collect(),
        );

        let effective = spec.with_override(&spec_override);

        assert_eq!(effective.params["year"], json!(2024));
        assert_eq!(spec.params["year"], json!(2023));
    }

    #[test]
    fn test_pipeline_steps_and_limit() {
        let spec = QuerySpec::new("q", "csv")
            .with_step(TransformStep::new("select").with_param("columns", json!(["a"])))
            .with_param("percent_columns", json!(["a"]))
            .with_param("limit", json!(5));

        let steps = spec.pipeline_steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].name, "to_percent");
        assert_eq!(spec.row_limit(), Some(5));
        assert_eq!(spec.postprocess.len(), 1);
    }

    #[test]
    fn test_sla_days_variants() {
        let mut constraints = QueryConstraints::default();
        assert_eq!(constraints.sla_days().expect("absent is ok"), None);

        constraints.freshness_sla_days = Some(json!(30));
        assert_eq!(constraints.sla_days().expect("number is ok"), Some(30.0));

        constraints.freshness_sla_days = Some(json!("7"));
        assert_eq!(constraints.sla_days().expect("numeric string is ok"), Some(7.0));

        constraints.freshness_sla_days = Some(json!(-1));
        assert!(constraints.sla_days().is_err());

        constraints.freshness_sla_days = Some(json!("soon"));
        assert!(constraints.sla_days().is_err());
    }

    #[test]
    fn test_spec_deserialize_defaults() {
        let spec: QuerySpec =
            serde_json::from_str(r#"{"id": "q", "source": "csv"}"#).expect("spec should parse");
        assert!(spec.params.is_empty());
        assert!(spec.postprocess.is_empty());
        assert!(spec.constraints.freshness_sla_days.is_none());
    }
}
