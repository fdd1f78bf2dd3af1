//! QUARRY Test Utilities
//!
//! Centralized test infrastructure for the Quarry workspace:
//! - Proptest generators for rows, parameters and results
//! - Mock connectors for counting and failing fetches
//! - Test fixtures for the demo query and spec directories
//! - Custom assertions for error kinds

pub use quarry_connectors::{Connector, ConnectorOutput, ConnectorRegistry, StaticConnector, StaticDataset};
pub use quarry_core::{
    row, ConnectorError, ErrorKind, ParamMap, Provenance, QuarryError, QuarryResult, QueryResult,
    QuerySpec, Row, Scalar, TransformStep,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MOCK CONNECTORS
// ============================================================================

/// Connector wrapper that counts fetches and can delay them.
#[derive(Debug)]
pub struct CountingConnector {
    inner: StaticConnector,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingConnector {
    pub fn new(inner: StaticConnector) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    fn source(&self) -> &str {
        self.inner.source()
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<ConnectorOutput, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.fetch(spec).await
    }
}

/// Connector that always fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingConnector {
    source: String,
    error: ConnectorError,
}

impl FailingConnector {
    pub fn new(source: impl Into<String>, error: ConnectorError) -> Self {
        Self {
            source: source.into(),
            error,
        }
    }
}

#[async_trait]
impl Connector for FailingConnector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, _spec: &QuerySpec) -> Result<ConnectorOutput, ConnectorError> {
        Err(self.error.clone())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Quarry values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a Scalar of any variant. Floats are finite.
    pub fn arb_scalar() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            Just(Scalar::Null),
            any::<bool>().prop_map(Scalar::Bool),
            any::<i64>().prop_map(Scalar::Int),
            (-1.0e9f64..1.0e9f64).prop_map(Scalar::Float),
            "[a-zA-Z0-9 _-]{0,16}".prop_map(Scalar::Str),
        ]
    }

    /// Generate a numeric Scalar.
    pub fn arb_numeric_scalar() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            (-1_000_000i64..1_000_000i64).prop_map(Scalar::Int),
            (-1.0e6f64..1.0e6f64).prop_map(Scalar::Float),
        ]
    }

    /// Generate a row with up to six columns.
    pub fn arb_row() -> impl Strategy<Value = Row> {
        prop::collection::btree_map("[a-z][a-z_]{0,7}", arb_scalar(), 0..6)
    }

    /// Generate rows that all carry a `value` column, sometimes null.
    pub fn arb_valued_rows(max_len: usize) -> impl Strategy<Value = Vec<Row>> {
        prop::collection::vec(
            (
                "[A-Z]{1,3}",
                prop_oneof![4 => arb_numeric_scalar(), 1 => Just(Scalar::Null)],
            )
                .prop_map(|(label, value)| row([("label", Scalar::Str(label)), ("value", value)])),
            0..max_len,
        )
    }

    /// Generate a parameter value as found in spec files.
    pub fn arb_param_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z]{1,8}".prop_map(Value::from),
            prop::collection::vec("[a-z]{1,4}", 0..4).prop_map(Value::from),
        ]
    }

    /// Generate a parameter mapping.
    pub fn arb_param_map() -> impl Strategy<Value = ParamMap> {
        prop::collection::btree_map("[a-z][a-z_]{0,7}", arb_param_value(), 0..6)
    }

    /// Generate a query result with arbitrary rows and warnings.
    pub fn arb_query_result() -> impl Strategy<Value = QueryResult> {
        (
            "q_[a-z]{1,8}",
            prop::collection::vec(arb_row(), 0..40),
            prop::collection::vec("[a-z :_]{1,24}", 0..3),
        )
            .prop_map(|(query_id, rows, warnings)| {
                let mut result = QueryResult::new(
                    query_id.clone(),
                    Provenance {
                        source_kind: "csv".to_string(),
                        dataset_id: query_id,
                        locator: "fixtures/data.csv".to_string(),
                        fields: vec![],
                        license: "CC-BY-4.0".to_string(),
                    },
                );
                result.rows = rows;
                result.warnings = warnings;
                result
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Id of the demo query.
    pub const DEMO_QUERY_ID: &str = "q_demo";

    /// Rows served for the demo query.
    pub fn demo_rows() -> Vec<Row> {
        vec![
            row([("sector", Scalar::from("A")), ("value", Scalar::Int(10))]),
            row([("sector", Scalar::from("B")), ("value", Scalar::Int(30))]),
            row([("sector", Scalar::from("C")), ("value", Scalar::Int(20))]),
        ]
    }

    /// The demo spec: csv source, year 2023, top two rows by value.
    pub fn demo_spec() -> QuerySpec {
        QuerySpec::new(DEMO_QUERY_ID, "csv")
            .with_param("year", json!(2023))
            .with_step(
                TransformStep::new("top_n")
                    .with_param("sort_key", json!("value"))
                    .with_param("n", json!(2)),
            )
    }

    /// Static connector answering the `csv` source with the demo rows.
    pub fn demo_connector() -> StaticConnector {
        StaticConnector::new("csv").with_rows(DEMO_QUERY_ID, demo_rows())
    }

    /// Rows whose serialized form is comfortably above `min_bytes`.
    pub fn bulky_rows(min_bytes: usize) -> Vec<Row> {
        let per_row = 64;
        (0..(min_bytes / per_row + 1))
            .map(|i| {
                let i = i64::try_from(i).unwrap_or(i64::MAX);
                row([
                    ("region", Scalar::Str(format!("region-{:04}", i % 50))),
                    ("year", Scalar::Int(2000 + i % 25)),
                    ("value", Scalar::Float(i as f64 * 1.25)),
                    ("note", Scalar::Str("synthetic fixture row".to_string())),
                ])
            })
            .collect()
    }

    /// Write `spec` as YAML to `dir/file_name`.
    pub fn write_spec_yaml(dir: &Path, file_name: &str, spec: &QuerySpec) -> PathBuf {
        let path = dir.join(file_name);
        let text = serde_yaml::to_string(spec).expect("spec serializes to yaml");
        std::fs::write(&path, text).expect("write spec file");
        path
    }

    /// Write raw text to `dir/file_name`.
    pub fn write_raw(dir: &Path, file_name: &str, text: &str) -> PathBuf {
        let path = dir.join(file_name);
        std::fs::write(&path, text).expect("write file");
        path
    }

    /// Temporary spec directory holding one YAML file per spec.
    pub fn spec_dir(specs: &[QuerySpec]) -> TempDir {
        let dir = TempDir::new().expect("create temp spec dir");
        for spec in specs {
            write_spec_yaml(dir.path(), &format!("{}.yaml", spec.id), spec);
        }
        dir
    }

    /// Connector registry with the demo connector wrapped for counting.
    pub fn counting_demo_registry() -> (ConnectorRegistry, Arc<CountingConnector>) {
        let counting = Arc::new(CountingConnector::new(demo_connector()));
        let registry = ConnectorRegistry::new().with_connector(counting.clone());
        (registry, counting)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Quarry error classification.

    use super::*;

    /// Assert that a result failed with the given error kind.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &QuarryResult<T>, kind: ErrorKind) {
        match result {
            Err(err) => assert_eq!(err.kind(), kind, "wrong error kind for {err:?}"),
            Ok(value) => panic!("Expected {kind:?} error, got Ok: {value:?}"),
        }
    }

    /// Assert that a result is a not-found error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        assert_kind(result, ErrorKind::NotFound);
    }

    /// Assert that a result is a validation error.
    #[track_caller]
    pub fn assert_validation<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        assert_kind(result, ErrorKind::Validation);
    }

    /// Assert that a result is a timeout error.
    #[track_caller]
    pub fn assert_timeout<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        assert_kind(result, ErrorKind::Timeout);
    }
}
