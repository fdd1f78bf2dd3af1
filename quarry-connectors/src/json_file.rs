//! JSON dataset connector

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use quarry_core::{ConnectorError, QuerySpec, Row};

use crate::files::{
    apply_year_filter, file_provenance, read_dataset, resolve_dataset_path, string_param,
    AS_OF_PARAM, DEFAULT_MAX_BYTES, UNIT_PARAM,
};
use crate::{Connector, ConnectorOutput};

/// Source name answered by [`JsonFileConnector`].
pub const JSON_SOURCE: &str = "json";

/// Accepted dataset document shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDataset {
    Rows(Vec<Row>),
    Document {
        rows: Vec<Row>,
        #[serde(default)]
        as_of: Option<String>,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        license: Option<String>,
    },
}

/// Reads a JSON file named by the spec's `path` parameter. The file holds
/// either an array of flat row objects or an object with `rows` and
/// optional `as_of`, `unit` and `license` fields. Values declared in the
/// file take precedence over spec parameters.
#[derive(Debug, Clone)]
pub struct JsonFileConnector {
    data_dir: PathBuf,
    max_bytes: usize,
}

impl JsonFileConnector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Set the file size limit.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

fn field_names(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[async_trait]
impl Connector for JsonFileConnector {
    fn source(&self) -> &str {
        JSON_SOURCE
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<ConnectorOutput, ConnectorError> {
        let (path, locator) = resolve_dataset_path(&self.data_dir, spec)?;
        let content = read_dataset(&path, self.max_bytes, spec, JSON_SOURCE).await?;
        let dataset: JsonDataset =
            serde_json::from_slice(&content).map_err(|e| ConnectorError::MalformedData {
                query_id: spec.id.clone(),
                reason: format!("expected an array of flat rows or a rows document: {e}"),
            })?;

        let (rows, as_of, unit, license) = match dataset {
            JsonDataset::Rows(rows) => (rows, None, None, None),
            JsonDataset::Document {
                rows,
                as_of,
                unit,
                license,
            } => (rows, as_of, unit, license),
        };
        let fields = field_names(&rows);
        let rows = apply_year_filter(rows, spec);
        tracing::debug!(query_id = %spec.id, locator = %locator, rows = rows.len(), "json dataset read");

        Ok(ConnectorOutput {
            rows,
            provenance: file_provenance(JSON_SOURCE, spec, locator, fields, license.as_deref()),
            unit: unit
                .or_else(|| string_param(spec, UNIT_PARAM).map(str::to_string))
                .unwrap_or_default(),
            as_of: as_of.or_else(|| string_param(spec, AS_OF_PARAM).map(str::to_string)),
        })
    }
}
