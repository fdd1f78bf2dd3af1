//! CSV dataset connector

use async_trait::async_trait;
use std::path::PathBuf;

use quarry_core::{ConnectorError, QuerySpec, Row, Scalar};

use crate::files::{
    apply_year_filter, file_provenance, read_dataset, resolve_dataset_path, string_param,
    AS_OF_PARAM, DEFAULT_MAX_BYTES, UNIT_PARAM,
};
use crate::{Connector, ConnectorOutput};

/// Source name answered by [`CsvConnector`].
pub const CSV_SOURCE: &str = "csv";

/// Reads a headered CSV file named by the spec's `path` parameter.
///
/// Cell types are inferred per cell: empty cells are null, numbers and
/// booleans are recognized, everything else is a string.
#[derive(Debug, Clone)]
pub struct CsvConnector {
    data_dir: PathBuf,
    max_bytes: usize,
}

impl CsvConnector {
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

/// Parse CSV content into header names and rows.
pub fn parse_csv(content: &[u8]) -> Result<(Vec<String>, Vec<Row>), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(content);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), Scalar::infer(cell)))
            .collect();
        rows.push(row);
    }
    Ok((headers, rows))
}

#[async_trait]
impl Connector for CsvConnector {
    fn source(&self) -> &str {
        CSV_SOURCE
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<ConnectorOutput, ConnectorError> {
        let (path, locator) = resolve_dataset_path(&self.data_dir, spec)?;
        let content = read_dataset(&path, self.max_bytes, spec, CSV_SOURCE).await?;
        let (fields, rows) = parse_csv(&content).map_err(|e| ConnectorError::MalformedData {
            query_id: spec.id.clone(),
            reason: e.to_string(),
        })?;
        let rows = apply_year_filter(rows, spec);
        tracing::debug!(query_id = %spec.id, locator = %locator, rows = rows.len(), "csv dataset read");

        Ok(ConnectorOutput {
            rows,
            provenance: file_provenance(CSV_SOURCE, spec, locator, fields, None),
            unit: string_param(spec, UNIT_PARAM).unwrap_or_default().to_string(),
            as_of: string_param(spec, AS_OF_PARAM).map(str::to_string),
        })
    }
}
