//! In-memory connector with fixed datasets
//!
//! Used for embedded reference data and in tests. Datasets are keyed by
//! query id and registered before the connector is shared.

use async_trait::async_trait;
use std::collections::BTreeMap;

use quarry_core::{ConnectorError, Provenance, QuerySpec, Row};

use crate::files::{apply_year_filter, UNSPECIFIED_LICENSE};
use crate::{Connector, ConnectorOutput};

/// Rows and metadata served for one query id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StaticDataset {
    pub rows: Vec<Row>,
    pub unit: String,
    pub as_of: Option<String>,
    pub license: Option<String>,
}

impl StaticDataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_as_of(mut self, as_of: impl Into<String>) -> Self {
        self.as_of = Some(as_of.into());
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }
}

/// Serves registered datasets under an arbitrary source name.
#[derive(Debug, Clone)]
pub struct StaticConnector {
    source: String,
    datasets: BTreeMap<String, StaticDataset>,
}

impl StaticConnector {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            datasets: BTreeMap::new(),
        }
    }

    /// Register the dataset served for `query_id`.
    pub fn with_dataset(mut self, query_id: impl Into<String>, dataset: StaticDataset) -> Self {
        self.datasets.insert(query_id.into(), dataset);
        self
    }

    /// Register bare rows for `query_id`.
    pub fn with_rows(self, query_id: impl Into<String>, rows: Vec<Row>) -> Self {
        self.with_dataset(query_id, StaticDataset::new(rows))
    }
}

#[async_trait]
impl Connector for StaticConnector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<ConnectorOutput, ConnectorError> {
        let dataset = self
            .datasets
            .get(&spec.id)
            .ok_or_else(|| ConnectorError::DatasetNotFound {
                query_id: spec.id.clone(),
            })?;

        let fields = dataset
            .rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Ok(ConnectorOutput {
            rows: apply_year_filter(dataset.rows.clone(), spec),
            provenance: Provenance {
                source_kind: self.source.clone(),
                dataset_id: spec.id.clone(),
                locator: format!("memory://{}/{}", self.source, spec.id),
                fields,
                license: dataset
                    .license
                    .clone()
                    .unwrap_or_else(|| UNSPECIFIED_LICENSE.to_string()),
            },
            unit: dataset.unit.clone(),
            as_of: dataset.as_of.clone(),
        })
    }
}
