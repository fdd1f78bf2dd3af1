//! QUARRY Connectors - Dataset Collaborators
//!
//! A connector turns an effective [`QuerySpec`] into raw rows plus base
//! provenance. Connectors are registered by the `source` name specs refer
//! to; the access layer looks them up through [`ConnectorRegistry`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use quarry_core::{ConnectorError, Provenance, QuerySpec, Row};

pub mod csv_file;
pub mod files;
pub mod fixed;
pub mod json_file;

pub use csv_file::CsvConnector;
pub use files::DEFAULT_MAX_BYTES;
pub use fixed::{StaticConnector, StaticDataset};
pub use json_file::JsonFileConnector;

// ============================================================================
// CONNECTOR TRAIT
// ============================================================================

/// Raw output of a connector call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectorOutput {
    pub rows: Vec<Row>,
    pub provenance: Provenance,
    /// Semantic unit label, empty when the dataset declares none.
    pub unit: String,
    /// Explicit as-of signal, verbatim.
    pub as_of: Option<String>,
}

/// Source of rows for one or more queries.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source name this connector answers, matched against `QuerySpec::source`.
    fn source(&self) -> &str;

    /// Fetch the rows for an effective spec.
    async fn fetch(&self, spec: &QuerySpec) -> Result<ConnectorOutput, ConnectorError>;
}

// ============================================================================
// CONNECTOR REGISTRY
// ============================================================================

/// Connectors keyed by source name.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the file-backed connectors rooted at `data_dir`.
    pub fn with_file_connectors(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let mut registry = Self::new();
        registry.register(Arc::new(CsvConnector::new(data_dir.clone())));
        registry.register(Arc::new(JsonFileConnector::new(data_dir)));
        registry
    }

    /// Register a connector under its source name, replacing any previous
    /// connector for that source.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let source = connector.source().to_string();
        if self.connectors.insert(source.clone(), connector).is_some() {
            tracing::debug!(source = %source, "replaced connector");
        }
    }

    /// Builder form of [`ConnectorRegistry::register`].
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    /// Look up the connector for a source.
    pub fn get(&self, source: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(source)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownSource {
                source_name: source.to_string(),
            })
    }

    /// Registered source names, sorted.
    pub fn sources(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source() {
        let registry = ConnectorRegistry::with_file_connectors("/tmp/quarry-data");
        assert_eq!(registry.sources(), vec!["csv".to_string(), "json".to_string()]);
        assert!(registry.get("csv").is_ok());
        assert!(matches!(
            registry.get("bigquery"),
            Err(ConnectorError::UnknownSource { source_name }) if source_name == "bigquery"
        ));
    }

    #[test]
    fn test_register_replaces() {
        let registry = ConnectorRegistry::new()
            .with_connector(Arc::new(StaticConnector::new("demo")))
            .with_connector(Arc::new(StaticConnector::new("demo")));
        assert_eq!(registry.sources(), vec!["demo".to_string()]);
    }
}
