//! Shared helpers for file-backed connectors
//!
//! Dataset files are addressed by a `path` parameter relative to the
//! connector's data root. Absolute paths and parent-directory components
//! are refused before the filesystem is touched.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use quarry_core::{ConnectorError, Provenance, QuerySpec, Row, Scalar};

/// Largest dataset file a connector will read.
pub const DEFAULT_MAX_BYTES: usize = 16 * 1024 * 1024;

/// Parameter naming the dataset file.
pub const PATH_PARAM: &str = "path";
/// Optional parameter overriding the dataset identifier.
pub const DATASET_ID_PARAM: &str = "dataset_id";
/// Optional parameter declaring the dataset license.
pub const LICENSE_PARAM: &str = "license";
/// Optional parameter declaring the unit label.
pub const UNIT_PARAM: &str = "unit";
/// Optional parameter declaring an explicit as-of value.
pub const AS_OF_PARAM: &str = "as_of";
/// Parameter and column used for year filtering.
pub const YEAR_PARAM: &str = "year";

/// License recorded when a dataset declares none.
pub const UNSPECIFIED_LICENSE: &str = "unspecified";

fn malformed(spec: &QuerySpec, reason: impl Into<String>) -> ConnectorError {
    ConnectorError::MalformedData {
        query_id: spec.id.clone(),
        reason: reason.into(),
    }
}

/// String parameter from the effective spec, if present.
pub fn string_param<'a>(spec: &'a QuerySpec, key: &str) -> Option<&'a str> {
    spec.params.get(key).and_then(|value| value.as_str())
}

/// Resolve the spec's `path` parameter under `root`.
///
/// Returns the full path and the relative locator recorded in provenance.
pub fn resolve_dataset_path(
    root: &Path,
    spec: &QuerySpec,
) -> Result<(PathBuf, String), ConnectorError> {
    let raw = string_param(spec, PATH_PARAM)
        .ok_or_else(|| malformed(spec, "missing string parameter 'path'"))?;
    let relative = Path::new(raw);
    if relative.as_os_str().is_empty() {
        return Err(malformed(spec, "dataset path is empty"));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(malformed(spec, "dataset path escapes the data directory"))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(malformed(spec, "dataset path must be relative"))
            }
        }
    }
    Ok((root.join(relative), raw.to_string()))
}

/// Read a dataset file, enforcing `max_bytes`.
pub async fn read_dataset(
    path: &Path,
    max_bytes: usize,
    spec: &QuerySpec,
    source: &str,
) -> Result<Vec<u8>, ConnectorError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        IoErrorKind::NotFound => ConnectorError::DatasetNotFound {
            query_id: spec.id.clone(),
        },
        _ => ConnectorError::Unavailable {
            source_name: source.to_string(),
            reason: e.to_string(),
        },
    })?;
    if !metadata.is_file() {
        return Err(ConnectorError::DatasetNotFound {
            query_id: spec.id.clone(),
        });
    }
    if metadata.len() > max_bytes as u64 {
        return Err(malformed(
            spec,
            format!("dataset exceeds size limit of {max_bytes} bytes"),
        ));
    }
    tokio::fs::read(path)
        .await
        .map_err(|e| ConnectorError::Unavailable {
            source_name: source.to_string(),
            reason: e.to_string(),
        })
}

/// Keep rows whose `year` matches the spec's `year` parameter.
///
/// Only applies when the parameter is set and at least one row carries a
/// `year` column; datasets without a year dimension pass through.
pub fn apply_year_filter(rows: Vec<Row>, spec: &QuerySpec) -> Vec<Row> {
    let Some(year) = spec.params.get(YEAR_PARAM).and_then(Scalar::from_json) else {
        return rows;
    };
    let Some(year) = year.coerce_i64() else {
        return rows;
    };
    if !rows.iter().any(|row| row.contains_key(YEAR_PARAM)) {
        return rows;
    }
    rows.into_iter()
        .filter(|row| {
            row.get(YEAR_PARAM)
                .and_then(Scalar::coerce_i64)
                .is_some_and(|value| value == year)
        })
        .collect()
}

/// Provenance for a file-backed dataset.
pub fn file_provenance(
    source_kind: &str,
    spec: &QuerySpec,
    locator: String,
    fields: Vec<String>,
    declared_license: Option<&str>,
) -> Provenance {
    Provenance {
        source_kind: source_kind.to_string(),
        dataset_id: string_param(spec, DATASET_ID_PARAM)
            .unwrap_or(&spec.id)
            .to_string(),
        locator,
        fields,
        license: declared_license
            .or_else(|| string_param(spec, LICENSE_PARAM))
            .unwrap_or(UNSPECIFIED_LICENSE)
            .to_string(),
    }
}
