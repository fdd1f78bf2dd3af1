//! QUARRY Registry - Query Specifications
//!
//! Loads every spec file in a directory once, then serves independent
//! copies. Nothing handed out by the registry aliases its own storage, so a
//! caller merging overrides into a spec can never affect another caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quarry_core::{QuerySpec, RegistryError};

pub mod loader;

pub use loader::{load_spec_file, parse_spec, SpecFormat};

/// Origin label for specs registered in memory.
const IN_MEMORY_ORIGIN: &str = "<memory>";

/// Immutable collection of query specs keyed by id.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    specs: BTreeMap<String, QuerySpec>,
    origins: BTreeMap<String, PathBuf>,
}

impl QueryRegistry {
    /// Load every spec file in `dir`.
    ///
    /// Files are visited in name order. The first malformed or unreadable
    /// file aborts the load, as does an id declared by two files (both are
    /// named in the error). Non-spec files and subdirectories are skipped.
    pub fn load_all(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(RegistryError::MissingDirectory {
                path: dir.display().to_string(),
            });
        }

        let io_error = |e: std::io::Error| RegistryError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut registry = Self::default();
        for path in paths {
            let Some(format) = SpecFormat::from_path(&path) else {
                tracing::debug!(path = %path.display(), "skipping non-spec file");
                continue;
            };
            let spec = load_spec_file(&path, format)?;
            registry.insert(spec, path)?;
        }

        tracing::info!(
            dir = %dir.display(),
            queries = registry.len(),
            "loaded query specs"
        );
        Ok(registry)
    }

    /// Build a registry from specs held in memory.
    pub fn from_specs(specs: impl IntoIterator<Item = QuerySpec>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for spec in specs {
            registry.insert(spec, PathBuf::from(IN_MEMORY_ORIGIN))?;
        }
        Ok(registry)
    }

    fn insert(&mut self, spec: QuerySpec, origin: PathBuf) -> Result<(), RegistryError> {
        if let Some(first) = self.origins.get(&spec.id) {
            return Err(RegistryError::DuplicateId {
                id: spec.id,
                first: first.display().to_string(),
                second: origin.display().to_string(),
            });
        }
        self.origins.insert(spec.id.clone(), origin);
        self.specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Independent copy of the spec for `id`.
    pub fn get(&self, id: &str) -> Result<QuerySpec, RegistryError> {
        self.specs
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// Sorted ids of every registered query.
    pub fn all_ids(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    /// File the spec for `id` was loaded from.
    pub fn origin(&self, id: &str) -> Option<&Path> {
        self.origins.get(id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
