//! Spec file parsing
//!
//! One query per file. The format is chosen by extension; files with any
//! other extension are not spec files and are skipped by the registry.

use std::path::Path;

use quarry_core::{QuerySpec, RegistryError};

/// Serialization formats accepted for spec files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Json,
    Toml,
}

impl SpecFormat {
    /// Format implied by a path's extension, if it is a spec file at all.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> RegistryError {
    RegistryError::Malformed {
        file: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Parse spec text in the given format.
pub fn parse_spec(text: &str, format: SpecFormat) -> Result<QuerySpec, String> {
    match format {
        SpecFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        SpecFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        SpecFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
    }
}

/// Read and parse one spec file, checking the fields every spec needs.
pub fn load_spec_file(path: &Path, format: SpecFormat) -> Result<QuerySpec, RegistryError> {
    let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let spec = parse_spec(&text, format).map_err(|reason| malformed(path, reason))?;

    if spec.id.trim().is_empty() {
        return Err(malformed(path, "'id' must be a non-empty string"));
    }
    if spec.source.trim().is_empty() {
        return Err(malformed(path, "'source' must be a non-empty string"));
    }
    if let Some(step) = spec.postprocess.iter().find(|step| step.name.trim().is_empty()) {
        return Err(malformed(
            path,
            format!("postprocess step with empty name (params: {:?})", step.params),
        ));
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SpecFormat::from_path(Path::new("q.yaml")), Some(SpecFormat::Yaml));
        assert_eq!(SpecFormat::from_path(Path::new("q.YML")), Some(SpecFormat::Yaml));
        assert_eq!(SpecFormat::from_path(Path::new("q.json")), Some(SpecFormat::Json));
        assert_eq!(SpecFormat::from_path(Path::new("q.toml")), Some(SpecFormat::Toml));
        assert_eq!(SpecFormat::from_path(Path::new("README.md")), None);
        assert_eq!(SpecFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_parse_all_formats_agree() {
        let yaml = r#"
id: q_demo
source: csv
params:
  year: 2023
postprocess:
  - name: top_n
    params:
      sort_key: value
      n: 2
constraints:
  freshness_sla_days: 400
"#;
        let json_text = r#"{
  "id": "q_demo", "source": "csv", "params": {"year": 2023},
  "postprocess": [{"name": "top_n", "params": {"sort_key": "value", "n": 2}}],
  "constraints": {"freshness_sla_days": 400}
}"#;
        let toml_text = r#"
id = "q_demo"
source = "csv"

[params]
year = 2023

[[postprocess]]
name = "top_n"
params = { sort_key = "value", n = 2 }

[constraints]
freshness_sla_days = 400
"#;
        let from_yaml = parse_spec(yaml, SpecFormat::Yaml).expect("yaml spec");
        let from_json = parse_spec(json_text, SpecFormat::Json).expect("json spec");
        let from_toml = parse_spec(toml_text, SpecFormat::Toml).expect("toml spec");

        assert_eq!(from_yaml, from_json);
        assert_eq!(from_json, from_toml);
        assert_eq!(from_yaml.params["year"], json!(2023));
        assert_eq!(from_yaml.postprocess[0].params["n"], json!(2));
    }

    #[test]
    fn test_missing_required_key() {
        assert!(parse_spec("source: csv\n", SpecFormat::Yaml).is_err());
    }
}
