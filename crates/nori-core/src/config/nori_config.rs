//! Project configuration parser (nori-config.yaml)
//!
//! Only the metadata the exporters stamp onto generated resources is read;
//! unknown keys are ignored so an existing IG configuration file can be reused.
//!
//! ## Example Configuration
//!
//! ```yaml
//! canonical: http://example.org/fhir/example-ig
//! fhirVersion: 4.0.1
//! id: example.fhir.ig
//! name: ExampleIG
//! version: 1.0.0
//! status: draft
//! publisher: Example Organization
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "nori-config.yaml";

/// Keys that may be overridden from the command line
pub const OVERRIDABLE_KEYS: &[&str] = &["version", "status", "canonical"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoriConfig {
    /// Canonical URL generated resources live under (required)
    pub canonical: String,

    /// FHIR version(s) - can be single string or array
    #[serde(default, deserialize_with = "deserialize_fhir_version")]
    pub fhir_version: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Business version stamped onto code systems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Publication status (draft | active | retired | unknown)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

fn deserialize_fhir_version<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FhirVersionValue {
        Single(String),
        Multiple(Vec<String>),
    }

    match FhirVersionValue::deserialize(deserializer)? {
        FhirVersionValue::Single(s) => Ok(vec![s]),
        FhirVersionValue::Multiple(v) => {
            if v.is_empty() {
                Err(D::Error::custom("fhirVersion array cannot be empty"))
            } else {
                Ok(v)
            }
        }
    }
}

impl NoriConfig {
    /// Configuration with only a canonical URL, for callers without a config file
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            fhir_version: vec!["4.0.1".to_string()],
            id: None,
            name: None,
            version: None,
            status: None,
            publisher: None,
        }
    }

    /// Load nori-config.yaml from file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;

        Self::from_yaml(&contents)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Parse nori-config.yaml from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.canonical.is_empty() {
            errors.push("canonical is required".to_string());
        } else if !self.canonical.starts_with("http://") && !self.canonical.starts_with("https://")
        {
            errors.push(format!("canonical must be a valid URL: {}", self.canonical));
        }

        for version in &self.fhir_version {
            if !is_valid_fhir_version(version) {
                errors.push(format!("invalid FHIR version: {}", version));
            }
        }

        if let Some(status) = &self.status
            && !is_valid_status(status)
        {
            errors.push(format!(
                "invalid status: {} (must be draft, active, retired, or unknown)",
                status
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors))
        }
    }

    /// Apply a `key:value` override from the command line
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "version" => self.version = Some(value.to_string()),
            "status" => self.status = Some(value.to_string()),
            "canonical" => self.canonical = value.to_string(),
            _ => return Err(ConfigError::UnknownOverride(key.to_string())),
        }
        Ok(())
    }
}

fn is_valid_status(status: &str) -> bool {
    matches!(status, "draft" | "active" | "retired" | "unknown")
}

/// Validate FHIR version string
fn is_valid_fhir_version(version: &str) -> bool {
    // Accept major.minor or major.minor.patch
    let parts: Vec<&str> = version.split('.').collect();
    matches!(parts.len(), 2 | 3) && parts.iter().all(|p| p.parse::<u32>().is_ok())
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {0}: {1}")]
    IoError(std::path::PathBuf, std::io::Error),

    #[error("Parse error in {0}: {1}")]
    ParseError(std::path::PathBuf, String),

    #[error("Validation errors: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("Cannot override '{0}' (supported: version, status, canonical)")]
    UnknownOverride(String),
}

impl From<ConfigError> for crate::NoriError {
    fn from(err: ConfigError) -> Self {
        crate::NoriError::config_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config() {
        let yaml = r#"
canonical: http://example.org/fhir/example-ig
fhirVersion: 4.0.1
"#;

        let config = NoriConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.canonical, "http://example.org/fhir/example-ig");
        assert_eq!(config.fhir_version, vec!["4.0.1"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_ignores_unknown_keys() {
        let yaml = r#"
canonical: http://example.org/fhir/example-ig
fhirVersion: 4.0.1
id: example.fhir.ig
name: ExampleIG
version: 1.0.0
status: active
publisher: Example Organization
dependencies:
  hl7.fhir.us.core: 5.0.1
"#;

        let config = NoriConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.id.as_deref(), Some("example.fhir.ig"));
        assert_eq!(config.version.as_deref(), Some("1.0.0"));
        assert_eq!(config.status.as_deref(), Some("active"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_multiple_fhir_versions() {
        let yaml = r#"
canonical: http://example.org/fhir/example-ig
fhirVersion:
  - 4.0.1
  - 4.3.0
"#;

        let config = NoriConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.fhir_version, vec!["4.0.1", "4.3.0"]);
    }

    #[test]
    fn test_missing_canonical_fails_to_parse() {
        assert!(NoriConfig::from_yaml("fhirVersion: 4.0.1\n").is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = NoriConfig::new("example.org");
        config.status = Some("invalid-status".to_string());
        config.fhir_version = vec!["4".to_string()];

        let Err(ConfigError::ValidationError(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("canonical")));
        assert!(errors.iter().any(|e| e.contains("status")));
    }

    #[test]
    fn test_overrides() {
        let mut config = NoriConfig::new("http://example.org");
        config.apply_override("version", "2.0.0").unwrap();
        config.apply_override("status", "retired").unwrap();
        config
            .apply_override("canonical", "http://other.org/fhir")
            .unwrap();

        assert_eq!(config.version.as_deref(), Some("2.0.0"));
        assert_eq!(config.status.as_deref(), Some("retired"));
        assert_eq!(config.canonical, "http://other.org/fhir");
        assert!(matches!(
            config.apply_override("publisher", "x"),
            Err(ConfigError::UnknownOverride(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "canonical: http://example.org/fhir\nversion: 0.1.0").unwrap();

        let config = NoriConfig::from_file(file.path()).unwrap();
        assert_eq!(config.version.as_deref(), Some("0.1.0"));
        assert!(config.fhir_version.is_empty());
    }

    #[test]
    fn test_is_valid_fhir_version() {
        assert!(is_valid_fhir_version("4.0.1"));
        assert!(is_valid_fhir_version("4.0"));
        assert!(!is_valid_fhir_version("4"));
        assert!(!is_valid_fhir_version("invalid"));
        assert!(!is_valid_fhir_version("4.0.1.2"));
    }
}
