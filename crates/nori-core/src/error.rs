//! Error types for FSH export operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for nori operations outside of rule application
#[derive(Debug, Error)]
pub enum NoriError {
    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system I/O errors
    #[error("IO error for path '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Definition loading errors (malformed StructureDefinitions)
    #[error("Definition error in '{source_name}': {message}")]
    DefinitionError {
        source_name: String,
        message: String,
    },
}

impl NoriError {
    /// Check if this error is recoverable (processing of other inputs can continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NoriError::DefinitionError { .. })
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Create a definition loading error
    pub fn definition_error(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DefinitionError {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for NoriError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Errors raised while applying an entity's rules to its document.
///
/// Everything except [`ExportError::UnresolvableSchema`] is scoped to a single
/// rule (or a single concept) and is reported as a diagnostic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExportError {
    #[error("Cannot find definition for {type_name} ({kind})")]
    UnresolvableSchema { type_name: String, kind: String },

    #[error("Cannot resolve element '{segment}' of path '{path}' in {type_name}")]
    UnresolvablePath {
        path: String,
        segment: String,
        type_name: String,
    },

    #[error("Cannot assign {actual} to '{path}': expected {expected}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot add concept '{code}': ancestor '{ancestor}' was not found")]
    MissingAncestor { code: String, ancestor: String },

    #[error("Concept '{code}' is already defined in {code_system}")]
    DuplicateConcept { code: String, code_system: String },

    #[error("Cannot resolve soft index in '{path}': {reason}")]
    SoftIndex { path: String, reason: String },

    #[error("Cannot set '{path}': {reason}")]
    PathConflict { path: String, reason: String },

    #[error("Rule is not applicable to {entity_kind}: {rule}")]
    InapplicableRule { entity_kind: String, rule: String },

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),
}

impl ExportError {
    /// Fatal errors abort the current entity; all others skip one rule.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExportError::UnresolvableSchema { .. } | ExportError::MissingRequiredField(_)
        )
    }

    pub fn unresolvable_path(
        path: impl Into<String>,
        segment: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::UnresolvablePath {
            path: path.into(),
            segment: segment.into(),
            type_name: type_name.into(),
        }
    }

    pub fn path_conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_export_errors() {
        let schema = ExportError::UnresolvableSchema {
            type_name: "Patiant".to_string(),
            kind: "Resource".to_string(),
        };
        assert!(schema.is_fatal());
        assert!(ExportError::MissingRequiredField("url".to_string()).is_fatal());

        let path = ExportError::unresolvable_path("name.nickname", "nickname", "Patient");
        assert!(!path.is_fatal());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(NoriError::definition_error("Basic.json", "missing snapshot").is_recoverable());
        assert!(!NoriError::config_error("canonical is required").is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!NoriError::io_error("defs", io).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = ExportError::path_conflict("name", "expected an array");
        assert_eq!(err.to_string(), "Cannot set 'name': expected an array");

        let err = NoriError::definition_error("Basic.json", "missing snapshot");
        assert_eq!(
            err.to_string(),
            "Definition error in 'Basic.json': missing snapshot"
        );
    }
}
