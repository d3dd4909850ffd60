//! Diagnostic types and the sink that exporters report through

use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A diagnostic produced while exporting entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// What went wrong, in machine-readable form
    pub kind: DiagnosticKind,
    /// Severity level of the diagnostic
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Location of the rule or entity that caused it
    pub location: Location,
}

/// Severity levels for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational messages
    Info,
    /// Hints for improvements
    Hint,
    /// Warnings that should be addressed
    Warning,
    /// Errors that must be fixed
    Error,
}

/// Diagnostic categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    UnresolvableSchema,
    UnresolvablePath,
    TypeMismatch,
    MissingAncestor,
    DuplicateConcept,
    SoftIndex,
    PathConflict,
    DuplicateIdentity,
    CountMismatch,
    InapplicableRule,
    RuleSet,
    InvalidId,
    InvalidName,
    MissingRequiredField,
}

/// Location information for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// File path (empty when unknown)
    pub file: PathBuf,
    /// Line number (1-based, 0 when unknown)
    pub line: usize,
    /// Column number (1-based, 0 when unknown)
    pub column: usize,
}

impl Location {
    /// Create a new location
    pub fn new(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Whether any position information is present
    pub fn is_known(&self) -> bool {
        self.line > 0 || !self.file.as_os_str().is_empty()
    }
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(
        kind: DiagnosticKind,
        severity: Severity,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            location,
        }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>, location: Location) -> Self {
        Self::new(kind, Severity::Error, message, location)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, location: Location) -> Self {
        Self::new(kind, Severity::Warning, message, location)
    }

    /// Build a diagnostic from an export error raised at `location`
    pub fn from_export_error(err: &ExportError, location: &Location) -> Self {
        let (kind, severity) = match err {
            ExportError::UnresolvableSchema { .. } => {
                (DiagnosticKind::UnresolvableSchema, Severity::Error)
            }
            ExportError::UnresolvablePath { .. } => {
                (DiagnosticKind::UnresolvablePath, Severity::Error)
            }
            ExportError::TypeMismatch { .. } => (DiagnosticKind::TypeMismatch, Severity::Error),
            ExportError::MissingAncestor { .. } => {
                (DiagnosticKind::MissingAncestor, Severity::Error)
            }
            ExportError::DuplicateConcept { .. } => {
                (DiagnosticKind::DuplicateConcept, Severity::Error)
            }
            ExportError::SoftIndex { .. } => (DiagnosticKind::SoftIndex, Severity::Error),
            ExportError::PathConflict { .. } => (DiagnosticKind::PathConflict, Severity::Error),
            ExportError::InapplicableRule { .. } => {
                (DiagnosticKind::InapplicableRule, Severity::Warning)
            }
            ExportError::MissingRequiredField(_) => {
                (DiagnosticKind::MissingRequiredField, Severity::Error)
            }
        };
        Self::new(kind, severity, err.to_string(), location.clone())
    }
}

/// Receiver for diagnostics raised during export
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Collects diagnostics in report order
#[derive(Debug, Default, Clone)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn count_severity(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn count_kind(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count_severity(Severity::Error) > 0
    }
}

impl DiagnosticSink for DiagnosticCollector {
    fn report(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(
            "{} at {}: {}",
            diagnostic.severity,
            diagnostic.location,
            diagnostic.message
        );
        self.diagnostics.push(diagnostic);
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Hint => write!(f, "hint"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}
