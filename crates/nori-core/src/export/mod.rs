//! FHIR Export Module
//!
//! Turns FSH entities into FHIR JSON documents.
//!
//! ## Modules
//!
//! - `fhir_types` - Typed CodeSystem metadata and concepts
//! - `document` - Applies resolved paths to JSON documents
//! - `concepts` - CodeSystem concept hierarchy
//! - `codesystem_exporter` - Exports FSH CodeSystems
//! - `instance_exporter` - Exports FSH Instances
//! - `package` - Kind-partitioned collection of exported documents
//! - `build` - Build orchestrator over a whole tank

pub mod build;
pub mod codesystem_exporter;
pub mod concepts;
pub mod document;
pub mod fhir_types;
pub mod instance_exporter;
pub mod package;

pub use build::{BuildOrchestrator, BuildResult, BuildStats, Tank};
pub use codesystem_exporter::CodeSystemExporter;
pub use concepts::ConceptForest;
pub use fhir_types::*;
pub use instance_exporter::InstanceExporter;
pub use package::{ExportedResource, OutputPackage, PushOutcome};

use crate::ast::Value as FshValue;
use crate::canonical::{Fishable, StructureSchema};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Location};
use crate::error::ExportError;
use crate::semantic::{PathExpression, PathResolver};
use serde_json::Value;
use std::sync::Arc;

/// Resolve one rule's path and value against `schema` and write it into `doc`
pub(crate) fn assign_path<F: Fishable + ?Sized>(
    resolver: &PathResolver<'_, F>,
    schema: &Arc<StructureSchema>,
    doc: &mut Value,
    path: &PathExpression,
    value: &FshValue,
) -> Result<(), ExportError> {
    let resolved = resolver.resolve(schema, path, value)?;
    document::apply(doc, &resolved.path, resolved.value)
}

pub(crate) fn report_rule_error(
    sink: &mut dyn DiagnosticSink,
    err: &ExportError,
    location: &Location,
) {
    sink.report(Diagnostic::from_export_error(err, location));
}
