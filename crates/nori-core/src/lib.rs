//! Nori Core
//!
//! Rule application and path resolution engine for FHIR Shorthand (FSH).
//! Entities arrive as an ordered list of rules; the exporters resolve each
//! rule's path against FHIR definitions, coerce its value, and write it into
//! the JSON document being built.

pub mod ast;
pub mod canonical;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod result;
pub mod semantic;

pub use ast::{Entity, EntityKind, Rule, Value};
pub use canonical::{FhirType, Fishable, SchemaRegistry, StructureSchema};
pub use config::{ConfigError, NoriConfig};
pub use diagnostics::{
    Diagnostic, DiagnosticCollector, DiagnosticKind, DiagnosticSink, Location, Severity,
};
pub use error::{ExportError, NoriError};
pub use export::{
    BuildOrchestrator, BuildResult, BuildStats, CodeSystemExporter, InstanceExporter,
    OutputPackage, Tank,
};
pub use result::Result;
pub use semantic::{PathExpression, PathResolver, RuleSetExpander, SoftIndexResolver};

/// Initialize the tracing subscriber for logging
pub fn init_tracing() {
    init_tracing_with("nori=info");
}

/// Initialize tracing with `default_filter` unless `RUST_LOG` is set
pub fn init_tracing_with(default_filter: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
