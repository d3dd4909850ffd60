//! Build Orchestrator
//!
//! Runs every entity of a tank through insert-rule expansion and the exporter
//! for its kind, and collects the documents into an [`OutputPackage`].
//!
//! Entities are processed one at a time in tank order. Nothing here fails the
//! build as a whole: fatal exporter errors drop one entity and are reported as
//! diagnostics like everything else.

use super::codesystem_exporter::CodeSystemExporter;
use super::instance_exporter::InstanceExporter;
use super::package::{ExportedResource, OutputPackage, PushOutcome};
use crate::ast::{Entity, EntityKind};
use crate::canonical::Fishable;
use crate::config::NoriConfig;
use crate::diagnostics::{
    Diagnostic, DiagnosticCollector, DiagnosticKind, DiagnosticSink, Severity,
};
use crate::error::{ExportError, NoriError};
use crate::semantic::{RuleSet, RuleSetExpander};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static FHIR_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-.]{1,64}$").expect("FHIR id regex is valid"));

static FSH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9_]{0,254}$").expect("FSH name regex is valid"));

/// Entities in source order plus the rule sets they may insert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tank {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub rule_sets: Vec<RuleSet>,
}

impl Tank {
    /// Read a tank from YAML or JSON (JSON is valid YAML)
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| NoriError::io_error(path, e))?;
        Self::from_yaml(&contents).map_err(|e| {
            NoriError::config_error(format!("Cannot read tank {}: {}", path.display(), e))
        })
    }
}

/// Build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Number of code systems exported
    pub code_systems: usize,
    /// Number of instances exported
    pub instances: usize,
    /// Entities not exported because their name was already taken
    pub skipped: usize,
    /// Number of errors encountered
    pub errors: usize,
    /// Number of warnings encountered
    pub warnings: usize,
}

impl BuildStats {
    /// Total number of resources generated
    pub fn total_resources(&self) -> usize {
        self.code_systems + self.instances
    }

    /// Whether the build had any errors
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Whether the build had any warnings
    pub fn has_warnings(&self) -> bool {
        self.warnings > 0
    }
}

/// Build result
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub package: OutputPackage,
    /// Every diagnostic, in report order
    pub diagnostics: Vec<Diagnostic>,
    pub stats: BuildStats,
}

/// Build orchestrator
///
/// Per entity:
/// 1. Skip it if its name was already exported for its kind
/// 2. Check its id and name
/// 3. Expand insert rules
/// 4. Export with the exporter for its kind
/// 5. Add the document to the package, checking for duplicate ids
pub struct BuildOrchestrator<'a, F: Fishable + ?Sized> {
    fisher: &'a F,
    config: NoriConfig,
}

impl<'a, F: Fishable + ?Sized> BuildOrchestrator<'a, F> {
    pub fn new(fisher: &'a F, config: NoriConfig) -> Self {
        Self { fisher, config }
    }

    pub fn config(&self) -> &NoriConfig {
        &self.config
    }

    /// Export every entity of `tank`
    pub fn build(&self, tank: &Tank) -> BuildResult {
        info!("Exporting {} entities", tank.entities.len());

        let mut expander = RuleSetExpander::new();
        for rule_set in &tank.rule_sets {
            expander.register_ruleset(rule_set.clone());
        }

        let mut diagnostics = DiagnosticCollector::new();
        let mut package = OutputPackage::new();
        let mut stats = BuildStats::default();

        for entity in &tank.entities {
            if package.contains_name(entity.kind, &entity.name) {
                debug!(
                    "Skipping {} {}: a {} with this name was already exported",
                    entity.kind, entity.name, entity.kind
                );
                stats.skipped += 1;
                continue;
            }

            validate_identity(entity, &mut diagnostics);

            let (rules, failures) = expander.expand_rules(entity.rules.clone());
            for (location, err) in failures {
                diagnostics.report(Diagnostic::error(
                    DiagnosticKind::RuleSet,
                    err.to_string(),
                    location,
                ));
            }
            let expanded = Entity {
                rules,
                ..entity.clone()
            };

            let document = match self.export_entity(&expanded, &mut diagnostics) {
                Ok(document) => document,
                Err(err) => {
                    warn!("Failed to export {} {}: {}", entity.kind, entity.name, err);
                    diagnostics.report(Diagnostic::from_export_error(&err, &entity.location));
                    continue;
                }
            };

            let resource = ExportedResource {
                kind: entity.kind,
                name: entity.name.clone(),
                id: entity.id().to_string(),
                document,
                location: entity.location.clone(),
            };
            let file_name = resource.file_name();
            match package.push(resource) {
                PushOutcome::Added => {}
                PushOutcome::DuplicateName => {
                    debug!("{} {} was already exported", entity.kind, entity.name);
                    continue;
                }
                PushOutcome::DuplicateId { existing } => {
                    diagnostics.report(Diagnostic::error(
                        DiagnosticKind::DuplicateIdentity,
                        format!(
                            "Multiple {} resources with id {}: {} and {}. Each resource must have a unique id",
                            entity.kind,
                            entity.id(),
                            existing,
                            entity.name
                        ),
                        entity.location.clone(),
                    ));
                }
            }

            match entity.kind {
                EntityKind::CodeSystem => stats.code_systems += 1,
                EntityKind::Instance => stats.instances += 1,
            }
            debug!("Exported {} {} as {}", entity.kind, entity.name, file_name);
        }

        stats.errors = diagnostics.count_severity(Severity::Error);
        stats.warnings = diagnostics.count_severity(Severity::Warning);

        info!(
            "Generated {} resources: {} codesystems, {} instances",
            stats.total_resources(),
            stats.code_systems,
            stats.instances
        );
        if stats.errors > 0 || stats.warnings > 0 {
            warn!("Build had {} errors and {} warnings", stats.errors, stats.warnings);
        }

        BuildResult {
            package,
            diagnostics: diagnostics.into_diagnostics(),
            stats,
        }
    }

    fn export_entity(
        &self,
        entity: &Entity,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Value, ExportError> {
        match entity.kind {
            EntityKind::CodeSystem => {
                CodeSystemExporter::new(self.fisher, &self.config.canonical)
                    .with_version(self.config.version.clone())
                    .with_status(self.config.status.clone())
                    .export(entity, sink)
            }
            EntityKind::Instance => InstanceExporter::new(self.fisher).export(entity, sink),
        }
    }
}

/// Warn about ids and names the generated resources would carry badly
fn validate_identity(entity: &Entity, sink: &mut dyn DiagnosticSink) {
    let id = entity.id();
    if !FHIR_ID.is_match(id) {
        sink.report(Diagnostic::warning(
            DiagnosticKind::InvalidId,
            format!(
                "The string \"{}\" does not represent a valid FHIR id. FHIR ids only allow ASCII letters (A-Z, a-z), numbers (0-9), dashes (-), and dots (.), with a length limit of 64 characters",
                id
            ),
            entity.location.clone(),
        ));
    }

    // Only code systems carry their FSH name into the resource
    if entity.kind == EntityKind::CodeSystem && !FSH_NAME.is_match(&entity.name) {
        sink.report(Diagnostic::warning(
            DiagnosticKind::InvalidName,
            format!(
                "The string \"{}\" does not represent a valid FHIR name. Names should start with an uppercase ASCII letter and contain only letters, numbers, and underscores",
                entity.name
            ),
            entity.location.clone(),
        ));
    }
}
