//! CodeSystem Exporter
//!
//! Exports FSH CodeSystem entities to FHIR CodeSystem resources (JSON).
//!
//! # Overview
//!
//! Rules are applied in a fixed order regardless of where they appear in the
//! source:
//! 1. Metadata (id, url, version, name, title, description, status, content)
//! 2. Caret rules on the CodeSystem itself (`* ^publisher = "..."`)
//! 3. Concept rules, building the concept hierarchy (`* #parent #child "Child"`)
//! 4. Caret rules on individual concepts (`* #parent #child ^designation[+].value = "..."`)
//! 5. Count reconciliation for complete code systems
//!
//! Failures in a single rule are reported and the rule is skipped; only a
//! missing CodeSystem definition aborts the export.
//!
//! # Example
//!
//! ```rust,no_run
//! use nori_core::ast::{ConceptRule, Entity, Rule};
//! use nori_core::canonical::SchemaRegistry;
//! use nori_core::diagnostics::DiagnosticCollector;
//! use nori_core::export::CodeSystemExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemaRegistry::with_builtins()?;
//! let exporter = CodeSystemExporter::new(&registry, "http://example.org/fhir");
//!
//! let entity = Entity::code_system("MyCodes")
//!     .with_rule(Rule::Concept(ConceptRule::new("a").with_display("A")));
//! let mut diagnostics = DiagnosticCollector::new();
//! let resource = exporter.export(&entity, &mut diagnostics)?;
//! println!("{}", serde_json::to_string_pretty(&resource)?);
//! # Ok(())
//! # }
//! ```

use super::concepts::ConceptForest;
use super::document;
use super::fhir_types::CodeSystemResource;
use super::{assign_path, report_rule_error};
use crate::ast::{CaretValueRule, CodeCaretValueRule, ConceptRule, Entity, EntityKind, Rule};
use crate::canonical::{FhirType, Fishable, StructureSchema};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::ExportError;
use crate::semantic::{PathResolver, SoftIndexResolver};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// CodeSystem Exporter
// ============================================================================

/// Exports FSH CodeSystem entities to FHIR CodeSystem resources
pub struct CodeSystemExporter<'a, F: Fishable + ?Sized> {
    /// Definitions the rule paths are resolved against
    fisher: &'a F,
    /// Base URL for codesystem canonical URLs
    canonical: String,
    /// Version from config
    version: Option<String>,
    /// Status from config (draft | active | retired | unknown)
    status: Option<String>,
}

impl<'a, F: Fishable + ?Sized> CodeSystemExporter<'a, F> {
    /// Create a new codesystem exporter
    pub fn new(fisher: &'a F, canonical: impl Into<String>) -> Self {
        Self {
            fisher,
            canonical: canonical.into().trim_end_matches('/').to_string(),
            version: None,
            status: None,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }

    /// Export a CodeSystem entity to a FHIR resource (JSON)
    ///
    /// Rule-level problems go to `sink`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The entity is not a CodeSystem
    /// - No CodeSystem definition is available
    pub fn export(
        &self,
        entity: &Entity,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Value, ExportError> {
        if entity.kind != EntityKind::CodeSystem {
            return Err(ExportError::InapplicableRule {
                entity_kind: entity.kind.to_string(),
                rule: "CodeSystem export".to_string(),
            });
        }
        debug!("Exporting CodeSystem: {}", entity.name);

        let schema = self.code_system_schema()?;
        let resource = self.metadata(entity);

        let mut rules = entity.rules.clone();
        let skipped: HashSet<usize> = SoftIndexResolver::new()
            .resolve(&mut rules)
            .into_iter()
            .map(|(index, err)| {
                report_rule_error(sink, &err, rules[index].location());
                index
            })
            .collect();

        let mut carets: Vec<&CaretValueRule> = Vec::new();
        let mut concepts: Vec<&ConceptRule> = Vec::new();
        let mut code_carets: Vec<&CodeCaretValueRule> = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            if skipped.contains(&index) {
                continue;
            }
            match rule {
                Rule::CaretValue(r) => carets.push(r),
                Rule::Concept(r) => concepts.push(r),
                Rule::CodeCaretValue(r) => code_carets.push(r),
                Rule::Assignment(_)
                | Rule::Card(_)
                | Rule::Flag(_)
                | Rule::Binding(_)
                | Rule::Contains(_)
                | Rule::Insert(_) => {
                    let err = ExportError::InapplicableRule {
                        entity_kind: EntityKind::CodeSystem.to_string(),
                        rule: rule.to_string(),
                    };
                    report_rule_error(sink, &err, rule.location());
                }
            }
        }
        debug!(
            "Processing {} caret, {} concept and {} concept caret rules for CodeSystem {}",
            carets.len(),
            concepts.len(),
            code_carets.len(),
            entity.name
        );

        let resolver = PathResolver::new(self.fisher);
        let mut doc = resource.to_document();

        for rule in carets {
            if let Err(err) = assign_path(&resolver, &schema, &mut doc, &rule.path, &rule.value) {
                report_rule_error(sink, &err, &rule.location);
            }
        }

        // concepts that caret rules left malformed stay as written
        let (mut forest, malformed) = match ConceptForest::from_document(&doc) {
            Ok(forest) => (forest, None),
            Err(err) => (ConceptForest::new(), Some(err)),
        };
        if let Some(err) = &malformed
            && concepts.is_empty()
        {
            report_rule_error(sink, err, &entity.location);
        }
        for rule in concepts {
            let inserted = match &malformed {
                Some(err) => Err(err.clone()),
                None => forest.insert(rule, &entity.name),
            };
            if let Err(err) = inserted {
                report_rule_error(sink, &err, &rule.location);
            }
        }
        if malformed.is_none()
            && let Err(err) = forest.write_to(&mut doc)
        {
            report_rule_error(sink, &err, &entity.location);
        }

        for rule in code_carets {
            let applied = forest.translate_code_path(&rule.codes).and_then(|concept_path| {
                let path = concept_path.join(&rule.path);
                trace!("Concept caret rule on {} resolves to {}", rule.codes.join(" "), path);
                assign_path(&resolver, &schema, &mut doc, &path, &rule.value)
            });
            if let Err(err) = applied {
                report_rule_error(sink, &err, &rule.location);
            }
        }

        self.reconcile_count(entity, &mut doc, &forest, sink);
        document::strip_slice_markers(&mut doc);

        debug!("Successfully exported CodeSystem {}", entity.name);
        Ok(doc)
    }

    fn code_system_schema(&self) -> Result<Arc<StructureSchema>, ExportError> {
        self.fisher
            .fish_for_schema("CodeSystem", &[FhirType::Resource])
            .ok_or_else(|| ExportError::UnresolvableSchema {
                type_name: "CodeSystem".to_string(),
                kind: FhirType::Resource.display_name().to_string(),
            })
    }

    /// Metadata every exported CodeSystem starts from
    fn metadata(&self, entity: &Entity) -> CodeSystemResource {
        let id = entity.id();
        let url = format!("{}/CodeSystem/{}", self.canonical, id);
        let status = self.status.as_deref().unwrap_or("draft");

        let mut resource = CodeSystemResource::new(id, url, &entity.name, status);
        resource.version = self.version.clone();
        resource.title = entity.title.clone();
        resource.description = entity.description.clone();
        resource
    }

    /// Fill in or check `count` once all concepts are known
    fn reconcile_count(
        &self,
        entity: &Entity,
        doc: &mut Value,
        forest: &ConceptForest,
        sink: &mut dyn DiagnosticSink,
    ) {
        if doc.get("content").and_then(Value::as_str) != Some("complete") {
            trace!("Skipping count for {}: content is not complete", entity.name);
            return;
        }

        // Concept caret rules may have added nested concepts of their own
        let computed = ConceptForest::from_document(doc)
            .map(|f| f.count())
            .unwrap_or_else(|_| forest.count());

        match doc.get("count").and_then(Value::as_u64) {
            None if computed > 0 => set_count(doc, computed),
            None => {}
            Some(explicit) if explicit != u64::from(computed) => {
                sink.report(Diagnostic::warning(
                    DiagnosticKind::CountMismatch,
                    format!(
                        "The user-specified ^count ({}) does not match the specified number of concepts ({}) in CodeSystem {}",
                        explicit, computed, entity.name
                    ),
                    entity.location.clone(),
                ));
            }
            Some(_) => {}
        }
    }
}

/// Insert `count` ahead of `concept` so the output keeps FHIR element order
fn set_count(doc: &mut Value, count: u32) {
    if let Some(object) = doc.as_object_mut() {
        let concepts = object.shift_remove("concept");
        object.insert("count".to_string(), Value::from(count));
        if let Some(concepts) = concepts {
            object.insert("concept".to_string(), concepts);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
