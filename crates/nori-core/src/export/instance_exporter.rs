//! Instance Exporter
//!
//! Exports FSH Instance entities to FHIR resources (JSON).
//!
//! The document starts as `{resourceType, id}` for the type named by
//! `InstanceOf`; assignment rules are then soft-indexed, resolved against that
//! definition and applied in source order. Instances of profiles also get the
//! profile URL in `meta.profile`.

use super::document;
use super::{assign_path, report_rule_error};
use crate::ast::{Entity, EntityKind, Rule};
use crate::canonical::{FhirType, Fishable, StructureSchema};
use crate::diagnostics::DiagnosticSink;
use crate::error::ExportError;
use crate::semantic::{PathResolver, SoftIndexResolver};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Kinds of definition an instance may be created from
const INSTANCE_OF_TYPES: &[FhirType] = &[
    FhirType::Resource,
    FhirType::Profile,
    FhirType::Extension,
    FhirType::Type,
    FhirType::Logical,
];

/// Exports FSH Instance entities
pub struct InstanceExporter<'a, F: Fishable + ?Sized> {
    fisher: &'a F,
}

impl<'a, F: Fishable + ?Sized> InstanceExporter<'a, F> {
    pub fn new(fisher: &'a F) -> Self {
        Self { fisher }
    }

    /// Export an Instance entity
    ///
    /// # Errors
    ///
    /// Returns error if the entity has no `InstanceOf` or its definition cannot be found.
    pub fn export(
        &self,
        entity: &Entity,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Value, ExportError> {
        let instance_of = entity
            .parent
            .as_deref()
            .ok_or_else(|| ExportError::MissingRequiredField("InstanceOf".to_string()))?;
        debug!("Exporting Instance {} of {}", entity.name, instance_of);

        let schema = self
            .fisher
            .fish_for_schema(instance_of, INSTANCE_OF_TYPES)
            .ok_or_else(|| ExportError::UnresolvableSchema {
                type_name: instance_of.to_string(),
                kind: FhirType::describe(INSTANCE_OF_TYPES),
            })?;

        let mut doc = json!({
            "resourceType": schema.type_name,
            "id": entity.id(),
        });
        set_profile(&mut doc, &schema);

        let mut rules = entity.rules.clone();
        let skipped: HashSet<usize> = SoftIndexResolver::new()
            .resolve(&mut rules)
            .into_iter()
            .map(|(index, err)| {
                report_rule_error(sink, &err, rules[index].location());
                index
            })
            .collect();

        let resolver = PathResolver::new(self.fisher);
        for (index, rule) in rules.iter().enumerate() {
            if skipped.contains(&index) {
                continue;
            }
            match rule {
                Rule::Assignment(r) => {
                    trace!("Applying {} to Instance {}", rule, entity.name);
                    if let Err(err) = assign_path(&resolver, &schema, &mut doc, &r.path, &r.value)
                    {
                        report_rule_error(sink, &err, &r.location);
                    }
                }
                Rule::CaretValue(_)
                | Rule::Concept(_)
                | Rule::CodeCaretValue(_)
                | Rule::Card(_)
                | Rule::Flag(_)
                | Rule::Binding(_)
                | Rule::Contains(_)
                | Rule::Insert(_) => {
                    let err = ExportError::InapplicableRule {
                        entity_kind: EntityKind::Instance.to_string(),
                        rule: rule.to_string(),
                    };
                    report_rule_error(sink, &err, rule.location());
                }
            }
        }

        document::strip_slice_markers(&mut doc);
        debug!("Successfully exported Instance {}", entity.name);
        Ok(doc)
    }
}

fn set_profile(doc: &mut Value, schema: &Arc<StructureSchema>) {
    if schema.derivation.as_deref() != Some("constraint") {
        return;
    }
    if let Some(url) = &schema.url {
        doc["meta"] = json!({ "profile": [url] });
    }
}
