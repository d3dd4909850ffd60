//! Concept hierarchy for code systems
//!
//! Concept rules name their ancestors from the top-level concept down to the
//! direct parent. The forest is rebuilt from whatever concepts caret rules may
//! already have written, grown one rule at a time, and written back before
//! per-concept caret rules run.

use crate::ast::ConceptRule;
use crate::error::ExportError;
use crate::export::fhir_types::{CodeSystemConcept, count_concepts_recursive};
use crate::semantic::{PathExpression, PathSegment};
use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConceptForest {
    roots: Vec<CodeSystemConcept>,
}

impl ConceptForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the `concept` element of a CodeSystem document
    pub fn from_document(document: &Value) -> Result<Self, ExportError> {
        let roots = match document.get("concept") {
            None | Some(Value::Null) => Vec::new(),
            Some(concepts) => serde_json::from_value(concepts.clone()).map_err(|e| {
                ExportError::path_conflict(
                    "concept",
                    format!("existing concepts are malformed: {e}"),
                )
            })?,
        };
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[CodeSystemConcept] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of concepts at every depth
    pub fn count(&self) -> u32 {
        count_concepts_recursive(&self.roots)
    }

    /// Whether `code` appears anywhere in the forest
    pub fn contains(&self, code: &str) -> bool {
        fn search(level: &[CodeSystemConcept], code: &str) -> bool {
            level
                .iter()
                .any(|c| c.code == code || search(c.children(), code))
        }
        search(&self.roots, code)
    }

    /// Positional index of each code at its level, or the first code not found
    fn locate<'c>(&self, codes: &'c [String]) -> Result<Vec<usize>, &'c str> {
        let mut level = self.roots.as_slice();
        let mut positions = Vec::with_capacity(codes.len());
        for code in codes {
            let position = level
                .iter()
                .position(|c| c.code == *code)
                .ok_or(code.as_str())?;
            positions.push(position);
            level = level[position].children();
        }
        Ok(positions)
    }

    /// Add the concept a rule describes as the last child of its parent
    pub fn insert(&mut self, rule: &ConceptRule, code_system: &str) -> Result<(), ExportError> {
        if self.contains(&rule.code) {
            return Err(ExportError::DuplicateConcept {
                code: rule.code.clone(),
                code_system: code_system.to_string(),
            });
        }

        let positions = self
            .locate(&rule.ancestors)
            .map_err(|missing| ExportError::MissingAncestor {
                code: rule.code.clone(),
                ancestor: missing.to_string(),
            })?;

        let mut level = &mut self.roots;
        for position in positions {
            level = level[position].concept.get_or_insert_with(Vec::new);
        }

        let mut concept = CodeSystemConcept::new(rule.code.clone());
        concept.display = rule.display.clone();
        concept.definition = rule.definition.clone();
        level.push(concept);

        trace!("Added concept {} under {:?}", rule.code, rule.ancestors);
        Ok(())
    }

    /// Document path of the concept a code chain names: `concept[i].concept[j]`
    pub fn translate_code_path(&self, codes: &[String]) -> Result<PathExpression, ExportError> {
        let positions = self.locate(codes).map_err(|missing| {
            ExportError::unresolvable_path(
                codes.iter().map(|c| format!("#{c}")).collect::<Vec<_>>().join(" "),
                format!("#{missing}"),
                "CodeSystem",
            )
        })?;

        Ok(PathExpression::new(
            positions
                .into_iter()
                .map(|position| PathSegment::indexed("concept", position))
                .collect(),
        ))
    }

    /// Replace the document's `concept` element with this forest
    ///
    /// An empty forest leaves the document alone.
    pub fn write_to(&self, document: &mut Value) -> Result<(), ExportError> {
        if self.roots.is_empty() {
            return Ok(());
        }
        let concepts = serde_json::to_value(&self.roots)
            .map_err(|e| ExportError::path_conflict("concept", e.to_string()))?;
        match document.as_object_mut() {
            Some(object) => {
                object.insert("concept".to_string(), concepts);
                Ok(())
            }
            None => Err(ExportError::path_conflict(
                "concept",
                "document root is not an object",
            )),
        }
    }
}
