//! Fishable trait for definition lookups
//!
//! "Fishing" looks a definition up by whatever identifier an author wrote:
//! canonical URL, id, name or type. Exporters only ever need the element tree,
//! so the lookup hands back a shared [`StructureSchema`].

use super::schema::StructureSchema;
use std::sync::Arc;

/// Definition kind filter for fishing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirType {
    /// StructureDefinition (any kind)
    StructureDefinition,
    /// Resource (kind = resource)
    Resource,
    /// Complex or primitive datatype
    Type,
    /// Profile (derivation = constraint)
    Profile,
    /// Extension (complex-type based on Extension)
    Extension,
    /// Logical model (kind = logical)
    Logical,
    /// Any type (no filtering)
    Any,
}

impl FhirType {
    /// Check if a schema matches this filter
    pub fn matches(
        &self,
        kind: &str,
        derivation: Option<&str>,
        base_definition: Option<&str>,
    ) -> bool {
        match self {
            FhirType::Any | FhirType::StructureDefinition => true,
            FhirType::Resource => kind == "resource",
            FhirType::Type => kind == "complex-type" || kind == "primitive-type",
            FhirType::Profile => derivation == Some("constraint"),
            FhirType::Extension => {
                kind == "complex-type"
                    && base_definition.is_some_and(|b| b.ends_with("/Extension"))
            }
            FhirType::Logical => kind == "logical",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FhirType::StructureDefinition => "StructureDefinition",
            FhirType::Resource => "Resource",
            FhirType::Type => "Type",
            FhirType::Profile => "Profile",
            FhirType::Extension => "Extension",
            FhirType::Logical => "Logical",
            FhirType::Any => "Any",
        }
    }

    /// Human-readable list of filters, e.g. `Resource or Profile`
    pub fn describe(types: &[FhirType]) -> String {
        if types.is_empty() {
            return FhirType::Any.display_name().to_string();
        }
        types
            .iter()
            .map(FhirType::display_name)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

impl StructureSchema {
    /// Check if this schema matches the given type filters
    pub fn matches_types(&self, types: &[FhirType]) -> bool {
        if types.is_empty() || types.contains(&FhirType::Any) {
            return true;
        }
        types.iter().any(|t| {
            t.matches(
                &self.kind,
                self.derivation.as_deref(),
                self.base_definition.as_deref(),
            )
        })
    }
}

/// Unified interface for schema lookups
///
/// Lookups are pure and repeatable: the same item and filters always return the
/// same schema (or none).
pub trait Fishable {
    /// Fish for a schema by canonical URL, id, name or type name
    fn fish_for_schema(&self, item: &str, types: &[FhirType]) -> Option<Arc<StructureSchema>>;
}

impl<T: Fishable + ?Sized> Fishable for &T {
    fn fish_for_schema(&self, item: &str, types: &[FhirType]) -> Option<Arc<StructureSchema>> {
        (**self).fish_for_schema(item, types)
    }
}

impl<T: Fishable + ?Sized> Fishable for Arc<T> {
    fn fish_for_schema(&self, item: &str, types: &[FhirType]) -> Option<Arc<StructureSchema>> {
        (**self).fish_for_schema(item, types)
    }
}
