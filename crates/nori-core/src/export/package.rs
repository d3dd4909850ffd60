//! Output package
//!
//! Exported documents grouped by entity kind, in export order. A name is
//! exported at most once per kind; ids are only checked, so two documents may
//! share one and both stay in the package.

use crate::ast::EntityKind;
use crate::diagnostics::Location;
use indexmap::IndexMap;
use serde_json::Value;

/// One exported document and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedResource {
    pub kind: EntityKind,
    /// Name of the FSH entity
    pub name: String,
    pub id: String,
    pub document: Value,
    pub location: Location,
}

impl ExportedResource {
    pub fn resource_type(&self) -> &str {
        self.document
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or("Resource")
    }

    /// Output file name: `<ResourceType>-<id>.json`
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.resource_type(), self.id)
    }
}

/// What happened to a pushed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Added,
    /// A resource of the same kind and name is already present; nothing was added
    DuplicateName,
    /// Added, but `existing` (same kind) already uses the id
    DuplicateId { existing: String },
}

#[derive(Debug, Clone, Default)]
pub struct OutputPackage {
    resources: IndexMap<EntityKind, Vec<ExportedResource>>,
}

impl OutputPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_name(&self, kind: EntityKind, name: &str) -> bool {
        self.of_kind(kind).iter().any(|r| r.name == name)
    }

    pub fn push(&mut self, resource: ExportedResource) -> PushOutcome {
        if self.contains_name(resource.kind, &resource.name) {
            return PushOutcome::DuplicateName;
        }

        let entries = self.resources.entry(resource.kind).or_default();
        let outcome = match entries.iter().find(|r| r.id == resource.id) {
            Some(existing) => PushOutcome::DuplicateId {
                existing: existing.name.clone(),
            },
            None => PushOutcome::Added,
        };
        entries.push(resource);
        outcome
    }

    /// Resources of one kind, in export order
    pub fn of_kind(&self, kind: EntityKind) -> &[ExportedResource] {
        self.resources.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn code_systems(&self) -> &[ExportedResource] {
        self.of_kind(EntityKind::CodeSystem)
    }

    pub fn instances(&self) -> &[ExportedResource] {
        self.of_kind(EntityKind::Instance)
    }

    /// Every resource, grouped by kind in the order kinds were first exported
    pub fn iter(&self) -> impl Iterator<Item = &ExportedResource> {
        self.resources.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
