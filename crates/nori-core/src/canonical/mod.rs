//! Schema lookup
//!
//! [`SchemaRegistry`] holds parsed StructureDefinitions and answers
//! [`Fishable`] lookups by canonical URL, id, name or type. It starts from the
//! embedded base definitions and can be extended with definitions read from disk.

pub mod builtin;
pub mod fishable;
pub mod schema;

pub use fishable::{FhirType, Fishable};
pub use schema::{ElementSchema, StructureSchema, is_primitive_type};

use crate::error::NoriError;
use crate::result::Result;
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// In-memory definition store
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    /// Keyed by canonical URL (or id when a definition has no URL); later registrations win
    schemas: IndexMap<String, Arc<StructureSchema>>,
}

impl SchemaRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the embedded base definitions
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        for (name, json) in builtin::BUILTIN_DEFINITIONS {
            let value: serde_json::Value = serde_json::from_str(json)
                .map_err(|e| NoriError::definition_error(*name, e.to_string()))?;
            registry.load_structure_definition(&value)?;
        }
        debug!("Loaded {} builtin definitions", registry.len());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Register a parsed schema
    pub fn register(&mut self, schema: StructureSchema) -> Arc<StructureSchema> {
        let key = schema.url.clone().unwrap_or_else(|| schema.id.clone());
        trace!("Registering definition {}", key);
        let schema = Arc::new(schema);
        self.schemas.insert(key, Arc::clone(&schema));
        schema
    }

    /// Parse and register a StructureDefinition resource
    pub fn load_structure_definition(
        &mut self,
        json: &serde_json::Value,
    ) -> Result<Arc<StructureSchema>> {
        let schema = StructureSchema::from_structure_definition(json)?;
        Ok(self.register(schema))
    }

    /// Load one StructureDefinition JSON file
    pub fn load_file(&mut self, path: &Path) -> Result<Arc<StructureSchema>> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NoriError::io_error(path, e))?;
        let json: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| NoriError::definition_error(path.display().to_string(), e.to_string()))?;
        self.load_structure_definition(&json)
    }

    /// Load every StructureDefinition JSON file under `dir`.
    ///
    /// Files that are not StructureDefinitions are skipped with a warning.
    /// Returns the number of definitions loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(NoriError::config_error(format!(
                "Definition directory not found: {}",
                dir.display()
            )));
        }

        let mut loaded = 0;
        for entry in WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        {
            match self.load_file(entry.path()) {
                Ok(schema) => {
                    debug!("Loaded {} from {}", schema.name, entry.path().display());
                    loaded += 1;
                }
                Err(err) if err.is_recoverable() => {
                    warn!("Skipping {}: {}", entry.path().display(), err);
                }
                Err(err) => return Err(err),
            }
        }

        info!("Loaded {} definitions from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// All registered schemas in registration order
    pub fn schemas(&self) -> impl Iterator<Item = &Arc<StructureSchema>> {
        self.schemas.values()
    }
}

impl Fishable for SchemaRegistry {
    fn fish_for_schema(&self, item: &str, types: &[FhirType]) -> Option<Arc<StructureSchema>> {
        trace!("Fishing for '{}' with type filters: {:?}", item, types);

        // Strategy 1: canonical URL
        if let Some(schema) = self.schemas.get(item).filter(|s| s.matches_types(types)) {
            return Some(Arc::clone(schema));
        }

        // Strategy 2: id, then name, then type; latest registration first
        let strategies: [fn(&StructureSchema) -> &str; 3] =
            [|s| s.id.as_str(), |s| s.name.as_str(), |s| s.type_name.as_str()];
        for key in strategies {
            if let Some(schema) = self
                .schemas
                .values()
                .rev()
                .find(|s| key(s) == item && s.matches_types(types))
            {
                return Some(Arc::clone(schema));
            }
        }

        debug!("Not found: '{}'", item);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn custom_definition() -> serde_json::Value {
        json!({
            "resourceType": "StructureDefinition",
            "id": "my-patient",
            "url": "http://example.org/StructureDefinition/my-patient",
            "name": "MyPatient",
            "kind": "resource",
            "type": "Patient",
            "derivation": "constraint",
            "snapshot": {"element": [
                {"id": "Patient", "path": "Patient", "min": 0, "max": "*"},
                {"id": "Patient.active", "path": "Patient.active", "min": 1, "max": "1",
                 "type": [{"code": "boolean"}]}
            ]}
        })
    }

    #[test]
    fn test_builtins_are_fishable() {
        let registry = SchemaRegistry::with_builtins().unwrap();
        let code_system = registry
            .fish_for_schema("CodeSystem", &[FhirType::Resource])
            .unwrap();
        assert_eq!(code_system.type_name, "CodeSystem");

        let coding = registry
            .fish_for_schema("http://hl7.org/fhir/StructureDefinition/Coding", &[])
            .unwrap();
        assert_eq!(coding.kind, "complex-type");

        assert!(registry.fish_for_schema("Coding", &[FhirType::Resource]).is_none());
        assert!(registry.fish_for_schema("Observation", &[]).is_none());
    }

    #[test]
    fn test_fish_by_id_and_name() {
        let mut registry = SchemaRegistry::with_builtins().unwrap();
        registry.load_structure_definition(&custom_definition()).unwrap();

        let by_id = registry.fish_for_schema("my-patient", &[]).unwrap();
        let by_name = registry.fish_for_schema("MyPatient", &[FhirType::Profile]).unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_name));

        // the base resource is still found by its own id
        let base = registry.fish_for_schema("Patient", &[]).unwrap();
        assert_eq!(base.id, "Patient");
    }

    #[test]
    fn test_load_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("my-patient.json"),
            serde_json::to_string_pretty(&custom_definition()).unwrap(),
        )
        .unwrap();
        fs::write(temp_dir.path().join("notes.json"), "{\"resourceType\": \"Basic\"}").unwrap();
        fs::write(temp_dir.path().join("readme.txt"), "ignored").unwrap();

        let mut registry = SchemaRegistry::new();
        let loaded = registry.load_dir(temp_dir.path()).unwrap();
        assert_eq!(loaded, 1);
        assert!(registry.fish_for_schema("MyPatient", &[]).is_some());
    }

    #[test]
    fn test_load_dir_missing() {
        let mut registry = SchemaRegistry::new();
        let err = registry.load_dir(Path::new("/nonexistent/definitions")).unwrap_err();
        assert!(matches!(err, NoriError::ConfigError { .. }));
    }
}
