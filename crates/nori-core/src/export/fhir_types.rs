//! FHIR type definitions for export
//!
//! Typed views of the parts of exported resources the exporters build
//! themselves. Everything else flows through rule application as plain JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// CodeSystem
// ============================================================================

/// FHIR CodeSystem resource metadata
///
/// See: <https://www.hl7.org/fhir/codesystem.html>
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemResource {
    /// Resource type (always "CodeSystem")
    pub resource_type: String,

    /// Logical id of this artifact
    pub id: String,

    /// Canonical identifier for this code system
    pub url: String,

    /// Business version of the code system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name for this code system (computer friendly)
    pub name: String,

    /// Name for this code system (human friendly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// draft | active | retired | unknown
    pub status: String,

    /// Natural language description of the code system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// not-present | example | fragment | complete | supplement
    pub content: String,

    /// Total concepts in the code system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Concepts in the code system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
}

impl CodeSystemResource {
    /// Create a new CodeSystem resource
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: "CodeSystem".to_string(),
            id: id.into(),
            url: url.into(),
            version: None,
            name: name.into(),
            title: None,
            status: status.into(),
            description: None,
            content: "complete".to_string(),
            count: None,
            concept: None,
        }
    }

    /// Serialize into the JSON document rules are applied to
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Recursively count all concepts including children
pub fn count_concepts_recursive(concepts: &[CodeSystemConcept]) -> u32 {
    concepts
        .iter()
        .map(|c| 1 + c.concept.as_deref().map_or(0, count_concepts_recursive))
        .sum()
}

/// A concept defined in the code system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemConcept {
    /// Code that identifies concept
    pub code: String,

    /// Text to display to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// Formal definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    /// Additional representations for the concept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designation: Option<Vec<Value>>,

    /// Property values for the concept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Vec<Value>>,

    /// Any other element set on the concept (extensions, ids)
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Child Concepts (is-a/contains/categorizes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
}

impl CodeSystemConcept {
    /// Create a new concept with just a code
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: None,
            definition: None,
            designation: None,
            property: None,
            extra: Map::new(),
            concept: None,
        }
    }

    /// Child concepts, empty when there are none
    pub fn children(&self) -> &[CodeSystemConcept] {
        self.concept.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codesystem_document() {
        let mut cs = CodeSystemResource::new(
            "my-codes",
            "http://example.org/fhir/CodeSystem/my-codes",
            "MyCodes",
            "draft",
        );
        cs.version = Some("1.0.0".to_string());

        assert_eq!(
            cs.to_document(),
            json!({
                "resourceType": "CodeSystem",
                "id": "my-codes",
                "url": "http://example.org/fhir/CodeSystem/my-codes",
                "version": "1.0.0",
                "name": "MyCodes",
                "status": "draft",
                "content": "complete"
            })
        );
    }

    #[test]
    fn test_count_includes_children() {
        let concepts: Vec<CodeSystemConcept> = serde_json::from_value(json!([
            {"code": "parent", "display": "Parent", "concept": [{"code": "child"}]},
            {"code": "other"}
        ]))
        .unwrap();

        assert_eq!(count_concepts_recursive(&concepts), 3);
    }

    #[test]
    fn test_concept_keeps_unknown_elements() {
        let concept: CodeSystemConcept = serde_json::from_value(json!({
            "code": "a",
            "extension": [{"url": "http://example.org/ext", "valueString": "x"}],
            "concept": [{"code": "b"}]
        }))
        .unwrap();

        assert_eq!(concept.children().len(), 1);
        assert!(concept.extra.contains_key("extension"));
        assert_eq!(
            serde_json::to_value(&concept).unwrap()["extension"][0]["valueString"],
            json!("x")
        );
    }
}
