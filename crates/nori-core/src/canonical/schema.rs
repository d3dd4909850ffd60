//! Element-definition trees read from StructureDefinition snapshots

use crate::error::NoriError;
use crate::result::Result;
use serde_json::Value;
use std::collections::HashMap;

/// One `snapshot.element` entry, reduced to what rule application needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSchema {
    /// Element id, e.g. `Patient.extension:race.url`
    pub id: String,
    /// Element path, e.g. `Patient.extension.url`
    pub path: String,
    pub slice_name: Option<String>,
    pub min: u32,
    /// `*`, or a non-negative integer
    pub max: String,
    /// Permitted type codes in definition order
    pub types: Vec<String>,
    /// Element id this element reuses the definition of (`#CodeSystem.concept`)
    pub content_reference: Option<String>,
}

impl ElementSchema {
    pub fn new(path: impl Into<String>, min: u32, max: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: path.clone(),
            path,
            slice_name: None,
            min,
            max: max.into(),
            types: Vec::new(),
            content_reference: None,
        }
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Parse an ElementDefinition JSON object
    pub fn from_json(element: &Value) -> Option<Self> {
        let path = element.get("path")?.as_str()?.to_string();
        let slice_name = element
            .get("sliceName")
            .and_then(Value::as_str)
            .map(String::from);
        let id = element
            .get("id")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| match &slice_name {
                Some(slice) => format!("{}:{}", path, slice),
                None => path.clone(),
            });
        let min = element
            .get("min")
            .and_then(Value::as_u64)
            .and_then(|m| u32::try_from(m).ok())
            .unwrap_or(0);
        let max = element
            .get("max")
            .and_then(Value::as_str)
            .unwrap_or("*")
            .to_string();
        let types = element
            .get("type")
            .and_then(Value::as_array)
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| t.get("code").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let content_reference = element
            .get("contentReference")
            .and_then(Value::as_str)
            .and_then(|r| r.rsplit('#').next())
            .filter(|r| !r.is_empty())
            .map(String::from);

        Some(Self {
            id,
            path,
            slice_name,
            min,
            max,
            types,
            content_reference,
        })
    }

    /// Last path component, e.g. `given` for `Patient.name.given`
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Numeric upper bound, `None` for `*`
    pub fn max_count(&self) -> Option<usize> {
        self.max.parse().ok()
    }

    /// Whether instances hold a JSON array at this element
    pub fn is_array(&self) -> bool {
        match self.max_count() {
            Some(max) => max > 1,
            None => true,
        }
    }

    /// `max = 0`
    pub fn is_prohibited(&self) -> bool {
        self.max_count() == Some(0)
    }

    /// `value[x]`-style element
    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }
}

/// A parsed StructureDefinition
#[derive(Debug, Clone)]
pub struct StructureSchema {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    /// The defined type, e.g. `Patient`
    pub type_name: String,
    /// `resource`, `complex-type`, `primitive-type` or `logical`
    pub kind: String,
    pub derivation: Option<String>,
    pub base_definition: Option<String>,
    elements: Vec<ElementSchema>,
    by_id: HashMap<String, usize>,
}

impl StructureSchema {
    pub fn new(
        type_name: impl Into<String>,
        kind: impl Into<String>,
        elements: Vec<ElementSchema>,
    ) -> Self {
        let type_name = type_name.into();
        let by_id = index_elements(&elements);
        Self {
            id: type_name.clone(),
            name: type_name.clone(),
            url: Some(format!(
                "http://hl7.org/fhir/StructureDefinition/{}",
                type_name
            )),
            type_name,
            kind: kind.into(),
            derivation: None,
            base_definition: None,
            elements,
            by_id,
        }
    }

    /// Read a StructureDefinition resource; the snapshot (or differential) supplies the elements
    pub fn from_structure_definition(json: &Value) -> Result<Self> {
        let field = |name: &str| json.get(name).and_then(Value::as_str).map(String::from);
        let source_name = field("url")
            .or_else(|| field("id"))
            .unwrap_or_else(|| "<unnamed>".to_string());

        if field("resourceType").as_deref() != Some("StructureDefinition") {
            return Err(NoriError::definition_error(
                source_name,
                "resourceType is not StructureDefinition",
            ));
        }

        let type_name = field("type")
            .ok_or_else(|| NoriError::definition_error(&source_name, "missing 'type'"))?;

        let raw_elements = json
            .get("snapshot")
            .or_else(|| json.get("differential"))
            .and_then(|s| s.get("element"))
            .and_then(Value::as_array)
            .ok_or_else(|| NoriError::definition_error(&source_name, "no snapshot elements"))?;

        let elements: Vec<ElementSchema> = raw_elements
            .iter()
            .filter_map(ElementSchema::from_json)
            .collect();
        if elements.is_empty() {
            return Err(NoriError::definition_error(
                &source_name,
                "snapshot has no usable elements",
            ));
        }

        let by_id = index_elements(&elements);
        Ok(Self {
            id: field("id").unwrap_or_else(|| type_name.clone()),
            name: field("name").unwrap_or_else(|| type_name.clone()),
            url: field("url"),
            kind: field("kind").unwrap_or_else(|| "resource".to_string()),
            derivation: field("derivation"),
            base_definition: field("baseDefinition"),
            type_name,
            elements,
            by_id,
        })
    }

    pub fn elements(&self) -> &[ElementSchema] {
        &self.elements
    }

    /// The root element (`Patient`)
    pub fn root(&self) -> Option<&ElementSchema> {
        self.element(&self.type_name)
    }

    /// Look up an element by id
    pub fn element(&self, id: &str) -> Option<&ElementSchema> {
        self.by_id.get(id).map(|&i| &self.elements[i])
    }

    /// Direct children of the element with the given id
    pub fn children<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a ElementSchema> + 'a {
        self.elements.iter().filter(move |e| {
            e.id
                .strip_prefix(id)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| !rest.contains('.'))
        })
    }

    /// Whether the element with this id has children defined inline
    pub fn has_children(&self, id: &str) -> bool {
        self.children(id).next().is_some()
    }
}

fn index_elements(elements: &[ElementSchema]) -> HashMap<String, usize> {
    elements
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect()
}

/// Primitive FHIR type codes start with a lowercase letter
pub fn is_primitive_type(code: &str) -> bool {
    code.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}
