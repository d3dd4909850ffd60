//! Path resolution against FHIR element definitions
//!
//! Turns a soft-index-free [`PathExpression`] into a [`ResolvedPath`] of concrete
//! document keys and indices, and coerces the assigned [`Value`] into the JSON
//! shape the terminal element permits.
//!
//! # Algorithm Overview
//!
//! 1. **Child lookup**: `{parent id}.{name}` in the current definition
//! 2. **Unfolding**: elements without inline children are expanded by fishing
//!    their (single) complex type and continuing from that type's root
//! 3. **Content references**: `#CodeSystem.concept` redirects child lookup to
//!    the referenced element
//! 4. **Choice types**: `valueString` resolves to `value[x]` restricted to `string`
//! 5. **Brackets**: slice names select `{id}:{slice}`, indices are checked
//!    against the element's cardinality; arrays without an index address `[0]`
//! 6. **Terminal coercion**: the value must match one of the permitted types

use super::path::{PathExpression, PathIndex, PathSegment};
use crate::ast::{Code, Quantity, Value};
use crate::canonical::{ElementSchema, Fishable, StructureSchema, is_primitive_type};
use crate::error::ExportError;
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// UCUM system used for quantity literals
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

const INTEGER_TYPES: &[&str] = &["integer", "integer64", "positiveInt", "unsignedInt"];
const STRING_TYPES: &[&str] = &[
    "string",
    "markdown",
    "id",
    "uri",
    "url",
    "oid",
    "uuid",
    "code",
    "base64Binary",
    "canonical",
    "xhtml",
];
const QUANTITY_TYPES: &[&str] = &[
    "Quantity",
    "SimpleQuantity",
    "MoneyQuantity",
    "Age",
    "Count",
    "Distance",
    "Duration",
];

/// One concrete step into a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    /// JSON key (choice elements use their typed name, e.g. `valueString`)
    pub name: String,
    /// Slice the array entry belongs to
    pub slice: Option<String>,
    /// Array position; `None` for single-valued elements
    pub index: Option<usize>,
}

/// Fully concrete document path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPath {
    pub segments: Vec<ResolvedSegment>,
}

impl ResolvedPath {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment.name)?;
            if let Some(slice) = &segment.slice {
                write!(f, "[{}]", slice)?;
            }
            if let Some(index) = segment.index {
                write!(f, "[{}]", index)?;
            }
        }
        Ok(())
    }
}

/// A resolved path paired with the coerced JSON value
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAssignment {
    pub path: ResolvedPath,
    pub value: JsonValue,
    /// The permitted type code the value was coerced to
    pub type_code: String,
}

/// Where the walk currently stands: a definition and an element id within it
#[derive(Debug, Clone)]
struct Cursor {
    schema: Arc<StructureSchema>,
    element: ElementSchema,
    /// Set when a typed choice name (`valueString`) narrowed the element's types
    restricted_type: Option<String>,
}

impl Cursor {
    fn types(&self) -> Vec<String> {
        match &self.restricted_type {
            Some(t) => vec![t.clone()],
            None => self.element.types.clone(),
        }
    }
}

/// Resolves FSH paths against element definitions
pub struct PathResolver<'a, F: Fishable + ?Sized> {
    fisher: &'a F,
}

impl<'a, F: Fishable + ?Sized> PathResolver<'a, F> {
    pub fn new(fisher: &'a F) -> Self {
        Self { fisher }
    }

    /// Resolve `path` within `schema` and coerce `value` for the terminal element.
    ///
    /// Never touches any document; callers apply the result with the document mutator.
    pub fn resolve(
        &self,
        schema: &Arc<StructureSchema>,
        path: &PathExpression,
        value: &Value,
    ) -> Result<ResolvedAssignment, ExportError> {
        trace!("Resolving path '{}' in {}", path, schema.type_name);

        let root = schema.root().cloned().ok_or_else(|| {
            ExportError::unresolvable_path(path.to_string(), &schema.type_name, &schema.type_name)
        })?;
        let mut cursor = Cursor {
            schema: Arc::clone(schema),
            element: root,
            restricted_type: None,
        };
        let mut resolved = ResolvedPath::default();

        let segments = path.segments();
        for (position, segment) in segments.iter().enumerate() {
            let is_terminal = position + 1 == segments.len();
            let (child, key) = self.step(&cursor, segment, path, is_terminal)?;
            let index = self.resolve_index(&cursor, &child, segment, path)?;

            resolved.segments.push(ResolvedSegment {
                name: key,
                slice: segment.slice.clone(),
                index,
            });
            cursor = child;
        }

        let (value, type_code) = coerce_value(&cursor, value).ok_or_else(|| {
            ExportError::TypeMismatch {
                path: path.to_string(),
                expected: describe_types(&cursor.types()),
                actual: value.type_name().to_string(),
            }
        })?;

        // `value[x]` as written takes the name of the type the value matched
        if let Some(last) = resolved.segments.last_mut() {
            if let Some(stem) = last.name.strip_suffix("[x]") {
                last.name = format!("{}{}", stem, capitalize(&type_code));
            }
        }

        debug!("Resolved '{}' to '{}' ({})", path, resolved, type_code);
        Ok(ResolvedAssignment {
            path: resolved,
            value,
            type_code,
        })
    }

    /// Move from `cursor` to the child named by `segment`, returning the new cursor and JSON key
    fn step(
        &self,
        cursor: &Cursor,
        segment: &PathSegment,
        path: &PathExpression,
        is_terminal: bool,
    ) -> Result<(Cursor, String), ExportError> {
        let not_found = |reason: &str| {
            trace!("Cannot resolve '{}' in '{}': {}", segment, path, reason);
            ExportError::unresolvable_path(
                path.to_string(),
                segment.to_string(),
                cursor.element.path.clone(),
            )
        };

        let (schema, container_id) = self
            .container(cursor)
            .ok_or_else(|| not_found("element has no children"))?;

        // exact child, or a typed name for a choice child
        let child_id = format!("{}.{}", container_id, segment.name);
        let (element, restricted_type) = match schema.element(&child_id) {
            Some(element) => (element.clone(), None),
            None => find_typed_choice(&schema, &container_id, &segment.name)
                .ok_or_else(|| not_found("no such element"))?,
        };

        if element.is_prohibited() {
            return Err(not_found("element is prohibited (max 0)"));
        }

        let element = match &segment.slice {
            Some(slice) => schema
                .element(&format!("{}:{}", element.id, slice))
                .cloned()
                .ok_or_else(|| not_found("no such slice"))?,
            None => element,
        };

        if element.is_choice()
            && restricted_type.is_none()
            && !is_terminal
            && element.types.len() != 1
        {
            return Err(not_found("choice element must be typed before descending"));
        }

        let key = segment.name.clone();
        let restricted_type = restricted_type.or_else(|| {
            (element.is_choice() && element.types.len() == 1 && !is_terminal)
                .then(|| element.types[0].clone())
        });
        let key = match (&restricted_type, key.strip_suffix("[x]")) {
            (Some(t), Some(stem)) => format!("{}{}", stem, capitalize(t)),
            _ => key,
        };

        Ok((
            Cursor {
                schema,
                element,
                restricted_type,
            },
            key,
        ))
    }

    /// Definition and element id holding the children of `cursor`
    fn container(&self, cursor: &Cursor) -> Option<(Arc<StructureSchema>, String)> {
        let schema = &cursor.schema;
        let element = &cursor.element;

        if let Some(reference) = &element.content_reference {
            return schema
                .element(reference)
                .map(|target| (Arc::clone(schema), target.id.clone()));
        }
        if schema.has_children(&element.id) {
            return Some((Arc::clone(schema), element.id.clone()));
        }
        // children of a slice that only constrains the base element
        let unsliced = strip_slices(&element.id);
        if unsliced != element.id && schema.has_children(&unsliced) {
            return Some((Arc::clone(schema), unsliced));
        }

        let types = cursor.types();
        let [type_code] = types.as_slice() else {
            return None;
        };
        if is_primitive_type(type_code) {
            return None;
        }

        trace!("Unfolding {} as {}", element.id, type_code);
        let type_schema = self.fisher.fish_for_schema(type_code, &[])?;
        let root_id = type_schema.root()?.id.clone();
        Some((type_schema, root_id))
    }

    fn resolve_index(
        &self,
        parent: &Cursor,
        child: &Cursor,
        segment: &PathSegment,
        path: &PathExpression,
    ) -> Result<Option<usize>, ExportError> {
        let is_array = match &child.element.slice_name {
            // slices are entries of the sliced (array) element
            Some(_) => true,
            None => child.element.is_array(),
        };
        let not_found = || {
            ExportError::unresolvable_path(
                path.to_string(),
                segment.to_string(),
                parent.element.path.clone(),
            )
        };

        match segment.index {
            None => Ok(is_array.then_some(0)),
            Some(PathIndex::Soft(_)) => Err(ExportError::SoftIndex {
                path: path.to_string(),
                reason: "soft index was not resolved".to_string(),
            }),
            Some(PathIndex::Literal(_)) if !is_array => Err(not_found()),
            Some(PathIndex::Literal(index)) => match child.element.max_count() {
                Some(max) if index >= max => Err(not_found()),
                _ => Ok(Some(index)),
            },
        }
    }
}

/// Find `stem[x]` under `container_id` such that `name == stem + Type` for a permitted type
fn find_typed_choice(
    schema: &StructureSchema,
    container_id: &str,
    name: &str,
) -> Option<(ElementSchema, Option<String>)> {
    schema
        .children(container_id)
        .filter(|e| e.is_choice())
        .find_map(|choice| {
            let stem = choice.name().strip_suffix("[x]")?;
            let suffix = name.strip_prefix(stem)?;
            choice
                .types
                .iter()
                .find(|t| capitalize(t) == suffix)
                .map(|t| (choice.clone(), Some(t.clone())))
        })
}

/// `Patient.extension:race.url` -> `Patient.extension.url`
fn strip_slices(id: &str) -> String {
    id.split('.')
        .map(|part| part.split(':').next().unwrap_or(part))
        .collect::<Vec<_>>()
        .join(".")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe_types(types: &[String]) -> String {
    if types.is_empty() {
        "an element with children".to_string()
    } else {
        types.join(" | ")
    }
}

/// Coerce `value` to the first permitted type that accepts it
fn coerce_value(cursor: &Cursor, value: &Value) -> Option<(JsonValue, String)> {
    if cursor.element.content_reference.is_some() {
        return None;
    }
    cursor
        .types()
        .into_iter()
        .find_map(|type_code| coerce(value, &type_code).map(|json| (json, type_code)))
}

/// Coerce one FSH value to one FHIR type, if the shapes are compatible
pub fn coerce(value: &Value, type_code: &str) -> Option<JsonValue> {
    match value {
        Value::Boolean(b) => (type_code == "boolean").then(|| json!(b)),
        Value::Number(n) => coerce_number(*n, type_code),
        Value::String(s) => {
            if STRING_TYPES.contains(&type_code) {
                Some(json!(s))
            } else if INTEGER_TYPES.contains(&type_code) || type_code == "decimal" {
                // numeric strings become numbers for numeric elements
                let n = s.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
                coerce_number(n, type_code)
            } else {
                None
            }
        }
        Value::Code(code) => match type_code {
            "code" => Some(json!(code.code)),
            "Coding" => Some(coding_json(code)),
            "CodeableConcept" => Some(json!({ "coding": [coding_json(code)] })),
            t if QUANTITY_TYPES.contains(&t) => {
                let mut quantity = Map::new();
                if let Some(display) = &code.display {
                    quantity.insert("unit".into(), json!(display));
                }
                if let Some(system) = &code.system {
                    quantity.insert("system".into(), json!(system));
                }
                quantity.insert("code".into(), json!(code.code));
                Some(JsonValue::Object(quantity))
            }
            _ => None,
        },
        Value::Quantity(quantity) => {
            QUANTITY_TYPES.contains(&type_code).then(|| quantity_json(quantity))
        }
        Value::Ratio(numerator, denominator) => (type_code == "Ratio").then(|| {
            json!({
                "numerator": quantity_json(numerator),
                "denominator": quantity_json(denominator),
            })
        }),
        Value::Reference { target, display } => (type_code == "Reference").then(|| {
            let mut reference = Map::new();
            reference.insert("reference".into(), json!(target));
            if let Some(display) = display {
                reference.insert("display".into(), json!(display));
            }
            JsonValue::Object(reference)
        }),
        Value::Canonical(url) => {
            matches!(type_code, "canonical" | "uri" | "url").then(|| json!(url))
        }
        Value::DateTime(s) => match type_code {
            "dateTime" => Some(json!(s)),
            "date" => (!s.contains('T')).then(|| json!(s)),
            "instant" => s.contains('T').then(|| json!(s)),
            _ => None,
        },
        Value::Time(s) => (type_code == "time").then(|| json!(s)),
    }
}

fn coerce_number(n: f64, type_code: &str) -> Option<JsonValue> {
    if !n.is_finite() {
        return None;
    }
    let whole = n.fract() == 0.0;
    match type_code {
        "decimal" => Some(number_json(n)),
        "integer64" => (whole && n.abs() < 1e15).then(|| json!(n as i64)),
        "integer" | "positiveInt" | "unsignedInt" if whole => {
            let i = i32::try_from(n as i64).ok()?;
            let in_range = match type_code {
                "positiveInt" => i >= 1,
                "unsignedInt" => i >= 0,
                _ => true,
            };
            in_range.then(|| json!(i))
        }
        // a bare year is a valid date
        "date" | "dateTime" if whole && (0.0..=9999.0).contains(&n) => {
            Some(json!(format!("{:04}", n as i64)))
        }
        _ => None,
    }
}

fn number_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        json!(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

fn coding_json(code: &Code) -> JsonValue {
    let mut coding = Map::new();
    if let Some(system) = &code.system {
        coding.insert("system".into(), json!(system));
    }
    coding.insert("code".into(), json!(code.code));
    if let Some(display) = &code.display {
        coding.insert("display".into(), json!(display));
    }
    JsonValue::Object(coding)
}

fn quantity_json(quantity: &Quantity) -> JsonValue {
    let mut json = Map::new();
    json.insert("value".into(), number_json(quantity.value));
    if let Some(unit) = &quantity.unit {
        if let Some(display) = &quantity.display {
            json.insert("unit".into(), json!(display));
        }
        json.insert("system".into(), json!(UCUM_SYSTEM));
        json.insert("code".into(), json!(unit));
    }
    JsonValue::Object(json)
}
