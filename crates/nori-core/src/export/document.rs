//! Document mutation
//!
//! Applies a [`ResolvedPath`] and a coerced value to an in-memory JSON document,
//! creating intermediate objects and array entries on the way. The walk is
//! checked in full before anything is written, so a rejected assignment leaves
//! the document exactly as it was.
//!
//! Array entries that belong to a slice carry a `_sliceName` key while rules are
//! applied; [`strip_slice_markers`] removes them before the document is emitted.

use crate::error::ExportError;
use crate::semantic::{ResolvedPath, ResolvedSegment};
use serde_json::{Map, Value};

/// Key marking which slice an array entry belongs to
pub const SLICE_MARKER: &str = "_sliceName";

/// Set `value` at `path` in `document`
pub fn apply(document: &mut Value, path: &ResolvedPath, value: Value) -> Result<(), ExportError> {
    check(document, path, &value)?;
    write(document, path, value)
}

/// Remove every slice marker from the document
pub fn strip_slice_markers(document: &mut Value) {
    match document {
        Value::Object(map) => {
            map.shift_remove(SLICE_MARKER);
            for child in map.values_mut() {
                strip_slice_markers(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_slice_markers),
        _ => {}
    }
}

fn conflict(path: &ResolvedPath, reason: impl Into<String>) -> ExportError {
    ExportError::path_conflict(path.to_string(), reason)
}

/// Positions of the entries `segment` can address, in order
fn addressable(items: &[Value], segment: &ResolvedSegment) -> Vec<usize> {
    match &segment.slice {
        Some(slice) => items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.get(SLICE_MARKER).and_then(Value::as_str) == Some(slice.as_str())
            })
            .map(|(i, _)| i)
            .collect(),
        None => (0..items.len()).collect(),
    }
}

fn check(document: &Value, path: &ResolvedPath, value: &Value) -> Result<(), ExportError> {
    let mut current = Some(document);

    for (position, segment) in path.segments.iter().enumerate() {
        let is_terminal = position + 1 == path.segments.len();

        if is_terminal && segment.slice.is_some() && !value.is_object() {
            return Err(conflict(
                path,
                format!("slice '{}' cannot hold a primitive value", segment.name),
            ));
        }

        let Some(node) = current else {
            continue;
        };
        let object = node
            .as_object()
            .ok_or_else(|| {
                conflict(path, format!("parent of '{}' is not an object", segment.name))
            })?;
        let field = object.get(&segment.name);

        let target = match segment.index {
            None => {
                if field.is_some_and(Value::is_array) {
                    return Err(conflict(path, format!("'{}' holds an array", segment.name)));
                }
                field
            }
            Some(index) => {
                let items: &[Value] = match field {
                    None => &[],
                    Some(Value::Array(items)) => items,
                    Some(_) => {
                        return Err(conflict(path, format!("'{}' is not an array", segment.name)));
                    }
                };
                let entries = addressable(items, segment);
                if index > entries.len() {
                    return Err(conflict(
                        path,
                        format!(
                            "index {} of '{}' would leave earlier entries empty ({} present)",
                            index,
                            segment.name,
                            entries.len()
                        ),
                    ));
                }
                entries.get(index).map(|&i| &items[i])
            }
        };

        if !is_terminal
            && let Some(existing) = target.filter(|t| !t.is_object())
        {
            return Err(conflict(
                path,
                format!("'{}' already holds {}", segment.name, existing),
            ));
        }
        current = target;
    }

    Ok(())
}

fn write(document: &mut Value, path: &ResolvedPath, value: Value) -> Result<(), ExportError> {
    let mut current = document;
    let mut value = Some(value);

    for (position, segment) in path.segments.iter().enumerate() {
        let is_terminal = position + 1 == path.segments.len();
        let object = current
            .as_object_mut()
            .ok_or_else(|| {
                conflict(path, format!("parent of '{}' is not an object", segment.name))
            })?;

        let slot = match segment.index {
            None => object.entry(segment.name.clone()).or_insert(Value::Null),
            Some(index) => {
                let items = object
                    .entry(segment.name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()))
                    .as_array_mut()
                    .ok_or_else(|| conflict(path, format!("'{}' is not an array", segment.name)))?;
                let slot_position = match addressable(items, segment).get(index) {
                    Some(&existing) => existing,
                    None => {
                        items.push(Value::Null);
                        items.len() - 1
                    }
                };
                &mut items[slot_position]
            }
        };

        if is_terminal {
            let value = value.take().unwrap_or(Value::Null);
            assign(slot, value, segment.slice.as_deref());
            return Ok(());
        }

        if slot.is_null() {
            let mut entry = Map::new();
            if let Some(slice) = &segment.slice {
                entry.insert(SLICE_MARKER.to_string(), Value::String(slice.clone()));
            }
            *slot = Value::Object(entry);
        }
        current = slot;
    }

    Ok(())
}

/// Write the terminal value; objects merge into existing objects
fn assign(slot: &mut Value, value: Value, slice: Option<&str>) {
    match (slot.as_object_mut(), value) {
        (Some(existing), Value::Object(incoming)) => {
            for (key, v) in incoming {
                existing.insert(key, v);
            }
        }
        (_, value) => *slot = value,
    }
    if let (Some(slice), Some(object)) = (slice, slot.as_object_mut()) {
        object.insert(SLICE_MARKER.to_string(), Value::String(slice.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seg(name: &str, index: Option<usize>) -> ResolvedSegment {
        ResolvedSegment {
            name: name.to_string(),
            slice: None,
            index,
        }
    }

    fn sliced(name: &str, slice: &str, index: usize) -> ResolvedSegment {
        ResolvedSegment {
            name: name.to_string(),
            slice: Some(slice.to_string()),
            index: Some(index),
        }
    }

    fn path(segments: Vec<ResolvedSegment>) -> ResolvedPath {
        ResolvedPath { segments }
    }

    #[test]
    fn test_creates_intermediate_containers() {
        let mut doc = json!({"resourceType": "Patient"});
        apply(
            &mut doc,
            &path(vec![seg("name", Some(0)), seg("given", Some(0))]),
            json!("Jane"),
        )
        .unwrap();
        apply(
            &mut doc,
            &path(vec![seg("name", Some(0)), seg("family", None)]),
            json!("Doe"),
        )
        .unwrap();

        assert_eq!(
            doc,
            json!({"resourceType": "Patient", "name": [{"given": ["Jane"], "family": "Doe"}]})
        );
    }

    #[test]
    fn test_appends_next_index() {
        let mut doc = json!({});
        for (i, value) in ["a", "b"].iter().enumerate() {
            apply(&mut doc, &path(vec![seg("line", Some(i))]), json!(value)).unwrap();
        }
        assert_eq!(doc, json!({"line": ["a", "b"]}));
    }

    #[test]
    fn test_gap_is_a_conflict() {
        let mut doc = json!({"line": ["a"]});
        let before = doc.clone();
        let err = apply(&mut doc, &path(vec![seg("line", Some(2))]), json!("c")).unwrap_err();

        assert!(matches!(err, ExportError::PathConflict { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_shape_conflict_leaves_document_unchanged() {
        let mut doc = json!({"status": "draft", "name": [{"family": "Doe"}]});
        let before = doc.clone();

        let err = apply(
            &mut doc,
            &path(vec![seg("status", None), seg("text", None)]),
            json!("x"),
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::PathConflict { .. }));

        let err = apply(
            &mut doc,
            &path(vec![seg("name", None), seg("family", None)]),
            json!("Roe"),
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::PathConflict { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_objects_merge() {
        let mut doc = json!({"code": {"text": "Married"}});
        apply(
            &mut doc,
            &path(vec![seg("code", None)]),
            json!({"coding": [{"code": "M"}]}),
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({"code": {"text": "Married", "coding": [{"code": "M"}]}})
        );
    }

    #[test]
    fn test_slices_are_addressed_independently() {
        let mut doc = json!({});
        apply(
            &mut doc,
            &path(vec![sliced("extension", "a", 0), seg("valueString", None)]),
            json!("first"),
        )
        .unwrap();
        apply(
            &mut doc,
            &path(vec![sliced("extension", "b", 0), seg("valueString", None)]),
            json!("second"),
        )
        .unwrap();
        apply(
            &mut doc,
            &path(vec![sliced("extension", "a", 0), seg("url", None)]),
            json!("http://example.org/a"),
        )
        .unwrap();

        assert_eq!(doc["extension"].as_array().unwrap().len(), 2);
        assert_eq!(doc["extension"][0]["url"], json!("http://example.org/a"));

        strip_slice_markers(&mut doc);
        assert_eq!(
            doc,
            json!({"extension": [
                {"valueString": "first", "url": "http://example.org/a"},
                {"valueString": "second"}
            ]})
        );
    }

    #[test]
    fn test_slice_on_primitive_array() {
        let mut doc = json!({});
        let err = apply(&mut doc, &path(vec![sliced("given", "first", 0)]), json!("Jane"))
            .unwrap_err();
        assert!(matches!(err, ExportError::PathConflict { .. }));
        assert_eq!(doc, json!({}));
    }
}
