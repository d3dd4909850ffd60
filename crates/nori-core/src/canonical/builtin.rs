//! Embedded FHIR R4 definitions
//!
//! Trimmed snapshots of the base resources and datatypes the exporters need
//! without any package on disk.

/// `(type name, StructureDefinition JSON)` pairs
pub const BUILTIN_DEFINITIONS: &[(&str, &str)] = &[
    ("CodeSystem", include_str!("../../resources/definitions/CodeSystem.json")),
    ("Patient", include_str!("../../resources/definitions/Patient.json")),
    ("Address", include_str!("../../resources/definitions/Address.json")),
    ("CodeableConcept", include_str!("../../resources/definitions/CodeableConcept.json")),
    ("Coding", include_str!("../../resources/definitions/Coding.json")),
    ("ContactDetail", include_str!("../../resources/definitions/ContactDetail.json")),
    ("ContactPoint", include_str!("../../resources/definitions/ContactPoint.json")),
    ("Extension", include_str!("../../resources/definitions/Extension.json")),
    ("HumanName", include_str!("../../resources/definitions/HumanName.json")),
    ("Identifier", include_str!("../../resources/definitions/Identifier.json")),
    ("Meta", include_str!("../../resources/definitions/Meta.json")),
    ("Narrative", include_str!("../../resources/definitions/Narrative.json")),
    ("Period", include_str!("../../resources/definitions/Period.json")),
    ("Quantity", include_str!("../../resources/definitions/Quantity.json")),
    ("Ratio", include_str!("../../resources/definitions/Ratio.json")),
    ("Reference", include_str!("../../resources/definitions/Reference.json")),
    ("UsageContext", include_str!("../../resources/definitions/UsageContext.json")),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::StructureSchema;

    #[test]
    fn test_builtins_parse() {
        for (name, json) in BUILTIN_DEFINITIONS {
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            let schema = StructureSchema::from_structure_definition(&value).unwrap();
            assert_eq!(&schema.type_name, name);
            assert!(schema.root().is_some(), "{} has no root element", name);
        }
    }
}
