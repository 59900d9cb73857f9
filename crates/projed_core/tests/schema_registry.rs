use projed_core::{InvalidMetaModelError, MetaModelSchema, SchemaRegistry, ValueType};
use serde_json::{json, Value};

fn load(value: Value) -> Result<SchemaRegistry, InvalidMetaModelError> {
    SchemaRegistry::from_schema(MetaModelSchema::from_value(&value)?)
}

fn library() -> SchemaRegistry {
    load(json!({
        "@root": "Shelf",
        "@config": { "language": "library", "settings": { "history_capacity": 4 } },
        "Shelf": {
            "attribute": {
                "items": { "type": "set", "accept": "Publication" }
            }
        },
        "Publication": {
            "nature": "prototype",
            "attribute": {
                "code": { "type": "ID" },
                "title": { "type": "string" }
            },
            "component": [{
                "name": "meta",
                "attribute": { "year": { "type": "number" } }
            }]
        },
        "Book": {
            "prototype": "Publication",
            "attribute": {
                "title": { "type": "string", "required": false },
                "pages": { "type": "number" }
            }
        },
        "Novel": { "prototype": "Book" }
    }))
    .unwrap()
}

#[test]
fn prototype_chain_merges_root_first_and_derived_wins() {
    let registry = library();
    let novel = registry.resolve("Novel").unwrap();

    assert_eq!(novel.ancestors, vec!["Book".to_string(), "Publication".to_string()]);
    assert_eq!(
        novel.attributes.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["code", "pages", "title"]
    );
    assert!(!novel.attributes["title"].required);
    assert_eq!(novel.attributes["code"].kind, ValueType::Identifier);
    assert!(novel.component("meta").is_some());
    assert_eq!(novel.id_attribute(), Some("code"));
}

#[test]
fn derivation_is_strict_and_conformance_is_reflexive() {
    let registry = library();

    assert!(registry.is_derived_of("Novel", "Publication"));
    assert!(registry.is_derived_of("Novel", "Book"));
    assert!(!registry.is_derived_of("Book", "Book"));
    assert!(!registry.is_derived_of("Book", "Novel"));

    assert!(registry.accepts(&["Book".to_string()], "Book"));
    assert!(registry.accepts(&["Publication".to_string()], "Novel"));
    assert!(!registry.accepts(&["Book".to_string()], "Shelf"));
}

#[test]
fn concrete_candidates_skip_prototypes() {
    let registry = library();
    assert_eq!(
        registry.concrete_candidates(&["Publication".to_string()]),
        vec!["Book".to_string(), "Novel".to_string()]
    );
}

#[test]
fn root_and_config_are_kept() {
    let registry = library();
    assert_eq!(registry.root(), Some("Shelf"));
    assert_eq!(registry.config().language.as_deref(), Some("library"));
    assert_eq!(registry.config().settings.get("history_capacity"), Some(&json!(4)));
}

#[test]
fn unknown_prototype_is_rejected() {
    let err = load(json!({ "Book": { "prototype": "Missing" } })).unwrap_err();
    assert_eq!(
        err,
        InvalidMetaModelError::UnknownPrototype {
            concept: "Book".to_string(),
            prototype: "Missing".to_string(),
        }
    );
}

#[test]
fn prototype_cycle_is_rejected() {
    let err = load(json!({
        "A": { "prototype": "B" },
        "B": { "prototype": "A" }
    }))
    .unwrap_err();
    assert!(matches!(err, InvalidMetaModelError::PrototypeCycle(_)));
}

#[test]
fn attribute_declarations_are_validated() {
    let unknown_type = load(json!({
        "A": { "attribute": { "x": { "type": "Widget" } } }
    }))
    .unwrap_err();
    assert!(matches!(unknown_type, InvalidMetaModelError::UnknownType { .. }));

    let missing_accept = load(json!({
        "A": { "attribute": { "xs": { "type": "set" } } }
    }))
    .unwrap_err();
    assert_eq!(
        missing_accept,
        InvalidMetaModelError::MissingAccept {
            concept: "A".to_string(),
            attribute: "xs".to_string(),
        }
    );

    let cardinality = load(json!({
        "A": { "attribute": { "xs": { "type": "set", "accept": "A", "min": 3, "max": 1 } } }
    }))
    .unwrap_err();
    assert!(matches!(
        cardinality,
        InvalidMetaModelError::InvalidCardinality { min: 3, max: 1, .. }
    ));

    let duplicate = load(json!({
        "A": { "component": [{ "name": "c" }, { "name": "c" }] }
    }))
    .unwrap_err();
    assert!(matches!(duplicate, InvalidMetaModelError::DuplicateComponent { .. }));
}

#[test]
fn failed_merge_keeps_previous_registry() {
    let mut registry = library();
    let before = registry.len();

    let bad = MetaModelSchema::from_value(&json!({
        "Magazine": { "prototype": "Periodical" }
    }))
    .unwrap();
    assert!(registry.add_concept_schema(bad).is_err());
    assert_eq!(registry.len(), before);
    assert!(!registry.contains("Magazine"));

    let good = MetaModelSchema::from_value(&json!({
        "Magazine": { "prototype": "Publication", "attribute": { "issue": { "type": "number" } } }
    }))
    .unwrap();
    assert_eq!(registry.add_concept_schema(good).unwrap(), before + 1);
    assert!(registry.is_derived_of("Magazine", "Publication"));
}

#[test]
fn invalid_json_reports_parse_error() {
    let err = MetaModelSchema::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, InvalidMetaModelError::Parse(_)));
}

#[test]
fn required_creation_cycles_are_rejected() {
    let err = load(json!({ "Node": { "attribute": { "next": { "type": "Node" } } } })).unwrap_err();
    assert_eq!(
        err,
        InvalidMetaModelError::RequiredCycle(vec!["Node".to_string(), "Node".to_string()])
    );

    let err = load(json!({
        "A": { "attribute": { "bs": { "type": "set", "accept": "B", "min": 1 } } },
        "B": { "attribute": { "a": { "type": "A" } } }
    }))
    .unwrap_err();
    assert_eq!(
        err,
        InvalidMetaModelError::RequiredCycle(vec![
            "A".to_string(),
            "B".to_string(),
            "A".to_string()
        ])
    );
    assert!(err.to_string().contains("A -> B -> A"));
}

#[test]
fn optional_links_break_creation_cycles() {
    let registry = load(json!({
        "Node": {
            "attribute": {
                "next": { "type": "Node", "required": false },
                "children": { "type": "set", "accept": "Node" }
            }
        }
    }))
    .unwrap();
    assert!(registry.contains("Node"));
}
