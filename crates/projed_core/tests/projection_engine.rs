use projed_core::projection::element::{AlgorithmElement, Element, LayoutElement};
use projed_core::{
    AttributeValue, ConceptId, ConceptModel, MetaModelSchema, ProjectionEngine, ProjectionEntry,
    ProjectionState, Slot,
};
use serde_json::{json, Value};

fn schema() -> Value {
    json!({
        "@root": "Catalog",
        "Catalog": {
            "attribute": {
                "title": { "type": "string" },
                "items": { "type": "set", "accept": "Item", "max": 2 },
                "pick": { "type": "reference", "accept": "Item", "required": false }
            },
            "component": [{
                "name": "meta",
                "attribute": { "owner": { "type": "string" } },
                "projection": [
                    { "type": "text", "layout": "owner: #owner" },
                    { "type": "text", "layout": "by #owner" }
                ]
            }]
        },
        "Item": {
            "nature": "prototype",
            "attribute": {
                "code": { "type": "ID" },
                "label": { "type": "string" }
            }
        },
        "Tool": { "prototype": "Item" },
        "Part": {
            "prototype": "Item",
            "attribute": { "weight": { "type": "number" } }
        },
        "Gadget": {
            "attribute": { "name": { "type": "string" } }
        }
    })
}

fn projections() -> Value {
    json!([
        { "concept": "Catalog", "type": "text", "layout": "#title\n#items\n#[meta]" },
        { "concept": "Item", "type": "text", "layout": "#code #label" },
        { "concept": "Part", "type": "text", "layout": "#code #label (#weight)" },
        { "concept": "Part", "type": "table", "layout": "code | #code\nweight | #weight" }
    ])
}

fn catalog() -> Value {
    json!({
        "@type": "Catalog",
        "title": "Tools",
        "items": [
            { "@type": "Tool", "code": "t1", "label": "Hammer" },
            { "@type": "Part", "code": "p1", "label": "Bolt", "weight": 2 }
        ],
        "meta": { "owner": "Ann" }
    })
}

fn setup_with(projections: Value) -> (ConceptModel, ProjectionEngine) {
    let model =
        ConceptModel::from_schema(MetaModelSchema::from_value(&schema()).unwrap()).unwrap();
    let entries = ProjectionEntry::list_from_value(&projections).unwrap();
    let mut engine = ProjectionEngine::from_schema(model.registry(), entries);
    engine.attach(&model);
    (model, engine)
}

fn setup() -> (ConceptModel, ProjectionEngine) {
    setup_with(projections())
}

fn items(model: &ConceptModel, catalog: ConceptId) -> Vec<ConceptId> {
    model.attribute(catalog, "items").unwrap().elements().to_vec()
}

#[test]
fn renders_nested_sets_and_components() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();

    assert_eq!(
        engine.render_text(view).unwrap(),
        "Tools\nt1 Hammer, p1 Bolt (2)\nowner: Ann"
    );
    assert_eq!(engine.state(view), Some(ProjectionState::Bound));
    assert!(engine.errors().is_empty());

    let tree = engine.render_tree(view).unwrap();
    let algorithms = tree.algorithms();
    // Full set: no add affordance; the component and Part offer switching.
    assert!(!algorithms
        .iter()
        .any(|a| matches!(a, AlgorithmElement::AddElement { .. })));
    assert_eq!(
        algorithms
            .iter()
            .filter(|a| matches!(a, AlgorithmElement::SwitchProjection { .. }))
            .count(),
        2
    );
    assert_eq!(engine.len(), 3);
}

#[test]
fn cycling_returns_to_the_original_template() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    engine.project(&model, root).unwrap();
    let part = items(&model, root)[1];
    let projection = engine.projections_of(part)[0];

    assert_eq!(engine.projection(projection).unwrap().template_count, 2);
    assert_eq!(engine.change_projection(&model, projection), Ok(1));
    assert_eq!(engine.render_text(projection).unwrap(), "code | p1\nweight | 2");
    assert_eq!(engine.change_projection(&model, projection), Ok(0));
    assert_eq!(engine.render_text(projection).unwrap(), "p1 Bolt (2)");
}

#[test]
fn component_template_follows_model_index() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();

    let count = engine.component_template_count(&model, root, "meta");
    assert_eq!(count, 2);
    assert_eq!(model.change_projection(root, "meta", count), Ok(1));
    assert_eq!(engine.state(view), Some(ProjectionState::Stale));

    let report = engine.refresh(&model);
    assert_eq!(report.rerendered, vec![view]);
    assert!(engine.render_text(view).unwrap().ends_with("by Ann"));
}

#[test]
fn structure_changes_rebuild_children_on_refresh() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();
    let part = items(&model, root)[1];
    let part_view = engine.projections_of(part)[0];

    model
        .remove_element(root, &Slot::attribute("items"), part)
        .unwrap();
    let report = engine.refresh(&model);
    assert_eq!(report.destroyed, vec![part_view]);
    assert!(!engine.contains(part_view));
    assert_eq!(engine.render_text(view).unwrap(), "Tools\nt1 Hammer\nowner: Ann");

    let tree = engine.render_tree(view).unwrap();
    let add = tree
        .algorithms()
        .into_iter()
        .find_map(|a| match a {
            AlgorithmElement::AddElement { candidates, .. } => Some(candidates.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(add, vec!["Part".to_string(), "Tool".to_string()]);

    let added = model
        .add_element(
            root,
            &Slot::attribute("items"),
            Some("Tool"),
            Some(&json!({ "code": "t2", "label": "Saw" })),
        )
        .unwrap();
    engine.refresh(&model);
    assert_eq!(engine.projections_of(added).len(), 1);
    assert_eq!(
        engine.render_text(view).unwrap(),
        "Tools\nt1 Hammer, t2 Saw\nowner: Ann"
    );
}

#[test]
fn value_changes_rerender_only_dirty_projections() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();
    let tool = items(&model, root)[0];
    let tool_view = engine.projections_of(tool)[0];

    model
        .set_value(tool, &Slot::attribute("label"), AttributeValue::Text("Mallet".to_string()))
        .unwrap();
    let report = engine.refresh(&model);

    assert_eq!(report.rerendered, vec![tool_view]);
    assert!(report.destroyed.is_empty());
    assert!(engine.render_text(view).unwrap().contains("t1 Mallet"));
}

#[test]
fn identifier_projections_track_referencing_views() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();
    let tool = items(&model, root)[0];
    let tool_view = engine.projections_of(tool)[0];
    assert!(engine.refs(tool_view).is_empty());

    let pick = Slot::attribute("pick");
    model.create_attribute(root, &pick, None).unwrap();
    model.set_reference(root, &pick, Some(tool)).unwrap();
    engine.refresh(&model);

    assert_eq!(engine.refs(tool_view), vec![view]);
}

#[test]
fn restored_concepts_get_new_projections() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();
    let part = items(&model, root)[1];
    let part_view = engine.projections_of(part)[0];
    let snapshot = model.snapshot_concept(part).unwrap();

    model
        .set_value(part, &Slot::attribute("weight"), AttributeValue::Number(9.0))
        .unwrap();
    engine.refresh(&model);
    assert!(engine.render_text(view).unwrap().contains("p1 Bolt (9)"));

    model.restore(part, &snapshot).unwrap();
    let report = engine.refresh(&model);

    assert!(report.destroyed.contains(&part_view));
    let rebuilt = engine.projections_of(part);
    assert_eq!(rebuilt.len(), 1);
    assert_ne!(rebuilt[0], part_view);
    assert!(engine.render_text(view).unwrap().contains("p1 Bolt (2)"));
}

#[test]
fn one_bad_template_does_not_block_other_roots() {
    let (mut model, mut engine) = setup();
    let mut values: Vec<Value> = (0..9)
        .map(|index| json!({ "@type": "Catalog", "title": format!("C{index}") }))
        .collect();
    values.insert(4, json!({ "@type": "Gadget", "name": "odd" }));

    let report = model.load_values(&Value::Array(values));
    assert!(report.is_clean());
    let views = engine.project_roots(&model);
    assert_eq!(views.len(), 10);

    let errors = engine.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, views[4]);
    assert!(errors[0].1.contains("Gadget"));

    let rendered = views
        .iter()
        .filter(|view| !engine.projection(**view).unwrap().has_error())
        .count();
    assert_eq!(rendered, 9);
    assert!(engine.render_text(views[0]).unwrap().starts_with("C0"));
}

#[test]
fn unknown_placeholders_and_types_render_as_errors() {
    let mut entries = projections();
    entries.as_array_mut().unwrap().extend([
        json!({ "concept": "Gadget", "type": "text", "layout": "#name #missing" }),
        json!({ "concept": "Gadget", "type": "graph", "layout": "" }),
    ]);
    let (mut model, mut engine) = setup_with(entries);
    let gadget = model
        .create_concept_with("Gadget", Some(&json!({ "name": "odd" })))
        .unwrap();
    let view = engine.project(&model, gadget).unwrap();

    assert!(engine.errors().is_empty());
    let tree = engine.render_tree(view).unwrap();
    let Element::Layout(LayoutElement::Flow(parts)) = &tree else {
        panic!("concept body is a flow");
    };
    assert!(parts.iter().any(|part| part.to_text().contains("unknown placeholder `#missing`")));

    engine.change_projection(&model, view).unwrap();
    let projection = engine.projection(view).unwrap();
    assert_eq!(
        projection.error.as_deref(),
        Some("projection type `graph` is not implemented")
    );
    assert_eq!(projection.state, ProjectionState::Bound);
}

#[test]
fn removed_roots_lose_their_views() {
    let (mut model, mut engine) = setup();
    let root = model.load_values(&json!([catalog()])).loaded[0];
    let view = engine.project(&model, root).unwrap();

    model.remove_value(root).unwrap();
    let report = engine.refresh(&model);

    assert_eq!(report.destroyed.len(), 3);
    assert!(report.destroyed.contains(&view));
    assert!(engine.views().is_empty());
    assert!(engine.is_empty());
}

#[test]
fn self_embedding_component_renders_an_error() {
    let mut model = ConceptModel::from_schema(
        MetaModelSchema::from_value(&json!({
            "Note": {
                "attribute": { "text": { "type": "string" } },
                "component": [{
                    "name": "meta",
                    "attribute": { "tag": { "type": "string" } },
                    "projection": [{ "type": "text", "layout": "#tag #[meta]" }]
                }],
                "projection": [{ "type": "text", "layout": "#text | #[meta]" }]
            }
        }))
        .unwrap(),
    )
    .unwrap();
    let mut engine = ProjectionEngine::from_schema(model.registry(), Vec::new());
    engine.attach(&model);
    let note = model
        .create_concept_with("Note", Some(&json!({ "text": "hello", "meta": { "tag": "x" } })))
        .unwrap();

    let view = engine.project(&model, note).unwrap();

    assert_eq!(
        engine.render_text(view).unwrap(),
        "hello | x [error: component `Note:meta` embeds itself]"
    );
    assert_eq!(engine.state(view), Some(ProjectionState::Bound));
    assert!(engine.errors().is_empty());
}
