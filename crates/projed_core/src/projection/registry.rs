//! Projection template registry.
//!
//! # Responsibility
//! - Collect templates from inline `projection` lists and external entries.
//! - Select templates for a concept or component, falling back along the
//!   prototype chain.
//!
//! # Invariants
//! - Concept templates are keyed by concept name.
//! - Component templates are keyed by `<concept>:<component>`.
//! - Registration order is template order.

use crate::schema::definition::{ProjectionEntry, ProjectionTemplate};
use crate::schema::registry::{ResolvedConcept, SchemaRegistry};
use log::info;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::iter;

/// Template types the engine can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Text,
    Table,
}

impl ProjectionKind {
    /// # Errors
    /// Returns `UnimplementedError` for any type other than `text` or `table`.
    pub fn parse(kind: &str) -> Result<Self, UnimplementedError> {
        match kind {
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            other => Err(UnimplementedError {
                feature: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
        }
    }
}

/// Template type the engine does not render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnimplementedError {
    pub feature: String,
}

impl Display for UnimplementedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "projection type `{}` is not implemented", self.feature)
    }
}

impl Error for UnimplementedError {}

#[derive(Debug, Clone, Default)]
pub struct ProjectionRegistry {
    templates: BTreeMap<String, Vec<ProjectionTemplate>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from inline definitions, then external entries.
    pub fn from_schema(schemas: &SchemaRegistry, entries: Vec<ProjectionEntry>) -> Self {
        let mut registry = Self::new();
        for (name, definition) in schemas.definitions() {
            for template in &definition.projection {
                registry.insert(name.to_string(), template.clone());
            }
            for component in &definition.component {
                for template in &component.projection {
                    registry.insert(component_key(name, &component.name), template.clone());
                }
            }
        }
        let external = entries.len();
        for entry in entries {
            registry.add(entry);
        }
        info!(
            "event=projection_load module=projection status=ok keys={} external={}",
            registry.templates.len(),
            external
        );
        registry
    }

    pub fn add(&mut self, entry: ProjectionEntry) {
        self.insert(entry.concept, entry.template);
    }

    fn insert(&mut self, key: String, template: ProjectionTemplate) {
        self.templates.entry(key).or_default().push(template);
    }

    pub fn templates(&self, key: &str) -> &[ProjectionTemplate] {
        self.templates.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates of the concept, else of its nearest prototype ancestor.
    pub fn select_concept(&self, schema: &ResolvedConcept) -> &[ProjectionTemplate] {
        chain(schema)
            .map(|name| self.templates(name))
            .find(|templates| !templates.is_empty())
            .unwrap_or(&[])
    }

    /// Component templates with the same ancestor fallback.
    pub fn select_component(&self, schema: &ResolvedConcept, component: &str) -> &[ProjectionTemplate] {
        chain(schema)
            .map(|name| self.templates(&component_key(name, component)))
            .find(|templates| !templates.is_empty())
            .unwrap_or(&[])
    }
}

fn chain(schema: &ResolvedConcept) -> impl Iterator<Item = &str> {
    iter::once(schema.name.as_str()).chain(schema.ancestors.iter().map(String::as_str))
}

fn component_key(concept: &str, component: &str) -> String {
    format!("{concept}:{component}")
}

#[cfg(test)]
mod tests {
    use super::{ProjectionKind, ProjectionRegistry, UnimplementedError};
    use crate::schema::definition::{MetaModelSchema, ProjectionEntry};
    use crate::schema::registry::SchemaRegistry;
    use serde_json::json;

    fn schemas() -> SchemaRegistry {
        let schema = MetaModelSchema::from_value(&json!({
            "Shape": {
                "nature": "prototype",
                "projection": [{ "type": "text", "layout": "shape" }],
                "component": [{
                    "name": "style",
                    "projection": [{ "type": "text", "layout": "plain" }]
                }]
            },
            "Circle": { "prototype": "Shape" },
            "Square": { "prototype": "Shape" }
        }))
        .expect("schema should decode");
        SchemaRegistry::from_schema(schema).expect("schema should load")
    }

    #[test]
    fn falls_back_to_prototype_templates() {
        let schemas = schemas();
        let entries = ProjectionEntry::list_from_value(&json!([
            { "concept": "Square", "type": "text", "layout": "square #x" }
        ]))
        .expect("entries should decode");
        let registry = ProjectionRegistry::from_schema(&schemas, entries);

        let circle = schemas.resolve("Circle").expect("circle resolves");
        let square = schemas.resolve("Square").expect("square resolves");
        assert_eq!(registry.select_concept(&circle)[0].layout, "shape");
        assert_eq!(registry.select_concept(&square)[0].layout, "square #x");
        assert_eq!(registry.select_component(&circle, "style")[0].layout, "plain");
        assert!(registry.select_component(&circle, "missing").is_empty());
    }

    #[test]
    fn unknown_type_is_unimplemented() {
        assert_eq!(ProjectionKind::parse("table"), Ok(ProjectionKind::Table));
        assert_eq!(
            ProjectionKind::parse("graph"),
            Err(UnimplementedError {
                feature: "graph".to_string()
            })
        );
    }
}
