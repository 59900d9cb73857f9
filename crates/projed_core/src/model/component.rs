//! Named attribute groups inside a concept.

use crate::model::attribute::{Attribute, AttributeSet};
use crate::schema::definition::{AttributeSchema, ComponentSchema};

/// Materialized component of one concept instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    name: String,
    full_name: String,
    schema: ComponentSchema,
    attributes: AttributeSet,
    projection_index: usize,
}

impl Component {
    pub(crate) fn new(concept_name: &str, schema: ComponentSchema, attributes: AttributeSet) -> Self {
        Self {
            name: schema.name.clone(),
            full_name: format!("{concept_name}:{}", schema.name),
            schema,
            attributes,
            projection_index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<concept>:<component>`, the key used for component templates.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn schema(&self) -> &ComponentSchema {
        &self.schema
    }

    pub fn is_required(&self) -> bool {
        self.schema.required
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn declared(&self, name: &str) -> Option<&AttributeSchema> {
        self.schema.attribute.get(name)
    }

    /// Distinguishes a declared-but-absent attribute from a materialized one.
    pub fn is_attribute_created(&self, name: &str) -> bool {
        self.attributes.contains(name)
    }

    /// Declared optional attributes not created yet.
    pub fn optional_attributes(&self) -> Vec<&str> {
        self.schema
            .attribute
            .iter()
            .filter(|(name, schema)| !schema.required && !self.is_attribute_created(name))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn projection_index(&self) -> usize {
        self.projection_index
    }

    /// Advances the active template index by one, modulo `template_count`.
    pub fn change_projection(&mut self, template_count: usize) -> usize {
        self.projection_index = (self.projection_index + 1) % template_count.max(1);
        self.projection_index
    }

    pub(crate) fn set_projection_index(&mut self, index: usize) {
        self.projection_index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::Component;
    use crate::model::attribute::AttributeSet;
    use crate::schema::definition::{AttributeSchema, ComponentSchema, ValueType};
    use std::collections::BTreeMap;

    fn component() -> Component {
        let mut optional = AttributeSchema::new(ValueType::String);
        optional.required = false;
        let schema = ComponentSchema {
            name: "address".to_string(),
            attribute: BTreeMap::from([
                ("city".to_string(), AttributeSchema::new(ValueType::String)),
                ("zip".to_string(), optional),
            ]),
            projection: Vec::new(),
            required: true,
        };
        Component::new("Person", schema, AttributeSet::default())
    }

    #[test]
    fn full_name_joins_concept_and_component() {
        assert_eq!(component().full_name(), "Person:address");
    }

    #[test]
    fn change_projection_cycles_back_to_start() {
        let mut component = component();
        let count = 3;
        for _ in 0..count {
            component.change_projection(count);
        }
        assert_eq!(component.projection_index(), 0);
        assert_eq!(component.change_projection(0), 0);
    }

    #[test]
    fn optional_attributes_lists_absent_optionals_only() {
        assert_eq!(component().optional_attributes(), vec!["zip"]);
    }
}
