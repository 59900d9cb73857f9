//! Concept instances.
//!
//! # Invariants
//! - Instances are always built from a concrete resolved schema.
//! - A concept has at most one owner; roots have none.

use crate::model::attribute::{Attribute, AttributeSet, AttributeValue};
use crate::model::component::Component;
use crate::schema::definition::{AttributeSchema, Nature};
use crate::schema::registry::ResolvedConcept;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Model-unique concept identity.
pub type ConceptId = Uuid;

/// Attribute address inside one concept, optionally through a component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub component: Option<String>,
    pub attribute: String,
}

impl Slot {
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            component: None,
            attribute: name.into(),
        }
    }

    pub fn component(component: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            component: Some(component.into()),
            attribute: attribute.into(),
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.component {
            Some(component) => write!(f, "{component}.{}", self.attribute),
            None => write!(f, "{}", self.attribute),
        }
    }
}

/// Owning attribute of a non-root concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub concept: ConceptId,
    pub slot: Slot,
}

/// One live concept instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Concept {
    id: ConceptId,
    parent: Option<ParentLink>,
    schema: Arc<ResolvedConcept>,
    attributes: AttributeSet,
    components: Vec<Component>,
}

impl Concept {
    pub(crate) fn new(
        id: ConceptId,
        parent: Option<ParentLink>,
        schema: Arc<ResolvedConcept>,
        attributes: AttributeSet,
        components: Vec<Component>,
    ) -> Self {
        Self {
            id,
            parent,
            schema,
            attributes,
            components,
        }
    }

    pub fn id(&self) -> ConceptId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn nature(&self) -> Nature {
        self.schema.nature
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ParentLink>) {
        self.parent = parent;
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn schema(&self) -> &Arc<ResolvedConcept> {
        &self.schema
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

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|component| component.name() == name)
    }

    pub(crate) fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components
            .iter_mut()
            .find(|component| component.name() == name)
    }

    pub(crate) fn push_component(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Declaration behind `slot`, whether or not it is materialized.
    pub fn declared(&self, slot: &Slot) -> Option<&AttributeSchema> {
        match &slot.component {
            Some(component) => self
                .schema
                .component(component)
                .and_then(|schema| schema.attribute.get(&slot.attribute)),
            None => self.schema.attributes.get(&slot.attribute),
        }
    }

    pub fn slot(&self, slot: &Slot) -> Option<&Attribute> {
        match &slot.component {
            Some(component) => self.component(component)?.attribute(&slot.attribute),
            None => self.attribute(&slot.attribute),
        }
    }

    pub(crate) fn slot_mut(&mut self, slot: &Slot) -> Option<&mut Attribute> {
        match &slot.component {
            Some(component) => self
                .component_mut(component)?
                .attributes_mut()
                .get_mut(&slot.attribute),
            None => self.attributes.get_mut(&slot.attribute),
        }
    }

    pub fn is_attribute_created(&self, name: &str) -> bool {
        self.attributes.contains(name)
    }

    /// Declared optional attributes not created yet.
    pub fn optional_attributes(&self) -> Vec<&str> {
        self.schema
            .attributes
            .iter()
            .filter(|(name, schema)| !schema.required && !self.is_attribute_created(name))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Declared optional components not created yet.
    pub fn optional_components(&self) -> Vec<&str> {
        self.schema
            .components
            .iter()
            .filter(|schema| !schema.required && self.component(&schema.name).is_none())
            .map(|schema| schema.name.as_str())
            .collect()
    }

    /// Value of the identifying attribute, used as reference key.
    pub fn id_value(&self) -> Option<&str> {
        let name = self.schema.id_attribute()?;
        match self.attribute(name)?.value() {
            AttributeValue::Identifier(value) | AttributeValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Directly owned sub-concepts in declaration order.
    pub fn owned_children(&self) -> Vec<ConceptId> {
        let mut children: Vec<ConceptId> = self.attributes.iter().flat_map(Attribute::owned).collect();
        for component in &self.components {
            children.extend(component.attributes().iter().flat_map(Attribute::owned));
        }
        children
    }

    /// Materialized slots holding a reference to `target`.
    pub fn references_to(&self, target: ConceptId) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .attributes
            .iter()
            .filter(|attribute| *attribute.value() == AttributeValue::Reference(target))
            .map(|attribute| Slot::attribute(attribute.name()))
            .collect();
        for component in &self.components {
            slots.extend(
                component
                    .attributes()
                    .iter()
                    .filter(|attribute| *attribute.value() == AttributeValue::Reference(target))
                    .map(|attribute| Slot::component(component.name(), attribute.name())),
            );
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::Slot;

    #[test]
    fn slot_display_includes_component_prefix() {
        assert_eq!(Slot::attribute("name").to_string(), "name");
        assert_eq!(Slot::component("address", "city").to_string(), "address.city");
    }
}
