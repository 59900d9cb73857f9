//! Concept model: the single owner of live concept state.
//!
//! # Responsibility
//! - Instantiate concepts from resolved schemas, with or without input values.
//! - Apply every structural and value mutation and publish notifications.
//! - Export, snapshot, and restore concept subtrees.
//!
//! # Invariants
//! - Concept creation is all-or-nothing: a subtree is built in a staging area
//!   and committed only when every part of it is valid.
//! - Required attributes are initialized eagerly; optional ones only on demand.
//! - Set element counts stay within declared `min`/`max` after any mutation.
//! - Identifier values are unique across the model.
//! - Every committed mutation is followed by exactly one notification.

use crate::logging::sanitize_message;
use crate::model::attribute::{
    primitive_default, scalar_from_json, scalar_to_json, Attribute, AttributeSet, AttributeValue,
};
use crate::model::component::Component;
use crate::model::concept::{Concept, ConceptId, ParentLink, Slot};
use crate::model::snapshot::{
    AttributeSnapshot, ComponentSnapshot, ConceptSnapshot, ModelSnapshot, SnapshotValue,
};
use crate::notify::bus::{
    ChangeKind, ChangeSource, Listener, ListenerId, Message, Notification, ObserverBus,
};
use crate::schema::definition::{AttributeSchema, ComponentSchema, MetaModelSchema, Nature, ValueType};
use crate::schema::registry::{InvalidMetaModelError, SchemaRegistry};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Key naming the concrete concept type of a value object.
pub const TYPE_KEY: &str = "@type";

const MAX_LOGGED_KEY_CHARS: usize = 64;

/// Concept or value payload does not conform to the schema.
///
/// Slot fields use the `<Concept>.<attribute>` path form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidModelError {
    UnknownConcept(String),
    /// Prototype concepts are never instantiated.
    AbstractConcept(String),
    /// Root value carries no `@type` and the schema declares no `@root`.
    MissingType,
    ConceptNotFound(ConceptId),
    UnknownAttribute { concept: String, attribute: String },
    UnknownComponent { concept: String, component: String },
    AttributeExists(String),
    AttributeNotCreated(String),
    ComponentExists(String),
    ComponentNotCreated(String),
    MissingRequiredValue(String),
    /// Required attributes cannot be removed.
    RequiredAttribute(String),
    TypeMismatch {
        slot: String,
        expected: String,
        found: String,
    },
    NotAccepted { slot: String, concept: String },
    AmbiguousType { slot: String, candidates: Vec<String> },
    NoConcreteType { slot: String },
    Cardinality {
        slot: String,
        count: usize,
        min: usize,
        max: Option<usize>,
    },
    ElementNotFound { slot: String, element: ConceptId },
    DuplicateId(String),
}

impl Display for InvalidModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownConcept(name) => write!(f, "unknown concept type: {name}"),
            Self::AbstractConcept(name) => {
                write!(f, "prototype concept cannot be instantiated: {name}")
            }
            Self::MissingType => write!(f, "value carries no `@type` and no root is declared"),
            Self::ConceptNotFound(id) => write!(f, "concept not found: {id}"),
            Self::UnknownAttribute { concept, attribute } => {
                write!(f, "concept `{concept}` declares no attribute `{attribute}`")
            }
            Self::UnknownComponent { concept, component } => {
                write!(f, "concept `{concept}` declares no component `{component}`")
            }
            Self::AttributeExists(slot) => write!(f, "attribute already created: {slot}"),
            Self::AttributeNotCreated(slot) => write!(f, "attribute not created: {slot}"),
            Self::ComponentExists(name) => write!(f, "component already created: {name}"),
            Self::ComponentNotCreated(name) => write!(f, "component not created: {name}"),
            Self::MissingRequiredValue(slot) => write!(f, "required attribute needs a value: {slot}"),
            Self::RequiredAttribute(slot) => write!(f, "required attribute cannot be removed: {slot}"),
            Self::TypeMismatch {
                slot,
                expected,
                found,
            } => write!(f, "attribute `{slot}` expects {expected}, got {found}"),
            Self::NotAccepted { slot, concept } => {
                write!(f, "attribute `{slot}` does not accept concept `{concept}`")
            }
            Self::AmbiguousType { slot, candidates } => write!(
                f,
                "attribute `{slot}` needs an explicit `@type`, candidates: {}",
                candidates.join(", ")
            ),
            Self::NoConcreteType { slot } => {
                write!(f, "attribute `{slot}` has no concrete candidate type")
            }
            Self::Cardinality {
                slot,
                count,
                min,
                max,
            } => match max {
                Some(max) => write!(
                    f,
                    "attribute `{slot}` would hold {count} elements, allowed {min}..={max}"
                ),
                None => write!(
                    f,
                    "attribute `{slot}` would hold {count} elements, at least {min} required"
                ),
            },
            Self::ElementNotFound { slot, element } => {
                write!(f, "attribute `{slot}` holds no element {element}")
            }
            Self::DuplicateId(value) => write!(f, "identifier already in use: {value}"),
        }
    }
}

impl Error for InvalidModelError {}

pub type ModelResult<T> = Result<T, InvalidModelError>;

/// One root value rejected by `load_values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// Position in the input array.
    pub index: usize,
    pub error: InvalidModelError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<ConceptId>,
    pub errors: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
struct PendingRef {
    concept: ConceptId,
    slot: Slot,
    accept: Vec<String>,
    key: String,
}

/// Concepts built but not yet visible in the model.
#[derive(Debug, Default)]
struct Staging {
    concepts: Vec<Concept>,
    pending_refs: Vec<PendingRef>,
}

/// Typed concept graph with ownership tree and reference links.
#[derive(Debug)]
pub struct ConceptModel {
    registry: SchemaRegistry,
    concepts: BTreeMap<ConceptId, Concept>,
    roots: Vec<ConceptId>,
    bus: ObserverBus,
    source: ChangeSource,
}

impl ConceptModel {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            concepts: BTreeMap::new(),
            roots: Vec::new(),
            bus: ObserverBus::new(),
            source: ChangeSource::Api,
        }
    }

    pub fn from_schema(schema: MetaModelSchema) -> Result<Self, InvalidMetaModelError> {
        Ok(Self::new(SchemaRegistry::from_schema(schema)?))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Merges more concept definitions; existing instances keep their schema.
    pub fn add_concept_schema(
        &mut self,
        schema: MetaModelSchema,
    ) -> Result<usize, InvalidMetaModelError> {
        self.registry.add_concept_schema(schema)
    }

    pub fn bus(&self) -> &ObserverBus {
        &self.bus
    }

    pub fn register<L>(&self, listener: L) -> ListenerId
    where
        L: Listener + 'static,
    {
        self.bus.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.bus.unregister(id)
    }

    pub fn unregister_all(&self) {
        self.bus.unregister_all();
    }

    /// Sets the source stamped on later notifications; returns the previous one.
    pub fn set_source(&mut self, source: ChangeSource) -> ChangeSource {
        std::mem::replace(&mut self.source, source)
    }

    pub fn source(&self) -> ChangeSource {
        self.source
    }

    pub fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    pub fn contains(&self, id: ConceptId) -> bool {
        self.concepts.contains_key(&id)
    }

    pub fn attribute(&self, id: ConceptId, name: &str) -> Option<&Attribute> {
        self.concepts.get(&id)?.attribute(name)
    }

    pub fn component(&self, id: ConceptId, name: &str) -> Option<&Component> {
        self.concepts.get(&id)?.component(name)
    }

    pub fn component_attribute(
        &self,
        id: ConceptId,
        component: &str,
        name: &str,
    ) -> Option<&Attribute> {
        self.component(id, component)?.attribute(name)
    }

    /// Concepts without a parent, in insertion order.
    pub fn root_concepts(&self) -> &[ConceptId] {
        &self.roots
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Owners of `id`, nearest first.
    pub fn ancestors(&self, id: ConceptId) -> Vec<ConceptId> {
        let mut ancestors = Vec::new();
        let mut cursor = self.concepts.get(&id).and_then(Concept::parent);
        while let Some(link) = cursor {
            ancestors.push(link.concept);
            cursor = self.concepts.get(&link.concept).and_then(Concept::parent);
        }
        ancestors
    }

    /// Concepts holding a reference to `target`.
    pub fn referrers(&self, target: ConceptId) -> Vec<ConceptId> {
        self.concepts
            .values()
            .filter(|concept| !concept.references_to(target).is_empty())
            .map(Concept::id)
            .collect()
    }

    /// Finds a concept satisfying `accept` by identifier value or uuid string.
    pub fn find_by_key(&self, accept: &[String], key: &str) -> Option<ConceptId> {
        self.concepts
            .values()
            .filter(|concept| {
                accept
                    .iter()
                    .any(|candidate| concept.schema().conforms_to(candidate))
            })
            .find(|concept| concept.id_value() == Some(key) || concept.id().to_string() == key)
            .map(Concept::id)
    }

    /// Identifier value of a concept, or its type name when it has none.
    pub fn display_label(&self, id: ConceptId) -> String {
        self.concepts
            .get(&id)
            .map(|concept| concept.id_value().unwrap_or(concept.name()).to_string())
            .unwrap_or_default()
    }

    /// Creates a root concept with required parts initialized.
    pub fn create_concept(&mut self, type_name: &str) -> ModelResult<ConceptId> {
        self.create_concept_with(type_name, None)
    }

    /// Creates a root concept from an optional value object.
    ///
    /// # Errors
    /// - `UnknownConcept` / `AbstractConcept` for an unknown or prototype name.
    /// - Any payload mismatch in `values`; nothing is committed in that case.
    pub fn create_concept_with(
        &mut self,
        type_name: &str,
        values: Option<&Value>,
    ) -> ModelResult<ConceptId> {
        let mut staging = Staging::default();
        let id = self
            .build_concept(&mut staging, type_name, values, None)
            .and_then(|id| self.check_identifiers(&staging).map(|()| id))
            .map_err(|err| {
                warn!(
                    "event=concept_create module=model status=error concept={} error={}",
                    sanitize_message(type_name, MAX_LOGGED_KEY_CHARS),
                    err
                );
                err
            })?;

        let pending = self.insert_staged(staging);
        self.roots.push(id);
        self.resolve_pending(pending);

        info!(
            "event=concept_create module=model status=ok concept={} id={}",
            type_name, id
        );
        self.emit(
            Message::StructureChanged,
            Some(id),
            None,
            ChangeKind::ConceptCreated,
            Vec::new(),
        );
        Ok(id)
    }

    /// Imports root values in the shape produced by [`ConceptModel::export`].
    ///
    /// Each root is created independently; a failing root is reported and the
    /// rest of the batch continues. References are resolved once every root is
    /// built, so they may point across roots.
    pub fn load_values(&mut self, values: &Value) -> LoadReport {
        let items: Vec<&Value> = match values {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let previous = self.set_source(ChangeSource::Load);
        let mut report = LoadReport::default();
        let mut pending = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            let staged = self
                .stage_root(item)
                .and_then(|(id, staging)| self.check_identifiers(&staging).map(|()| (id, staging)));
            match staged {
                Ok((id, staging)) => {
                    pending.extend(self.insert_staged(staging));
                    self.roots.push(id);
                    report.loaded.push(id);
                }
                Err(error) => {
                    warn!(
                        "event=load_root module=model status=error index={} error={}",
                        index, error
                    );
                    report.errors.push(LoadFailure { index, error });
                }
            }
        }

        self.resolve_pending(pending);
        for id in &report.loaded {
            self.emit(
                Message::StructureChanged,
                Some(*id),
                None,
                ChangeKind::ConceptCreated,
                Vec::new(),
            );
        }
        self.source = previous;

        info!(
            "event=load_values module=model status={} loaded={} failed={}",
            if report.is_clean() { "ok" } else { "partial" },
            report.loaded.len(),
            report.errors.len()
        );
        report
    }

    /// Materializes a declared attribute that is not created yet.
    ///
    /// Without `initial`, the attribute is initialized as if it were required.
    pub fn create_attribute(
        &mut self,
        concept: ConceptId,
        slot: &Slot,
        initial: Option<&Value>,
    ) -> ModelResult<()> {
        let owner = self
            .concepts
            .get(&concept)
            .ok_or(InvalidModelError::ConceptNotFound(concept))?;
        let path = slot_path(owner, slot);
        let declared = owner
            .declared(slot)
            .cloned()
            .ok_or_else(|| unknown_slot(owner, slot))?;
        if let Some(component) = &slot.component {
            if owner.component(component).is_none() {
                return Err(InvalidModelError::ComponentNotCreated(format!(
                    "{}:{component}",
                    owner.name()
                )));
            }
        }
        if owner.slot(slot).is_some() {
            return Err(InvalidModelError::AttributeExists(path));
        }
        let concept_name = owner.name().to_string();

        let mut staging = Staging::default();
        let attribute = self
            .build_attribute(
                &mut staging,
                concept,
                &concept_name,
                slot.clone(),
                &declared,
                initial,
                true,
            )?
            .ok_or_else(|| InvalidModelError::MissingRequiredValue(path.clone()))?;
        self.check_identifiers(&staging)?;
        if let AttributeValue::Identifier(value) = attribute.value() {
            if self.identifier_taken(value, concept) {
                return Err(InvalidModelError::DuplicateId(value.clone()));
            }
        }

        let pending = self.insert_staged(staging);
        if let Some(owner) = self.concepts.get_mut(&concept) {
            match &slot.component {
                Some(component) => {
                    if let Some(component) = owner.component_mut(component) {
                        component.attributes_mut().push(attribute);
                    }
                }
                None => owner.attributes_mut().push(attribute),
            }
        }
        self.resolve_pending(pending);

        debug!("event=attribute_create module=model status=ok slot={}", path);
        self.emit(
            Message::StructureChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::AttributeCreated,
            Vec::new(),
        );
        Ok(())
    }

    /// Deletes an optional attribute and every concept it owns.
    ///
    /// Returns the removed concept ids.
    pub fn remove_attribute(&mut self, concept: ConceptId, slot: &Slot) -> ModelResult<Vec<ConceptId>> {
        let owned = {
            let attribute = self.attribute_ref(concept, slot)?;
            if attribute.is_required() {
                return Err(InvalidModelError::RequiredAttribute(self.path(concept, slot)));
            }
            attribute.owned()
        };

        if let Some(owner) = self.concepts.get_mut(&concept) {
            match &slot.component {
                Some(component) => {
                    if let Some(component) = owner.component_mut(component) {
                        component.attributes_mut().remove(&slot.attribute);
                    }
                }
                None => {
                    owner.attributes_mut().remove(&slot.attribute);
                }
            }
        }
        let removed = self.remove_subtrees(&owned);
        self.clear_references(&removed);

        self.emit(
            Message::StructureChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::AttributeRemoved,
            removed.clone(),
        );
        Ok(removed)
    }

    /// Materializes a declared component that is not created yet.
    pub fn create_component(&mut self, concept: ConceptId, name: &str) -> ModelResult<()> {
        let owner = self
            .concepts
            .get(&concept)
            .ok_or(InvalidModelError::ConceptNotFound(concept))?;
        let declared = owner.schema().component(name).cloned().ok_or_else(|| {
            InvalidModelError::UnknownComponent {
                concept: owner.name().to_string(),
                component: name.to_string(),
            }
        })?;
        if owner.component(name).is_some() {
            return Err(InvalidModelError::ComponentExists(format!(
                "{}:{name}",
                owner.name()
            )));
        }
        let concept_name = owner.name().to_string();

        let mut staging = Staging::default();
        let component =
            self.build_component(&mut staging, concept, &concept_name, &declared, None)?;
        self.check_identifiers(&staging)?;

        let pending = self.insert_staged(staging);
        if let Some(owner) = self.concepts.get_mut(&concept) {
            owner.push_component(component);
        }
        self.resolve_pending(pending);

        self.emit(
            Message::StructureChanged,
            Some(concept),
            None,
            ChangeKind::ComponentCreated,
            Vec::new(),
        );
        Ok(())
    }

    /// Sets a primitive attribute value.
    ///
    /// # Errors
    /// - `TypeMismatch` when `value` does not fit the declared primitive type.
    /// - `MissingRequiredValue` when unsetting a required attribute.
    /// - `DuplicateId` when an identifier value is taken by another concept.
    pub fn set_value(&mut self, concept: ConceptId, slot: &Slot, value: AttributeValue) -> ModelResult<()> {
        let path = self.path(concept, slot);
        let attribute = self.attribute_ref(concept, slot)?;
        let kind = attribute.kind().clone();
        if !kind.is_primitive() || !value.matches(&kind) {
            return Err(InvalidModelError::TypeMismatch {
                slot: path,
                expected: kind.as_str().to_string(),
                found: value.kind_name().to_string(),
            });
        }
        if value.is_unset() && attribute.is_required() {
            return Err(InvalidModelError::MissingRequiredValue(path));
        }
        if *attribute.value() == value {
            return Ok(());
        }
        let key = match &value {
            AttributeValue::Identifier(key) => Some(key),
            AttributeValue::Text(key) if self.is_key_slot(concept, slot) => Some(key),
            _ => None,
        };
        if let Some(key) = key {
            if self.identifier_taken(key, concept) {
                return Err(InvalidModelError::DuplicateId(key.clone()));
            }
        }

        self.attribute_mut(concept, slot)?.set_value(value);
        debug!("event=value_set module=model status=ok slot={}", path);
        self.emit(
            Message::ValueChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::ValueSet,
            Vec::new(),
        );
        Ok(())
    }

    /// Points a reference attribute at `target`, or clears it with `None`.
    ///
    /// # Errors
    /// - `MissingRequiredValue` when clearing a required reference.
    pub fn set_reference(
        &mut self,
        concept: ConceptId,
        slot: &Slot,
        target: Option<ConceptId>,
    ) -> ModelResult<()> {
        let path = self.path(concept, slot);
        let attribute = self.attribute_ref(concept, slot)?;
        if *attribute.kind() != ValueType::Reference {
            return Err(InvalidModelError::TypeMismatch {
                slot: path,
                expected: attribute.kind().as_str().to_string(),
                found: "reference".to_string(),
            });
        }
        let value = match target {
            Some(target) => {
                let target_concept = self
                    .concepts
                    .get(&target)
                    .ok_or(InvalidModelError::ConceptNotFound(target))?;
                if !self
                    .registry
                    .accepts(&attribute.schema().accept, target_concept.name())
                {
                    return Err(InvalidModelError::NotAccepted {
                        slot: path,
                        concept: target_concept.name().to_string(),
                    });
                }
                AttributeValue::Reference(target)
            }
            None if attribute.is_required() => {
                return Err(InvalidModelError::MissingRequiredValue(path));
            }
            None => AttributeValue::Unset,
        };

        self.attribute_mut(concept, slot)?.set_value(value);
        self.emit(
            Message::ValueChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::ValueSet,
            Vec::new(),
        );
        Ok(())
    }

    /// Replaces the sub-concept of a concept-typed attribute.
    ///
    /// `type_name` picks the concrete type; otherwise `@type` in `values` or
    /// the single concrete candidate decides. Returns the new concept id.
    pub fn assign_concept(
        &mut self,
        concept: ConceptId,
        slot: &Slot,
        type_name: Option<&str>,
        values: Option<&Value>,
    ) -> ModelResult<ConceptId> {
        let path = self.path(concept, slot);
        let attribute = self.attribute_ref(concept, slot)?;
        let ValueType::Concept(declared) = attribute.kind() else {
            return Err(InvalidModelError::TypeMismatch {
                slot: path,
                expected: attribute.kind().as_str().to_string(),
                found: "concept".to_string(),
            });
        };
        let accept = vec![declared.clone()];
        let concrete = self.choose_type(&accept, type_name, values, &path)?;

        let mut staging = Staging::default();
        let link = ParentLink {
            concept,
            slot: slot.clone(),
        };
        let id = self.build_concept(&mut staging, &concrete, values, Some(link))?;
        self.check_identifiers(&staging)?;

        let pending = self.insert_staged(staging);
        let previous = self
            .attribute_mut(concept, slot)?
            .set_value(AttributeValue::Concept(id));
        let removed = match previous {
            AttributeValue::Concept(old) => self.remove_subtrees(&[old]),
            _ => Vec::new(),
        };
        self.clear_references(&removed);
        self.resolve_pending(pending);

        self.emit(
            Message::StructureChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::ValueSet,
            removed,
        );
        Ok(id)
    }

    /// Appends a new element to a set attribute.
    ///
    /// # Errors
    /// - `Cardinality` when the set already holds `max` elements.
    /// - `NotAccepted` when `type_name` is outside the set's `accept` list.
    pub fn add_element(
        &mut self,
        concept: ConceptId,
        slot: &Slot,
        type_name: Option<&str>,
        values: Option<&Value>,
    ) -> ModelResult<ConceptId> {
        let path = self.path(concept, slot);
        let attribute = self.attribute_ref(concept, slot)?;
        if *attribute.kind() != ValueType::Set {
            return Err(InvalidModelError::TypeMismatch {
                slot: path,
                expected: attribute.kind().as_str().to_string(),
                found: "set".to_string(),
            });
        }
        if !attribute.can_add_element() {
            return Err(InvalidModelError::Cardinality {
                slot: path,
                count: attribute.elements().len() + 1,
                min: attribute.min(),
                max: attribute.max(),
            });
        }
        let accept = attribute.schema().accept.clone();
        let concrete = self.choose_type(&accept, type_name, values, &path)?;

        let mut staging = Staging::default();
        let link = ParentLink {
            concept,
            slot: slot.clone(),
        };
        let id = self.build_concept(&mut staging, &concrete, values, Some(link))?;
        self.check_identifiers(&staging)?;

        let pending = self.insert_staged(staging);
        if let AttributeValue::Set(elements) = self.attribute_mut(concept, slot)?.value_mut() {
            elements.push(id);
        }
        self.resolve_pending(pending);

        self.emit(
            Message::StructureChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::ElementAdded(id),
            Vec::new(),
        );
        Ok(id)
    }

    /// Removes one element of a set attribute with its subtree.
    pub fn remove_element(
        &mut self,
        concept: ConceptId,
        slot: &Slot,
        element: ConceptId,
    ) -> ModelResult<Vec<ConceptId>> {
        let path = self.path(concept, slot);
        let attribute = self.attribute_ref(concept, slot)?;
        if !attribute.elements().contains(&element) {
            return Err(InvalidModelError::ElementNotFound {
                slot: path,
                element,
            });
        }
        if !attribute.can_remove_element() {
            return Err(InvalidModelError::Cardinality {
                slot: path,
                count: attribute.elements().len() - 1,
                min: attribute.min(),
                max: attribute.max(),
            });
        }

        if let AttributeValue::Set(elements) = self.attribute_mut(concept, slot)?.value_mut() {
            elements.retain(|known| *known != element);
        }
        let removed = self.remove_subtrees(&[element]);
        self.clear_references(&removed);

        self.emit(
            Message::StructureChanged,
            Some(concept),
            Some(slot.clone()),
            ChangeKind::ElementRemoved(element),
            removed.clone(),
        );
        Ok(removed)
    }

    /// Structural delete of one concept.
    ///
    /// Roots leave the root list; set elements leave their set; other owned
    /// concepts take their optional owning attribute with them.
    pub fn remove_value(&mut self, id: ConceptId) -> ModelResult<Vec<ConceptId>> {
        let concept = self
            .concepts
            .get(&id)
            .ok_or(InvalidModelError::ConceptNotFound(id))?;

        let Some(link) = concept.parent().cloned() else {
            self.roots.retain(|root| *root != id);
            let removed = self.remove_subtrees(&[id]);
            self.clear_references(&removed);
            info!("event=concept_remove module=model status=ok id={}", id);
            self.emit(
                Message::StructureChanged,
                Some(id),
                None,
                ChangeKind::ConceptRemoved,
                removed.clone(),
            );
            return Ok(removed);
        };

        let owning = self.attribute_ref(link.concept, &link.slot)?;
        if *owning.kind() == ValueType::Set {
            self.remove_element(link.concept, &link.slot, id)
        } else if owning.is_optional() {
            self.remove_attribute(link.concept, &link.slot)
        } else {
            Err(InvalidModelError::RequiredAttribute(
                self.path(link.concept, &link.slot),
            ))
        }
    }

    /// Advances the template index of a component; returns the new index.
    pub fn change_projection(
        &mut self,
        concept: ConceptId,
        component: &str,
        template_count: usize,
    ) -> ModelResult<usize> {
        let owner = self
            .concepts
            .get_mut(&concept)
            .ok_or(InvalidModelError::ConceptNotFound(concept))?;
        let concept_name = owner.name().to_string();
        let index = owner
            .component_mut(component)
            .ok_or_else(|| {
                InvalidModelError::ComponentNotCreated(format!("{concept_name}:{component}"))
            })?
            .change_projection(template_count);

        self.emit(
            Message::StructureChanged,
            Some(concept),
            None,
            ChangeKind::ProjectionChanged,
            Vec::new(),
        );
        Ok(index)
    }

    /// Plain values of every root, each tagged with `@type`.
    pub fn export(&self) -> Value {
        Value::Array(
            self.roots
                .iter()
                .filter_map(|id| self.export_concept(*id))
                .collect(),
        )
    }

    pub fn export_concept(&self, id: ConceptId) -> Option<Value> {
        let concept = self.concepts.get(&id)?;
        let mut object = Map::new();
        object.insert(TYPE_KEY.to_string(), Value::String(concept.name().to_string()));
        for attribute in concept.attributes().iter() {
            if let Some(value) = self.export_value(attribute) {
                object.insert(attribute.name().to_string(), value);
            }
        }
        for component in concept.components() {
            let mut inner = Map::new();
            for attribute in component.attributes().iter() {
                if let Some(value) = self.export_value(attribute) {
                    inner.insert(attribute.name().to_string(), value);
                }
            }
            object.insert(component.name().to_string(), Value::Object(inner));
        }
        Some(Value::Object(object))
    }

    /// Raw scalar for primitives, `{ name: value }` for structural attributes.
    pub fn export_attribute(&self, id: ConceptId, name: &str) -> Option<Value> {
        let attribute = self.attribute(id, name)?;
        let value = self.export_value(attribute)?;
        if attribute.kind().is_primitive() {
            return Some(value);
        }
        let mut object = Map::new();
        object.insert(name.to_string(), value);
        Some(Value::Object(object))
    }

    /// Display strings of a component's attributes keyed `<concept>:<attribute>`.
    pub fn component_strings(
        &self,
        id: ConceptId,
        component: &str,
    ) -> Option<BTreeMap<String, String>> {
        let concept = self.concepts.get(&id)?;
        let component = concept.component(component)?;
        Some(
            component
                .attributes()
                .iter()
                .map(|attribute| {
                    (
                        format!("{}:{}", concept.name(), attribute.name()),
                        self.value_label(attribute),
                    )
                })
                .collect(),
        )
    }

    /// Display text of an attribute value, following references and children.
    pub fn value_label(&self, attribute: &Attribute) -> String {
        match attribute.value() {
            AttributeValue::Reference(target) => self.reference_key(*target),
            AttributeValue::Concept(child) => self.display_label(*child),
            AttributeValue::Set(elements) => elements
                .iter()
                .map(|element| self.display_label(*element))
                .collect::<Vec<_>>()
                .join(", "),
            scalar => scalar.display(),
        }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            roots: self
                .roots
                .iter()
                .filter_map(|id| self.snapshot_concept(*id))
                .collect(),
        }
    }

    /// Deep copy of one concept subtree.
    pub fn snapshot_concept(&self, id: ConceptId) -> Option<ConceptSnapshot> {
        let concept = self.concepts.get(&id)?;
        Some(ConceptSnapshot {
            id,
            name: concept.name().to_string(),
            attributes: concept
                .attributes()
                .iter()
                .map(|attribute| self.snapshot_attribute(attribute))
                .collect(),
            components: concept
                .components()
                .iter()
                .map(|component| ComponentSnapshot {
                    name: component.name().to_string(),
                    projection_index: component.projection_index(),
                    attributes: component
                        .attributes()
                        .iter()
                        .map(|attribute| self.snapshot_attribute(attribute))
                        .collect(),
                })
                .collect(),
        })
    }

    /// Rebuilds `id` from `snapshot` in the same position.
    ///
    /// The old subtree is removed; snapshot ids are reused, so references
    /// into the restored subtree keep working. Returns the restored root id.
    pub fn restore(&mut self, id: ConceptId, snapshot: &ConceptSnapshot) -> ModelResult<ConceptId> {
        let parent = self
            .concepts
            .get(&id)
            .ok_or(InvalidModelError::ConceptNotFound(id))?
            .parent()
            .cloned();
        let replaced: BTreeSet<ConceptId> = self.subtree_ids(id).into_iter().collect();
        if let Some(conflict) = snapshot
            .subtree_ids()
            .into_iter()
            .find(|candidate| self.concepts.contains_key(candidate) && !replaced.contains(candidate))
        {
            return Err(InvalidModelError::DuplicateId(conflict.to_string()));
        }

        let mut staging = Staging::default();
        let restored = self.build_from_snapshot(&mut staging, snapshot, parent.clone())?;

        let removed = self.remove_subtrees(&[id]);
        let inserted: Vec<ConceptId> = staging.concepts.iter().map(Concept::id).collect();
        self.insert_staged(staging);
        match &parent {
            Some(link) => self.replace_owned(link, id, restored),
            None => {
                if let Some(position) = self.roots.iter().position(|root| *root == id) {
                    self.roots[position] = restored;
                }
            }
        }
        self.prune_dangling(&inserted);
        let gone: Vec<ConceptId> = removed
            .into_iter()
            .filter(|candidate| !self.concepts.contains_key(candidate))
            .collect();
        self.clear_references(&gone);

        info!(
            "event=concept_restore module=model status=ok replaced={} restored={}",
            id, restored
        );
        self.emit(
            Message::StructureChanged,
            Some(restored),
            parent.map(|link| link.slot),
            ChangeKind::Restored {
                replaced: id,
                restored,
            },
            gone,
        );
        Ok(restored)
    }

    /// Restores a root snapshot in place, or appends it when its id is gone.
    pub fn restore_root(&mut self, snapshot: &ConceptSnapshot) -> ModelResult<ConceptId> {
        if self.concepts.contains_key(&snapshot.id) {
            return self.restore(snapshot.id, snapshot);
        }
        if let Some(conflict) = snapshot
            .subtree_ids()
            .into_iter()
            .find(|candidate| self.concepts.contains_key(candidate))
        {
            return Err(InvalidModelError::DuplicateId(conflict.to_string()));
        }

        let mut staging = Staging::default();
        let id = self.build_from_snapshot(&mut staging, snapshot, None)?;
        let inserted: Vec<ConceptId> = staging.concepts.iter().map(Concept::id).collect();
        self.insert_staged(staging);
        self.roots.push(id);
        self.prune_dangling(&inserted);

        self.emit(
            Message::StructureChanged,
            Some(id),
            None,
            ChangeKind::ConceptCreated,
            Vec::new(),
        );
        Ok(id)
    }

    /// Replaces every root with the snapshot's roots.
    pub fn replace_all(&mut self, snapshot: &ModelSnapshot) -> ModelResult<()> {
        let mut staging = Staging::default();
        let mut roots = Vec::with_capacity(snapshot.roots.len());
        for root in &snapshot.roots {
            roots.push(self.build_from_snapshot(&mut staging, root, None)?);
        }

        let kept: BTreeSet<ConceptId> = staging.concepts.iter().map(Concept::id).collect();
        let removed: Vec<ConceptId> = self
            .concepts
            .keys()
            .filter(|id| !kept.contains(id))
            .copied()
            .collect();
        let inserted: Vec<ConceptId> = kept.into_iter().collect();

        self.concepts.clear();
        self.roots = roots;
        self.insert_staged(staging);
        self.prune_dangling(&inserted);

        debug!(
            "event=model_reset module=model status=ok roots={} concepts={}",
            self.roots.len(),
            self.concepts.len()
        );
        self.emit(
            Message::StructureChanged,
            None,
            None,
            ChangeKind::ModelReset,
            removed,
        );
        Ok(())
    }

    fn emit(
        &self,
        message: Message,
        concept: Option<ConceptId>,
        slot: Option<Slot>,
        change: ChangeKind,
        removed: Vec<ConceptId>,
    ) {
        self.bus.notify(Notification {
            message,
            concept,
            slot,
            change,
            removed,
            source: self.source,
        });
    }

    fn path(&self, concept: ConceptId, slot: &Slot) -> String {
        match self.concepts.get(&concept) {
            Some(owner) => slot_path(owner, slot),
            None => slot.to_string(),
        }
    }

    fn attribute_ref(&self, concept: ConceptId, slot: &Slot) -> ModelResult<&Attribute> {
        let owner = self
            .concepts
            .get(&concept)
            .ok_or(InvalidModelError::ConceptNotFound(concept))?;
        match owner.slot(slot) {
            Some(attribute) => Ok(attribute),
            None if owner.declared(slot).is_some() => {
                Err(InvalidModelError::AttributeNotCreated(slot_path(owner, slot)))
            }
            None => Err(unknown_slot(owner, slot)),
        }
    }

    fn attribute_mut(&mut self, concept: ConceptId, slot: &Slot) -> ModelResult<&mut Attribute> {
        let path = self.path(concept, slot);
        self.concepts
            .get_mut(&concept)
            .ok_or(InvalidModelError::ConceptNotFound(concept))?
            .slot_mut(slot)
            .ok_or(InvalidModelError::AttributeNotCreated(path))
    }

    /// Whether `slot` holds the concept's reference key.
    fn is_key_slot(&self, concept: ConceptId, slot: &Slot) -> bool {
        slot.component.is_none()
            && self
                .concepts
                .get(&concept)
                .and_then(|owner| owner.schema().id_attribute())
                == Some(slot.attribute.as_str())
    }

    fn identifier_taken(&self, value: &str, except: ConceptId) -> bool {
        self.concepts
            .values()
            .any(|concept| concept.id() != except && concept.id_value() == Some(value))
    }

    fn stage_root(&self, item: &Value) -> ModelResult<(ConceptId, Staging)> {
        let type_name = match item.get(TYPE_KEY) {
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(InvalidModelError::TypeMismatch {
                    slot: TYPE_KEY.to_string(),
                    expected: "string".to_string(),
                    found: json_kind(other).to_string(),
                })
            }
            None => self
                .registry
                .root()
                .map(str::to_string)
                .ok_or(InvalidModelError::MissingType)?,
        };
        let mut staging = Staging::default();
        let id = self.build_concept(&mut staging, &type_name, Some(item), None)?;
        Ok((id, staging))
    }

    fn build_concept(
        &self,
        staging: &mut Staging,
        type_name: &str,
        values: Option<&Value>,
        parent: Option<ParentLink>,
    ) -> ModelResult<ConceptId> {
        let schema = self
            .registry
            .resolve(type_name)
            .ok_or_else(|| InvalidModelError::UnknownConcept(type_name.to_string()))?;
        if schema.nature == Nature::Prototype {
            return Err(InvalidModelError::AbstractConcept(type_name.to_string()));
        }

        let entries = match values {
            None | Some(Value::Null) => None,
            Some(Value::Object(entries)) => Some(entries),
            Some(other) => {
                return Err(InvalidModelError::TypeMismatch {
                    slot: type_name.to_string(),
                    expected: "object".to_string(),
                    found: json_kind(other).to_string(),
                })
            }
        };
        if let Some(unknown) = entries.and_then(|entries| {
            entries.keys().find(|key| {
                key.as_str() != TYPE_KEY
                    && !schema.attributes.contains_key(key.as_str())
                    && schema.component(key).is_none()
            })
        }) {
            return Err(InvalidModelError::UnknownAttribute {
                concept: type_name.to_string(),
                attribute: unknown.clone(),
            });
        }

        let id = Uuid::new_v4();
        let mut attributes = AttributeSet::default();
        for (name, declared) in &schema.attributes {
            let value = entries.and_then(|entries| entries.get(name));
            if let Some(attribute) = self.build_attribute(
                staging,
                id,
                type_name,
                Slot::attribute(name.as_str()),
                declared,
                value,
                false,
            )? {
                attributes.push(attribute);
            }
        }

        let mut components = Vec::new();
        for declared in &schema.components {
            let value = entries
                .and_then(|entries| entries.get(&declared.name))
                .filter(|value| !value.is_null());
            if value.is_none() && !declared.required {
                continue;
            }
            components.push(self.build_component(staging, id, type_name, declared, value)?);
        }

        staging
            .concepts
            .push(Concept::new(id, parent, schema, attributes, components));
        Ok(id)
    }

    fn build_component(
        &self,
        staging: &mut Staging,
        owner: ConceptId,
        concept_name: &str,
        declared: &ComponentSchema,
        values: Option<&Value>,
    ) -> ModelResult<Component> {
        let full_name = format!("{concept_name}:{}", declared.name);
        let entries = match values {
            None | Some(Value::Null) => None,
            Some(Value::Object(entries)) => Some(entries),
            Some(other) => {
                return Err(InvalidModelError::TypeMismatch {
                    slot: full_name,
                    expected: "object".to_string(),
                    found: json_kind(other).to_string(),
                })
            }
        };
        if let Some(unknown) = entries.and_then(|entries| {
            entries
                .keys()
                .find(|key| !declared.attribute.contains_key(key.as_str()))
        }) {
            return Err(InvalidModelError::UnknownAttribute {
                concept: full_name,
                attribute: unknown.clone(),
            });
        }

        let mut attributes = AttributeSet::default();
        for (name, schema) in &declared.attribute {
            let value = entries.and_then(|entries| entries.get(name));
            if let Some(attribute) = self.build_attribute(
                staging,
                owner,
                concept_name,
                Slot::component(declared.name.as_str(), name.as_str()),
                schema,
                value,
                false,
            )? {
                attributes.push(attribute);
            }
        }
        Ok(Component::new(concept_name, declared.clone(), attributes))
    }

    /// Builds one attribute; `Ok(None)` for an optional attribute left absent.
    ///
    /// `force` initializes optional attributes as if they were required.
    #[allow(clippy::too_many_arguments)]
    fn build_attribute(
        &self,
        staging: &mut Staging,
        owner: ConceptId,
        concept_name: &str,
        slot: Slot,
        schema: &AttributeSchema,
        value: Option<&Value>,
        force: bool,
    ) -> ModelResult<Option<Attribute>> {
        let value = value.filter(|raw| !raw.is_null());
        if value.is_none() && !schema.required && !force {
            return Ok(None);
        }
        let path = format!("{concept_name}.{slot}");
        let link = ParentLink {
            concept: owner,
            slot: slot.clone(),
        };

        let initial = match &schema.kind {
            ValueType::Reference => match value {
                Some(Value::String(key)) => {
                    staging.pending_refs.push(PendingRef {
                        concept: owner,
                        slot: slot.clone(),
                        accept: schema.accept.clone(),
                        key: key.clone(),
                    });
                    AttributeValue::Unset
                }
                Some(other) => {
                    return Err(InvalidModelError::TypeMismatch {
                        slot: path,
                        expected: "reference key".to_string(),
                        found: json_kind(other).to_string(),
                    })
                }
                None => AttributeValue::Unset,
            },
            ValueType::Concept(type_name) => {
                let accept = std::slice::from_ref(type_name);
                match value {
                    Some(raw) => {
                        let concrete = self.concrete_type_for(accept, raw, &path)?;
                        AttributeValue::Concept(self.build_concept(
                            staging,
                            &concrete,
                            Some(raw),
                            Some(link),
                        )?)
                    }
                    None => match self.default_candidate(accept) {
                        Some(concrete) => AttributeValue::Concept(self.build_concept(
                            staging,
                            &concrete,
                            None,
                            Some(link),
                        )?),
                        None => {
                            warn!(
                                "event=attribute_init module=model status=skipped slot={} reason=ambiguous_type",
                                path
                            );
                            AttributeValue::Unset
                        }
                    },
                }
            }
            ValueType::Set => {
                let elements = match value {
                    Some(Value::Array(items)) => {
                        // Creation leaves such a set empty when no element type can be picked.
                        let unfillable =
                            items.is_empty() && self.default_candidate(&schema.accept).is_none();
                        if !unfillable {
                            check_cardinality(schema, items.len(), &path)?;
                        }
                        let mut elements = Vec::with_capacity(items.len());
                        for item in items {
                            let concrete = self.concrete_type_for(&schema.accept, item, &path)?;
                            elements.push(self.build_concept(
                                staging,
                                &concrete,
                                Some(item),
                                Some(link.clone()),
                            )?);
                        }
                        elements
                    }
                    Some(other) => {
                        return Err(InvalidModelError::TypeMismatch {
                            slot: path,
                            expected: "array".to_string(),
                            found: json_kind(other).to_string(),
                        })
                    }
                    None => {
                        let min = schema.min.unwrap_or(0);
                        match self.default_candidate(&schema.accept) {
                            Some(concrete) if min > 0 => {
                                let mut elements = Vec::with_capacity(min);
                                for _ in 0..min {
                                    elements.push(self.build_concept(
                                        staging,
                                        &concrete,
                                        None,
                                        Some(link.clone()),
                                    )?);
                                }
                                elements
                            }
                            _ => {
                                if min > 0 {
                                    warn!(
                                        "event=attribute_init module=model status=skipped slot={} reason=ambiguous_type min={}",
                                        path, min
                                    );
                                }
                                Vec::new()
                            }
                        }
                    }
                };
                AttributeValue::Set(elements)
            }
            primitive => match value {
                Some(raw) => scalar_from_json(primitive, raw).ok_or_else(|| {
                    InvalidModelError::TypeMismatch {
                        slot: path.clone(),
                        expected: primitive.as_str().to_string(),
                        found: json_kind(raw).to_string(),
                    }
                })?,
                None => primitive_default(schema),
            },
        };

        Ok(Some(Attribute::new(slot.attribute, schema.clone(), initial)))
    }

    fn choose_type(
        &self,
        accept: &[String],
        type_name: Option<&str>,
        values: Option<&Value>,
        path: &str,
    ) -> ModelResult<String> {
        match (type_name, values) {
            (Some(name), _) => {
                if !self.registry.contains(name) {
                    return Err(InvalidModelError::UnknownConcept(name.to_string()));
                }
                if !self.registry.accepts(accept, name) {
                    return Err(InvalidModelError::NotAccepted {
                        slot: path.to_string(),
                        concept: name.to_string(),
                    });
                }
                Ok(name.to_string())
            }
            (None, Some(raw)) => self.concrete_type_for(accept, raw, path),
            (None, None) => self.pick_candidate(accept, path),
        }
    }

    fn concrete_type_for(&self, accept: &[String], raw: &Value, path: &str) -> ModelResult<String> {
        match raw.get(TYPE_KEY) {
            Some(Value::String(name)) => self.choose_type(accept, Some(name.as_str()), None, path),
            Some(other) => Err(InvalidModelError::TypeMismatch {
                slot: format!("{path}.{TYPE_KEY}"),
                expected: "string".to_string(),
                found: json_kind(other).to_string(),
            }),
            None => self.pick_candidate(accept, path),
        }
    }

    fn pick_candidate(&self, accept: &[String], path: &str) -> ModelResult<String> {
        if let Some(concrete) = self.default_candidate(accept) {
            return Ok(concrete);
        }
        let candidates = self.registry.concrete_candidates(accept);
        if candidates.is_empty() {
            Err(InvalidModelError::NoConcreteType {
                slot: path.to_string(),
            })
        } else {
            Err(InvalidModelError::AmbiguousType {
                slot: path.to_string(),
                candidates,
            })
        }
    }

    fn default_candidate(&self, accept: &[String]) -> Option<String> {
        self.registry.default_candidate(accept)
    }

    fn check_identifiers(&self, staging: &Staging) -> ModelResult<()> {
        let mut seen: BTreeSet<&str> = self.concepts.values().filter_map(Concept::id_value).collect();
        for concept in &staging.concepts {
            if let Some(value) = concept.id_value() {
                if !seen.insert(value) {
                    return Err(InvalidModelError::DuplicateId(value.to_string()));
                }
            }
        }
        Ok(())
    }

    fn insert_staged(&mut self, staging: Staging) -> Vec<PendingRef> {
        for concept in staging.concepts {
            self.concepts.insert(concept.id(), concept);
        }
        staging.pending_refs
    }

    fn resolve_pending(&mut self, pending: Vec<PendingRef>) {
        for reference in pending {
            let Some(target) = self.find_by_key(&reference.accept, &reference.key) else {
                warn!(
                    "event=reference_resolve module=model status=dangling slot={} key={}",
                    reference.slot,
                    sanitize_message(&reference.key, MAX_LOGGED_KEY_CHARS)
                );
                continue;
            };
            if let Some(attribute) = self
                .concepts
                .get_mut(&reference.concept)
                .and_then(|concept| concept.slot_mut(&reference.slot))
            {
                attribute.set_value(AttributeValue::Reference(target));
            }
        }
    }

    fn build_from_snapshot(
        &self,
        staging: &mut Staging,
        snapshot: &ConceptSnapshot,
        parent: Option<ParentLink>,
    ) -> ModelResult<ConceptId> {
        let schema = self
            .registry
            .resolve(&snapshot.name)
            .ok_or_else(|| InvalidModelError::UnknownConcept(snapshot.name.clone()))?;
        if schema.nature == Nature::Prototype {
            return Err(InvalidModelError::AbstractConcept(snapshot.name.clone()));
        }

        let mut attributes = AttributeSet::default();
        for entry in &snapshot.attributes {
            let declared = schema.attributes.get(&entry.name).ok_or_else(|| {
                InvalidModelError::UnknownAttribute {
                    concept: snapshot.name.clone(),
                    attribute: entry.name.clone(),
                }
            })?;
            attributes.push(self.restore_attribute(
                staging,
                snapshot.id,
                Slot::attribute(entry.name.as_str()),
                declared,
                entry,
            )?);
        }

        let mut components = Vec::new();
        for entry in &snapshot.components {
            let declared = schema.component(&entry.name).ok_or_else(|| {
                InvalidModelError::UnknownComponent {
                    concept: snapshot.name.clone(),
                    component: entry.name.clone(),
                }
            })?;
            let mut restored = AttributeSet::default();
            for attribute in &entry.attributes {
                let attribute_schema = declared.attribute.get(&attribute.name).ok_or_else(|| {
                    InvalidModelError::UnknownAttribute {
                        concept: format!("{}:{}", snapshot.name, entry.name),
                        attribute: attribute.name.clone(),
                    }
                })?;
                restored.push(self.restore_attribute(
                    staging,
                    snapshot.id,
                    Slot::component(entry.name.as_str(), attribute.name.as_str()),
                    attribute_schema,
                    attribute,
                )?);
            }
            let mut component = Component::new(&snapshot.name, declared.clone(), restored);
            component.set_projection_index(entry.projection_index);
            components.push(component);
        }

        staging.concepts.push(Concept::new(
            snapshot.id,
            parent,
            schema,
            attributes,
            components,
        ));
        Ok(snapshot.id)
    }

    fn restore_attribute(
        &self,
        staging: &mut Staging,
        owner: ConceptId,
        slot: Slot,
        declared: &AttributeSchema,
        entry: &AttributeSnapshot,
    ) -> ModelResult<Attribute> {
        let link = ParentLink {
            concept: owner,
            slot: slot.clone(),
        };
        let value = match &entry.value {
            SnapshotValue::Unset => AttributeValue::Unset,
            SnapshotValue::Text(text) => AttributeValue::Text(text.clone()),
            SnapshotValue::Number(number) => AttributeValue::Number(*number),
            SnapshotValue::Boolean(flag) => AttributeValue::Boolean(*flag),
            SnapshotValue::Identifier(value) => AttributeValue::Identifier(value.clone()),
            SnapshotValue::Reference(target) => AttributeValue::Reference(*target),
            SnapshotValue::Concept(child) => {
                AttributeValue::Concept(self.build_from_snapshot(staging, child, Some(link))?)
            }
            SnapshotValue::Set(children) => {
                let mut elements = Vec::with_capacity(children.len());
                for child in children {
                    elements.push(self.build_from_snapshot(staging, child, Some(link.clone()))?);
                }
                AttributeValue::Set(elements)
            }
        };
        if !value.matches(&declared.kind) {
            return Err(InvalidModelError::TypeMismatch {
                slot: slot.to_string(),
                expected: declared.kind.as_str().to_string(),
                found: value.kind_name().to_string(),
            });
        }
        Ok(Attribute::new(slot.attribute, declared.clone(), value))
    }

    /// Unsets references from `ids` whose target no longer exists.
    fn prune_dangling(&mut self, ids: &[ConceptId]) {
        let live: BTreeSet<ConceptId> = self.concepts.keys().copied().collect();
        for id in ids {
            let Some(concept) = self.concepts.get_mut(id) else {
                continue;
            };
            let attributes = concept.attributes_mut().iter_mut();
            for attribute in attributes {
                if let AttributeValue::Reference(target) = attribute.value() {
                    if !live.contains(target) {
                        warn!(
                            "event=reference_resolve module=model status=dangling slot={} target={}",
                            attribute.name(),
                            target
                        );
                        attribute.set_value(AttributeValue::Unset);
                    }
                }
            }
            let component_names: Vec<String> = concept
                .components()
                .iter()
                .map(|component| component.name().to_string())
                .collect();
            for name in component_names {
                let Some(component) = concept.component_mut(&name) else {
                    continue;
                };
                for attribute in component.attributes_mut().iter_mut() {
                    if let AttributeValue::Reference(target) = attribute.value() {
                        if !live.contains(target) {
                            warn!(
                                "event=reference_resolve module=model status=dangling slot={}.{} target={}",
                                name,
                                attribute.name(),
                                target
                            );
                            attribute.set_value(AttributeValue::Unset);
                        }
                    }
                }
            }
        }
    }

    /// Unsets every reference pointing at a removed concept.
    fn clear_references(&mut self, removed: &[ConceptId]) {
        if removed.is_empty() {
            return;
        }
        let mut cleared = Vec::new();
        for concept in self.concepts.values() {
            for target in removed {
                for slot in concept.references_to(*target) {
                    cleared.push((concept.id(), slot));
                }
            }
        }
        for (concept, slot) in cleared {
            if let Some(attribute) = self
                .concepts
                .get_mut(&concept)
                .and_then(|owner| owner.slot_mut(&slot))
            {
                attribute.set_value(AttributeValue::Unset);
            }
            self.emit(
                Message::ValueChanged,
                Some(concept),
                Some(slot),
                ChangeKind::ValueSet,
                Vec::new(),
            );
        }
    }

    fn replace_owned(&mut self, link: &ParentLink, old: ConceptId, new: ConceptId) {
        let Some(attribute) = self
            .concepts
            .get_mut(&link.concept)
            .and_then(|owner| owner.slot_mut(&link.slot))
        else {
            return;
        };
        match attribute.value_mut() {
            AttributeValue::Concept(child) if *child == old => *child = new,
            AttributeValue::Set(elements) => {
                if let Some(element) = elements.iter_mut().find(|element| **element == old) {
                    *element = new;
                }
            }
            _ => {}
        }
    }

    fn subtree_ids(&self, id: ConceptId) -> Vec<ConceptId> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(concept) = self.concepts.get(&current) {
                ids.push(current);
                stack.extend(concept.owned_children());
            }
        }
        ids
    }

    fn remove_subtrees(&mut self, ids: &[ConceptId]) -> Vec<ConceptId> {
        let mut removed = Vec::new();
        let mut stack: Vec<ConceptId> = ids.to_vec();
        while let Some(current) = stack.pop() {
            if let Some(concept) = self.concepts.remove(&current) {
                removed.push(current);
                stack.extend(concept.owned_children());
            }
        }
        removed
    }

    fn export_value(&self, attribute: &Attribute) -> Option<Value> {
        match attribute.value() {
            AttributeValue::Unset => None,
            AttributeValue::Reference(target) => Some(Value::String(self.reference_key(*target))),
            AttributeValue::Concept(child) => self.export_concept(*child),
            AttributeValue::Set(elements) => Some(Value::Array(
                elements
                    .iter()
                    .filter_map(|element| self.export_concept(*element))
                    .collect(),
            )),
            scalar => Some(scalar_to_json(scalar)),
        }
    }

    fn reference_key(&self, target: ConceptId) -> String {
        self.concepts
            .get(&target)
            .and_then(Concept::id_value)
            .map(str::to_string)
            .unwrap_or_else(|| target.to_string())
    }

    fn snapshot_attribute(&self, attribute: &Attribute) -> AttributeSnapshot {
        let value = match attribute.value() {
            AttributeValue::Unset => SnapshotValue::Unset,
            AttributeValue::Text(text) => SnapshotValue::Text(text.clone()),
            AttributeValue::Number(number) => SnapshotValue::Number(*number),
            AttributeValue::Boolean(flag) => SnapshotValue::Boolean(*flag),
            AttributeValue::Identifier(value) => SnapshotValue::Identifier(value.clone()),
            AttributeValue::Reference(target) => SnapshotValue::Reference(*target),
            AttributeValue::Concept(child) => self
                .snapshot_concept(*child)
                .map_or(SnapshotValue::Unset, |child| SnapshotValue::Concept(Box::new(child))),
            AttributeValue::Set(elements) => SnapshotValue::Set(
                elements
                    .iter()
                    .filter_map(|element| self.snapshot_concept(*element))
                    .collect(),
            ),
        };
        AttributeSnapshot {
            name: attribute.name().to_string(),
            value,
        }
    }
}

fn slot_path(owner: &Concept, slot: &Slot) -> String {
    format!("{}.{slot}", owner.name())
}

fn unknown_slot(owner: &Concept, slot: &Slot) -> InvalidModelError {
    match &slot.component {
        Some(component) if owner.schema().component(component).is_none() => {
            InvalidModelError::UnknownComponent {
                concept: owner.name().to_string(),
                component: component.clone(),
            }
        }
        _ => InvalidModelError::UnknownAttribute {
            concept: owner.name().to_string(),
            attribute: slot.to_string(),
        },
    }
}

fn check_cardinality(schema: &AttributeSchema, count: usize, path: &str) -> ModelResult<()> {
    let min = schema.min.unwrap_or(0);
    if count < min || schema.max.is_some_and(|max| count > max) {
        return Err(InvalidModelError::Cardinality {
            slot: path.to_string(),
            count,
            min,
            max: schema.max,
        });
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
