//! Concept schema registry and prototype resolution.
//!
//! # Responsibility
//! - Keep concept definitions keyed by name.
//! - Merge prototype chains into one cached `ResolvedConcept` per name.
//!
//! # Invariants
//! - Every prototype name referenced by a definition exists.
//! - Prototype chains are acyclic.
//! - Eager creation terminates: required concept-typed attributes and set
//!   minimums never lead back to a concept already being created.
//! - A failed `add_concept_schema` leaves the registry unchanged.
//! - The nature of a resolved concept is always the most-derived one.

use crate::config::LanguageConfig;
use crate::schema::definition::{
    AttributeSchema, ComponentSchema, ConceptSchema, MetaModelSchema, Nature, ValueType,
};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Schema registry failures raised at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidMetaModelError {
    /// Input is not valid JSON.
    Parse(String),
    /// Top-level input is not an object keyed by concept name.
    NotAnObject,
    /// One entry failed to decode.
    InvalidEntry { name: String, message: String },
    /// `@root` names an unknown concept.
    UnknownRoot(String),
    UnknownPrototype { concept: String, prototype: String },
    /// Chain of names, starting at the concept where the cycle was found.
    PrototypeCycle(Vec<String>),
    UnknownType {
        concept: String,
        attribute: String,
        type_name: String,
    },
    /// `reference`/`set` attribute declares no `accept` target.
    MissingAccept { concept: String, attribute: String },
    InvalidCardinality {
        concept: String,
        attribute: String,
        min: usize,
        max: usize,
    },
    DuplicateComponent { concept: String, component: String },
    /// Required parts that would instantiate each other without end.
    RequiredCycle(Vec<String>),
}

impl Display for InvalidMetaModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "metamodel is not valid JSON: {message}"),
            Self::NotAnObject => write!(f, "metamodel must be an object keyed by concept name"),
            Self::InvalidEntry { name, message } => {
                write!(f, "invalid metamodel entry `{name}`: {message}")
            }
            Self::UnknownRoot(name) => write!(f, "root concept is not declared: {name}"),
            Self::UnknownPrototype { concept, prototype } => write!(
                f,
                "concept `{concept}` extends unknown prototype `{prototype}`"
            ),
            Self::PrototypeCycle(chain) => {
                write!(f, "cyclic prototype chain: {}", chain.join(" -> "))
            }
            Self::UnknownType {
                concept,
                attribute,
                type_name,
            } => write!(
                f,
                "attribute `{concept}.{attribute}` has unknown type `{type_name}`"
            ),
            Self::MissingAccept { concept, attribute } => write!(
                f,
                "attribute `{concept}.{attribute}` must declare `accept`"
            ),
            Self::InvalidCardinality {
                concept,
                attribute,
                min,
                max,
            } => write!(
                f,
                "attribute `{concept}.{attribute}` has min {min} greater than max {max}"
            ),
            Self::DuplicateComponent { concept, component } => write!(
                f,
                "concept `{concept}` declares component `{component}` twice"
            ),
            Self::RequiredCycle(chain) => {
                write!(f, "required attributes form a creation cycle: {}", chain.join(" -> "))
            }
        }
    }
}

impl Error for InvalidMetaModelError {}

/// Concept schema after prototype merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConcept {
    pub name: String,
    pub nature: Nature,
    /// Prototype ancestors, nearest first.
    pub ancestors: Vec<String>,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub components: Vec<ComponentSchema>,
    pub idref: Option<String>,
}

impl ResolvedConcept {
    /// Returns whether `ancestor` is a strict prototype ancestor.
    pub fn is_derived_of(&self, ancestor: &str) -> bool {
        self.ancestors.iter().any(|name| name == ancestor)
    }

    /// Returns whether this concept is `name` or derives from it.
    pub fn conforms_to(&self, name: &str) -> bool {
        self.name == name || self.is_derived_of(name)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSchema> {
        self.components.iter().find(|component| component.name == name)
    }

    /// Attribute that identifies instances: `idref`, else the first `ID`.
    pub fn id_attribute(&self) -> Option<&str> {
        if let Some(idref) = self.idref.as_deref() {
            return Some(idref);
        }
        self.attributes
            .iter()
            .find(|(_, schema)| schema.kind == ValueType::Identifier)
            .map(|(name, _)| name.as_str())
    }
}

/// Registry of concept definitions with cached prototype resolution.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    root: Option<String>,
    config: LanguageConfig,
    definitions: BTreeMap<String, ConceptSchema>,
    resolved: BTreeMap<String, Arc<ResolvedConcept>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schema(schema: MetaModelSchema) -> Result<Self, InvalidMetaModelError> {
        let mut registry = Self::new();
        registry.add_concept_schema(schema)?;
        Ok(registry)
    }

    /// Merges concept definitions into the registry.
    ///
    /// Definitions with an existing name replace the previous one. The whole
    /// merged set is validated before commit.
    ///
    /// Returns the number of concepts known after the merge.
    pub fn add_concept_schema(
        &mut self,
        schema: MetaModelSchema,
    ) -> Result<usize, InvalidMetaModelError> {
        let incoming = schema.concepts.len();
        let mut definitions = self.definitions.clone();
        definitions.extend(schema.concepts);

        let root = schema.root.or_else(|| self.root.clone());
        if let Some(root) = root.as_deref() {
            if !definitions.contains_key(root) {
                return Err(InvalidMetaModelError::UnknownRoot(root.to_string()));
            }
        }

        let resolved = resolve_all(&definitions)?;
        check_required_cycles(&resolved)?;

        self.definitions = definitions;
        self.resolved = resolved;
        self.root = root;
        if schema.config != LanguageConfig::default() {
            self.config.merge(schema.config);
        }

        info!(
            "event=schema_load module=schema status=ok added={} total={}",
            incoming,
            self.definitions.len()
        );
        Ok(self.definitions.len())
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn config(&self) -> &LanguageConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Raw definitions, used to collect inline projection templates.
    pub fn definitions(&self) -> impl Iterator<Item = (&str, &ConceptSchema)> {
        self.definitions
            .iter()
            .map(|(name, schema)| (name.as_str(), schema))
    }

    /// Returns the cached merged schema for `name`.
    pub fn resolve(&self, name: &str) -> Option<Arc<ResolvedConcept>> {
        self.resolved.get(name).cloned()
    }

    /// Returns whether `name` is a strict prototype descendant of `ancestor`.
    pub fn is_derived_of(&self, name: &str, ancestor: &str) -> bool {
        self.resolved
            .get(name)
            .is_some_and(|resolved| resolved.is_derived_of(ancestor))
    }

    /// Returns whether concept `name` satisfies any entry of `accept`.
    pub fn accepts(&self, accept: &[String], name: &str) -> bool {
        self.resolved.get(name).is_some_and(|resolved| {
            accept
                .iter()
                .any(|candidate| resolved.conforms_to(candidate))
        })
    }

    /// Concrete concept names satisfying `accept`, sorted by name.
    pub fn concrete_candidates(&self, accept: &[String]) -> Vec<String> {
        concrete_candidates(&self.resolved, accept)
    }

    /// Type created for an accept list without an explicit choice: a single
    /// concrete accepted type, else the single concrete descendant.
    pub fn default_candidate(&self, accept: &[String]) -> Option<String> {
        default_candidate(&self.resolved, accept)
    }
}

type ResolvedMap = BTreeMap<String, Arc<ResolvedConcept>>;

fn concrete_candidates(resolved: &ResolvedMap, accept: &[String]) -> Vec<String> {
    resolved
        .values()
        .filter(|concept| concept.nature == Nature::Concrete)
        .filter(|concept| {
            accept
                .iter()
                .any(|candidate| concept.conforms_to(candidate))
        })
        .map(|concept| concept.name.clone())
        .collect()
}

fn default_candidate(resolved: &ResolvedMap, accept: &[String]) -> Option<String> {
    if let [only] = accept {
        if resolved
            .get(only)
            .is_some_and(|concept| concept.nature == Nature::Concrete)
        {
            return Some(only.clone());
        }
    }
    match concrete_candidates(resolved, accept).as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    }
}

/// Concepts created eagerly when `concept` is created without values.
fn eager_targets(resolved: &ResolvedMap, concept: &ResolvedConcept) -> Vec<String> {
    let component_attributes = concept
        .components
        .iter()
        .filter(|component| component.required)
        .flat_map(|component| component.attribute.values());
    concept
        .attributes
        .values()
        .chain(component_attributes)
        .filter(|schema| schema.required)
        .filter_map(|schema| match &schema.kind {
            ValueType::Concept(type_name) => {
                default_candidate(resolved, std::slice::from_ref(type_name))
            }
            ValueType::Set if schema.min.unwrap_or(0) > 0 => {
                default_candidate(resolved, &schema.accept)
            }
            _ => None,
        })
        .collect()
}

fn check_required_cycles(resolved: &ResolvedMap) -> Result<(), InvalidMetaModelError> {
    let mut done = BTreeSet::new();
    for name in resolved.keys() {
        let mut path = Vec::new();
        visit_required(resolved, name, &mut path, &mut done)?;
    }
    Ok(())
}

fn visit_required(
    resolved: &ResolvedMap,
    name: &str,
    path: &mut Vec<String>,
    done: &mut BTreeSet<String>,
) -> Result<(), InvalidMetaModelError> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|seen| seen == name) {
        let mut chain = path[start..].to_vec();
        chain.push(name.to_string());
        return Err(InvalidMetaModelError::RequiredCycle(chain));
    }
    let Some(concept) = resolved.get(name) else {
        return Ok(());
    };
    path.push(name.to_string());
    for target in eager_targets(resolved, concept) {
        visit_required(resolved, &target, path, done)?;
    }
    path.pop();
    done.insert(name.to_string());
    Ok(())
}

fn resolve_all(
    definitions: &BTreeMap<String, ConceptSchema>,
) -> Result<BTreeMap<String, Arc<ResolvedConcept>>, InvalidMetaModelError> {
    let mut resolved = BTreeMap::new();
    for (name, definition) in definitions {
        validate_definition(name, definition, definitions)?;
        let chain = prototype_chain(name, definitions)?;
        let merged = merge_chain(&chain, definitions);
        debug!(
            "event=schema_resolve module=schema concept={} nature={} ancestors={}",
            name,
            merged.nature.as_str(),
            merged.ancestors.len()
        );
        resolved.insert(name.clone(), Arc::new(merged));
    }
    Ok(resolved)
}

/// Returns `[name, prototype, prototype-of-prototype, ...]`.
fn prototype_chain(
    name: &str,
    definitions: &BTreeMap<String, ConceptSchema>,
) -> Result<Vec<String>, InvalidMetaModelError> {
    let mut chain = vec![name.to_string()];
    let mut seen = BTreeSet::from([name.to_string()]);
    let mut cursor = definitions
        .get(name)
        .and_then(|definition| definition.prototype.clone());

    while let Some(prototype) = cursor {
        if !seen.insert(prototype.clone()) {
            chain.push(prototype);
            return Err(InvalidMetaModelError::PrototypeCycle(chain));
        }
        let definition =
            definitions
                .get(&prototype)
                .ok_or_else(|| InvalidMetaModelError::UnknownPrototype {
                    concept: chain.last().cloned().unwrap_or_default(),
                    prototype: prototype.clone(),
                })?;
        chain.push(prototype);
        cursor = definition.prototype.clone();
    }
    Ok(chain)
}

/// Merges from the chain root down so that derived declarations win.
fn merge_chain(chain: &[String], definitions: &BTreeMap<String, ConceptSchema>) -> ResolvedConcept {
    let mut attributes = BTreeMap::new();
    let mut components: Vec<ComponentSchema> = Vec::new();
    let mut idref = None;

    for name in chain.iter().rev() {
        let Some(definition) = definitions.get(name) else {
            continue;
        };
        for (attribute, schema) in &definition.attribute {
            attributes.insert(attribute.clone(), schema.clone());
        }
        for component in &definition.component {
            match components.iter_mut().find(|known| known.name == component.name) {
                Some(known) => *known = component.clone(),
                None => components.push(component.clone()),
            }
        }
        if definition.idref.is_some() {
            idref = definition.idref.clone();
        }
    }

    let nature = definitions
        .get(&chain[0])
        .map(|definition| definition.nature)
        .unwrap_or_default();

    ResolvedConcept {
        name: chain[0].clone(),
        nature,
        ancestors: chain[1..].to_vec(),
        attributes,
        components,
        idref,
    }
}

fn validate_definition(
    name: &str,
    definition: &ConceptSchema,
    definitions: &BTreeMap<String, ConceptSchema>,
) -> Result<(), InvalidMetaModelError> {
    for (attribute, schema) in &definition.attribute {
        validate_attribute(name, attribute, schema, definitions)?;
    }

    let mut seen = BTreeSet::new();
    for component in &definition.component {
        if !seen.insert(component.name.as_str()) {
            return Err(InvalidMetaModelError::DuplicateComponent {
                concept: name.to_string(),
                component: component.name.clone(),
            });
        }
        let owner = format!("{name}:{}", component.name);
        for (attribute, schema) in &component.attribute {
            validate_attribute(&owner, attribute, schema, definitions)?;
        }
    }
    Ok(())
}

fn validate_attribute(
    owner: &str,
    attribute: &str,
    schema: &AttributeSchema,
    definitions: &BTreeMap<String, ConceptSchema>,
) -> Result<(), InvalidMetaModelError> {
    let unknown = |type_name: &str| InvalidMetaModelError::UnknownType {
        concept: owner.to_string(),
        attribute: attribute.to_string(),
        type_name: type_name.to_string(),
    };

    match &schema.kind {
        ValueType::Concept(type_name) => {
            if !definitions.contains_key(type_name) {
                return Err(unknown(type_name));
            }
        }
        ValueType::Reference | ValueType::Set => {
            if schema.accept.is_empty() {
                return Err(InvalidMetaModelError::MissingAccept {
                    concept: owner.to_string(),
                    attribute: attribute.to_string(),
                });
            }
            if let Some(target) = schema
                .accept
                .iter()
                .find(|target| !definitions.contains_key(target.as_str()))
            {
                return Err(unknown(target));
            }
        }
        _ => {}
    }

    if let (Some(min), Some(max)) = (schema.min, schema.max) {
        if min > max {
            return Err(InvalidMetaModelError::InvalidCardinality {
                concept: owner.to_string(),
                attribute: attribute.to_string(),
                min,
                max,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{InvalidMetaModelError, SchemaRegistry};
    use crate::schema::definition::{MetaModelSchema, Nature};
    use serde_json::json;

    fn registry(value: serde_json::Value) -> Result<SchemaRegistry, InvalidMetaModelError> {
        let schema = MetaModelSchema::from_value(&value).expect("schema should decode");
        SchemaRegistry::from_schema(schema)
    }

    #[test]
    fn merges_prototype_attributes_with_derived_overrides() {
        let registry = registry(json!({
            "Named": {
                "nature": "prototype",
                "attribute": {
                    "name": { "type": "string" },
                    "note": { "type": "string", "required": false }
                }
            },
            "Person": {
                "prototype": "Named",
                "attribute": { "note": { "type": "number" } }
            }
        }))
        .expect("registry should load");

        let person = registry.resolve("Person").expect("person resolves");
        assert_eq!(person.nature, Nature::Concrete);
        assert_eq!(person.ancestors, vec!["Named".to_string()]);
        assert!(person.attributes.contains_key("name"));
        assert_eq!(person.attributes["note"].kind.as_str(), "number");
        assert!(person.is_derived_of("Named"));
        assert!(!person.is_derived_of("Person"));
        assert!(person.conforms_to("Person"));
    }

    #[test]
    fn rejects_unknown_prototype() {
        let err = registry(json!({ "A": { "prototype": "Missing" } }))
            .expect_err("unknown prototype must fail");
        assert_eq!(
            err,
            InvalidMetaModelError::UnknownPrototype {
                concept: "A".to_string(),
                prototype: "Missing".to_string(),
            }
        );
    }

    #[test]
    fn rejects_prototype_cycle() {
        let err = registry(json!({
            "A": { "nature": "prototype", "prototype": "B" },
            "B": { "nature": "prototype", "prototype": "A" }
        }))
        .expect_err("cycle must fail");
        assert!(matches!(err, InvalidMetaModelError::PrototypeCycle(_)));
    }

    #[test]
    fn failed_merge_keeps_previous_definitions() {
        let mut registry = registry(json!({ "A": {} })).expect("registry should load");
        let broken = MetaModelSchema::from_value(&json!({
            "B": { "attribute": { "x": { "type": "Nowhere" } } }
        }))
        .expect("schema should decode");

        registry
            .add_concept_schema(broken)
            .expect_err("unknown type must fail");
        assert!(registry.contains("A"));
        assert!(!registry.contains("B"));
    }

    #[test]
    fn concrete_candidates_follow_prototype_chain() {
        let registry = registry(json!({
            "Shape": { "nature": "prototype" },
            "Circle": { "prototype": "Shape" },
            "Square": { "prototype": "Shape" },
            "Other": {}
        }))
        .expect("registry should load");

        assert_eq!(
            registry.concrete_candidates(&["Shape".to_string()]),
            vec!["Circle".to_string(), "Square".to_string()]
        );
        assert!(registry.accepts(&["Shape".to_string()], "Circle"));
        assert!(!registry.accepts(&["Shape".to_string()], "Other"));
    }
}
