//! Declarative metamodel and projection schema shapes.
//!
//! # Responsibility
//! - Deserialize the metamodel object (`@root`, `@config`, concept entries).
//! - Deserialize projection template lists bound to concept/component names.
//!
//! # Invariants
//! - Attribute `required` defaults to `true` when omitted.
//! - Unrecognized attribute type names are kept as concept type references;
//!   the registry decides whether they resolve.

use crate::config::LanguageConfig;
use crate::schema::registry::InvalidMetaModelError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level key naming the entry concept of a language.
pub const ROOT_KEY: &str = "@root";
/// Top-level key holding language configuration.
pub const CONFIG_KEY: &str = "@config";

/// Discriminant of a concept schema entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nature {
    /// Instantiable concept.
    #[default]
    Concrete,
    /// Abstract base merged into concrete descendants.
    Prototype,
}

impl Nature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concrete => "concrete",
            Self::Prototype => "prototype",
        }
    }
}

/// Declared value type of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    /// Identifier used as the target key of references (`ID`).
    Identifier,
    /// Non-owning link to another concept, constrained by `accept`.
    Reference,
    /// Ordered collection of owned sub-concepts, constrained by `accept`.
    Set,
    /// Owned sub-concept of the named concept type.
    Concept(String),
}

impl ValueType {
    /// Returns whether values of this type are stored inline.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Number | Self::Boolean | Self::Identifier
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Identifier => "ID",
            Self::Reference => "reference",
            Self::Set => "set",
            Self::Concept(name) => name.as_str(),
        }
    }
}

impl From<String> for ValueType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "ID" => Self::Identifier,
            "reference" => Self::Reference,
            "set" => Self::Set,
            _ => Self::Concept(value),
        }
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        value.as_str().to_string()
    }
}

/// One attribute declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    #[serde(rename = "type")]
    pub kind: ValueType,
    /// Allowed target concept names for `reference` and `set`.
    #[serde(default, deserialize_with = "deserialize_accept")]
    pub accept: Vec<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Lower cardinality bound for `set`.
    #[serde(default)]
    pub min: Option<usize>,
    /// Upper cardinality bound for `set`.
    #[serde(default)]
    pub max: Option<usize>,
    /// Initial value for primitive types.
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AttributeSchema {
    /// Creates a required declaration with no constraints.
    pub fn new(kind: ValueType) -> Self {
        Self {
            kind,
            accept: Vec::new(),
            required: true,
            min: None,
            max: None,
            default: None,
            description: None,
        }
    }
}

/// Named attribute grouping owned by a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSchema {
    pub name: String,
    #[serde(default)]
    pub attribute: BTreeMap<String, AttributeSchema>,
    /// Alternative layouts, cycled with `change_projection`.
    #[serde(default)]
    pub projection: Vec<ProjectionTemplate>,
    #[serde(default = "default_required")]
    pub required: bool,
}

/// One concept entry of the metamodel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptSchema {
    #[serde(default)]
    pub nature: Nature,
    #[serde(default)]
    pub prototype: Option<String>,
    #[serde(default)]
    pub attribute: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    pub component: Vec<ComponentSchema>,
    /// Attribute whose value identifies instances for references.
    #[serde(default)]
    pub idref: Option<String>,
    #[serde(default)]
    pub projection: Vec<ProjectionTemplate>,
}

/// Layout template bound to a concept or component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionTemplate {
    /// `text` or `table`; other values surface as unimplemented.
    #[serde(rename = "type")]
    pub kind: String,
    pub layout: String,
    #[serde(default)]
    pub style: Option<Value>,
    /// Handler name triggered when the projection is activated.
    #[serde(default)]
    pub action: Option<String>,
}

impl ProjectionTemplate {
    pub fn text(layout: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            layout: layout.into(),
            style: None,
            action: None,
        }
    }
}

/// Projection schema entry keyed by concept name or `<concept>:<component>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    pub concept: String,
    #[serde(flatten)]
    pub template: ProjectionTemplate,
}

impl ProjectionEntry {
    /// Parses a projection schema list.
    pub fn list_from_value(value: &Value) -> Result<Vec<Self>, InvalidMetaModelError> {
        serde_json::from_value(value.clone()).map_err(|err| InvalidMetaModelError::InvalidEntry {
            name: "projection".to_string(),
            message: err.to_string(),
        })
    }
}

/// Complete metamodel input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaModelSchema {
    pub root: Option<String>,
    pub config: LanguageConfig,
    pub concepts: BTreeMap<String, ConceptSchema>,
}

impl MetaModelSchema {
    /// Splits the reserved `@` keys from concept entries.
    ///
    /// # Errors
    /// - Returns `NotAnObject` for non-object input.
    /// - Returns `InvalidEntry` naming the first entry that fails to decode.
    pub fn from_value(value: &Value) -> Result<Self, InvalidMetaModelError> {
        let Some(entries) = value.as_object() else {
            return Err(InvalidMetaModelError::NotAnObject);
        };

        let mut schema = Self::default();
        for (key, entry) in entries {
            match key.as_str() {
                ROOT_KEY => {
                    let root = entry
                        .as_str()
                        .ok_or_else(|| InvalidMetaModelError::InvalidEntry {
                            name: key.clone(),
                            message: "expected a concept name".to_string(),
                        })?;
                    schema.root = Some(root.to_string());
                }
                CONFIG_KEY => {
                    schema.config = serde_json::from_value(entry.clone()).map_err(|err| {
                        InvalidMetaModelError::InvalidEntry {
                            name: key.clone(),
                            message: err.to_string(),
                        }
                    })?;
                }
                name => {
                    let concept: ConceptSchema =
                        serde_json::from_value(entry.clone()).map_err(|err| {
                            InvalidMetaModelError::InvalidEntry {
                                name: name.to_string(),
                                message: err.to_string(),
                            }
                        })?;
                    schema.concepts.insert(name.to_string(), concept);
                }
            }
        }
        Ok(schema)
    }

    pub fn from_json_str(input: &str) -> Result<Self, InvalidMetaModelError> {
        let value: Value = serde_json::from_str(input)
            .map_err(|err| InvalidMetaModelError::Parse(err.to_string()))?;
        Self::from_value(&value)
    }
}

fn default_required() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AcceptRepr {
    One(String),
    Many(Vec<String>),
}

fn deserialize_accept<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match AcceptRepr::deserialize(deserializer)? {
        AcceptRepr::One(name) => vec![name],
        AcceptRepr::Many(names) => names,
    })
}

#[cfg(test)]
mod tests {
    use super::{MetaModelSchema, Nature, ValueType};
    use serde_json::json;

    #[test]
    fn splits_reserved_keys_from_concepts() {
        let schema = MetaModelSchema::from_value(&json!({
            "@root": "Model",
            "@config": { "language": "demo", "settings": { "history_capacity": 4 } },
            "Model": { "nature": "concrete" }
        }))
        .expect("schema should decode");

        assert_eq!(schema.root.as_deref(), Some("Model"));
        assert_eq!(schema.config.language.as_deref(), Some("demo"));
        assert_eq!(schema.concepts.len(), 1);
        assert_eq!(schema.concepts["Model"].nature, Nature::Concrete);
    }

    #[test]
    fn accept_decodes_single_name_or_list() {
        let schema = MetaModelSchema::from_value(&json!({
            "Model": {
                "attribute": {
                    "one": { "type": "reference", "accept": "Item" },
                    "many": { "type": "set", "accept": ["Item", "Other"], "required": false }
                }
            }
        }))
        .expect("schema should decode");

        let attrs = &schema.concepts["Model"].attribute;
        assert_eq!(attrs["one"].accept, vec!["Item".to_string()]);
        assert_eq!(attrs["many"].accept.len(), 2);
        assert!(attrs["one"].required);
        assert!(!attrs["many"].required);
    }

    #[test]
    fn value_type_maps_primitives_and_concept_names() {
        assert_eq!(ValueType::from("ID".to_string()), ValueType::Identifier);
        assert_eq!(ValueType::from("set".to_string()), ValueType::Set);
        assert_eq!(
            ValueType::from("Address".to_string()),
            ValueType::Concept("Address".to_string())
        );
        assert!(ValueType::Number.is_primitive());
        assert!(!ValueType::Reference.is_primitive());
    }
}
