//! Attribute slots and values.
//!
//! # Responsibility
//! - Hold one materialized attribute with its declaration and current value.
//! - Convert scalar values from JSON input and editor text.
//!
//! # Invariants
//! - `is_required` and `is_optional` are exclusive.
//! - Only optional attributes can be deleted.

use crate::model::concept::ConceptId;
use crate::schema::definition::{AttributeSchema, ValueType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use uuid::Uuid;

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("identifier regex must compile")
});

/// Required/optional discriminant of an attribute declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUse {
    Required,
    Optional,
}

impl AttributeUse {
    pub fn of(schema: &AttributeSchema) -> Self {
        if schema.required {
            Self::Required
        } else {
            Self::Optional
        }
    }
}

/// Current value of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Unset,
    Text(String),
    Number(f64),
    Boolean(bool),
    Identifier(String),
    /// Non-owning link.
    Reference(ConceptId),
    /// Owned sub-concept.
    Concept(ConceptId),
    /// Owned sub-concepts in stored order.
    Set(Vec<ConceptId>),
}

impl AttributeValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Text shown for primitive values; empty for structural ones.
    pub fn display(&self) -> String {
        match self {
            Self::Text(text) | Self::Identifier(text) => text.clone(),
            Self::Number(number) => format_number(*number),
            Self::Boolean(flag) => flag.to_string(),
            Self::Unset | Self::Reference(_) | Self::Concept(_) | Self::Set(_) => String::new(),
        }
    }

    /// Returns whether this value can be stored in an attribute of `kind`.
    pub fn matches(&self, kind: &ValueType) -> bool {
        matches!(
            (self, kind),
            (Self::Unset, _)
                | (Self::Text(_), ValueType::String)
                | (Self::Number(_), ValueType::Number)
                | (Self::Boolean(_), ValueType::Boolean)
                | (Self::Identifier(_), ValueType::Identifier)
                | (Self::Reference(_), ValueType::Reference)
                | (Self::Set(_), ValueType::Set)
                | (Self::Concept(_), ValueType::Concept(_))
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Text(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Identifier(_) => "ID",
            Self::Reference(_) => "reference",
            Self::Concept(_) => "concept",
            Self::Set(_) => "set",
        }
    }
}

/// One materialized attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    schema: AttributeSchema,
    value: AttributeValue,
}

impl Attribute {
    pub(crate) fn new(name: impl Into<String>, schema: AttributeSchema, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            schema,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn kind(&self) -> &ValueType {
        &self.schema.kind
    }

    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    pub fn usage(&self) -> AttributeUse {
        AttributeUse::of(&self.schema)
    }

    pub fn is_required(&self) -> bool {
        self.usage() == AttributeUse::Required
    }

    pub fn is_optional(&self) -> bool {
        self.usage() == AttributeUse::Optional
    }

    pub fn can_delete(&self) -> bool {
        self.is_optional()
    }

    pub fn min(&self) -> usize {
        self.schema.min.unwrap_or(0)
    }

    pub fn max(&self) -> Option<usize> {
        self.schema.max
    }

    /// Set elements in stored order; empty for other kinds.
    pub fn elements(&self) -> &[ConceptId] {
        match &self.value {
            AttributeValue::Set(elements) => elements,
            _ => &[],
        }
    }

    pub fn can_add_element(&self) -> bool {
        self.max().map_or(true, |max| self.elements().len() < max)
    }

    pub fn can_remove_element(&self) -> bool {
        self.elements().len() > self.min()
    }

    /// Owned sub-concepts held by this attribute.
    pub fn owned(&self) -> Vec<ConceptId> {
        match &self.value {
            AttributeValue::Concept(id) => vec![*id],
            AttributeValue::Set(elements) => elements.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn set_value(&mut self, value: AttributeValue) -> AttributeValue {
        std::mem::replace(&mut self.value, value)
    }

    pub(crate) fn value_mut(&mut self) -> &mut AttributeValue {
        &mut self.value
    }
}

/// Ordered attribute list, unique by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<Attribute>,
}

impl AttributeSet {
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.entries.iter().find(|attribute| attribute.name == name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.entries.iter_mut().find(|attribute| attribute.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends `attribute`, replacing an existing entry with the same name.
    pub(crate) fn push(&mut self, attribute: Attribute) {
        match self.get_mut(&attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.entries.push(attribute),
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Attribute> {
        let index = self.entries.iter().position(|attribute| attribute.name == name)?;
        Some(self.entries.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Attribute> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Initial value of a required primitive attribute.
pub(crate) fn primitive_default(schema: &AttributeSchema) -> AttributeValue {
    if let Some(value) = schema
        .default
        .as_ref()
        .and_then(|raw| scalar_from_json(&schema.kind, raw))
    {
        return value;
    }
    match schema.kind {
        ValueType::String => AttributeValue::Text(String::new()),
        ValueType::Number => AttributeValue::Number(0.0),
        ValueType::Boolean => AttributeValue::Boolean(false),
        ValueType::Identifier => AttributeValue::Identifier(generate_identifier()),
        _ => AttributeValue::Unset,
    }
}

pub(crate) fn generate_identifier() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("id_{}", &raw[..8])
}

/// Decodes a JSON scalar for a primitive attribute type.
pub(crate) fn scalar_from_json(kind: &ValueType, value: &Value) -> Option<AttributeValue> {
    match (kind, value) {
        (ValueType::String, Value::String(text)) => Some(AttributeValue::Text(text.clone())),
        (ValueType::Number, Value::Number(number)) => number.as_f64().map(AttributeValue::Number),
        (ValueType::Boolean, Value::Bool(flag)) => Some(AttributeValue::Boolean(*flag)),
        (ValueType::Identifier, Value::String(text)) => {
            Some(AttributeValue::Identifier(text.clone()))
        }
        _ => None,
    }
}

/// Encodes a primitive value; integral numbers export without a fraction.
pub(crate) fn scalar_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Text(text) | AttributeValue::Identifier(text) => {
            Value::String(text.clone())
        }
        AttributeValue::Number(number) => number_to_json(*number),
        AttributeValue::Boolean(flag) => Value::Bool(*flag),
        _ => Value::Null,
    }
}

/// Parses editor text for a primitive attribute type.
///
/// # Errors
/// Returns a message suitable for a projection error when the text does not
/// parse as `kind`.
pub fn parse_input(kind: &ValueType, text: &str) -> Result<AttributeValue, String> {
    match kind {
        ValueType::String => Ok(AttributeValue::Text(text.to_string())),
        ValueType::Number => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .map(AttributeValue::Number)
            .ok_or_else(|| format!("expected a number, got `{}`", text.trim())),
        ValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(AttributeValue::Boolean(true)),
            "false" => Ok(AttributeValue::Boolean(false)),
            other => Err(format!("expected true or false, got `{other}`")),
        },
        ValueType::Identifier => {
            let trimmed = text.trim();
            if IDENTIFIER_PATTERN.is_match(trimmed) {
                Ok(AttributeValue::Identifier(trimmed.to_string()))
            } else {
                Err(format!("`{trimmed}` is not a valid identifier"))
            }
        }
        other => Err(format!(
            "attributes of type `{}` are not edited as text",
            other.as_str()
        )),
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

fn number_to_json(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_input, primitive_default, scalar_to_json, Attribute, AttributeValue};
    use crate::schema::definition::{AttributeSchema, ValueType};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn required_and_optional_are_exclusive() {
        let mut schema = AttributeSchema::new(ValueType::String);
        let required = Attribute::new("name", schema.clone(), AttributeValue::Unset);
        assert!(required.is_required());
        assert!(!required.is_optional());
        assert!(!required.can_delete());

        schema.required = false;
        let optional = Attribute::new("note", schema, AttributeValue::Unset);
        assert!(optional.is_optional());
        assert!(optional.can_delete());
    }

    #[test]
    fn set_bounds_gate_element_changes() {
        let mut schema = AttributeSchema::new(ValueType::Set);
        schema.min = Some(1);
        schema.max = Some(2);
        let elements = vec![Uuid::new_v4()];
        let attribute = Attribute::new("items", schema, AttributeValue::Set(elements));

        assert!(attribute.can_add_element());
        assert!(!attribute.can_remove_element());
    }

    #[test]
    fn defaults_use_declared_value_then_type_default() {
        let mut schema = AttributeSchema::new(ValueType::Number);
        assert_eq!(primitive_default(&schema), AttributeValue::Number(0.0));
        schema.default = Some(json!(3));
        assert_eq!(primitive_default(&schema), AttributeValue::Number(3.0));

        let id = primitive_default(&AttributeSchema::new(ValueType::Identifier));
        assert!(matches!(id, AttributeValue::Identifier(value) if value.starts_with("id_")));
    }

    #[test]
    fn parse_input_rejects_malformed_text() {
        assert_eq!(
            parse_input(&ValueType::Number, " 42 "),
            Ok(AttributeValue::Number(42.0))
        );
        assert!(parse_input(&ValueType::Number, "forty").is_err());
        assert!(parse_input(&ValueType::Boolean, "maybe").is_err());
        assert!(parse_input(&ValueType::Identifier, "1abc").is_err());
        assert!(parse_input(&ValueType::Set, "x").is_err());
    }

    #[test]
    fn integral_numbers_export_without_fraction() {
        assert_eq!(scalar_to_json(&AttributeValue::Number(4.0)), json!(4));
        assert_eq!(scalar_to_json(&AttributeValue::Number(1.5)), json!(1.5));
        assert_eq!(AttributeValue::Number(7.0).display(), "7");
    }
}
