//! Render output elements.
//!
//! The element set is closed: fields bind values, layouts group and embed,
//! statics carry fixed text, and algorithms are editing affordances.

use crate::model::concept::{ConceptId, Slot};
use crate::schema::definition::ValueType;
use std::fmt::{Display, Formatter};

/// Engine-unique projection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectionId(u64);

impl ProjectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ProjectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Editable binding to one primitive or reference attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldElement {
    pub concept: ConceptId,
    pub slot: Slot,
    pub kind: ValueType,
    pub value: String,
    /// Optional attributes can be removed from the view.
    pub removable: bool,
}

impl FieldElement {
    pub fn is_identifier(&self) -> bool {
        self.kind == ValueType::Identifier
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticElement {
    Text(String),
    LineBreak,
    /// Rendering problem shown in place of the failing part.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutElement {
    Flow(Vec<Element>),
    /// Rows of cells, each cell a flow of elements.
    Table(Vec<Vec<Vec<Element>>>),
    /// Child projection, expanded by `render_tree`.
    Projection(ProjectionId),
    /// Child projection after expansion.
    Embedded {
        projection: ProjectionId,
        body: Box<Element>,
    },
    /// Set elements in stored order.
    Set {
        concept: ConceptId,
        slot: Slot,
        items: Vec<Element>,
        can_remove: bool,
    },
    Component {
        concept: ConceptId,
        name: String,
        template_index: usize,
        template_count: usize,
        body: Vec<Element>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmElement {
    /// Materialize an optional attribute.
    AddAttribute { concept: ConceptId, slot: Slot },
    AddComponent { concept: ConceptId, component: String },
    AddElement {
        concept: ConceptId,
        slot: Slot,
        candidates: Vec<String>,
    },
    /// Pick the concrete type of an unset concept-typed attribute.
    ChooseConcept {
        concept: ConceptId,
        slot: Slot,
        candidates: Vec<String>,
    },
    /// Cycle the active template; `component` is `None` for the concept itself.
    SwitchProjection {
        projection: ProjectionId,
        component: Option<String>,
        template_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Field(FieldElement),
    Layout(LayoutElement),
    Static(StaticElement),
    Algorithm(AlgorithmElement),
}

impl Element {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Static(StaticElement::Text(text.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Static(StaticElement::Error(message.into()))
    }

    /// Plain-text rendering; affordances contribute nothing.
    pub fn to_text(&self) -> String {
        match self {
            Self::Field(field) => field.value.clone(),
            Self::Static(StaticElement::Text(text)) => text.clone(),
            Self::Static(StaticElement::LineBreak) => "\n".to_string(),
            Self::Static(StaticElement::Error(message)) => format!("[error: {message}]"),
            Self::Layout(LayoutElement::Flow(children)) => concat(children),
            Self::Layout(LayoutElement::Table(rows)) => rows
                .iter()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|cell| concat(cell).trim().to_string())
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Layout(LayoutElement::Projection(_)) => String::new(),
            Self::Layout(LayoutElement::Embedded { body, .. }) => body.to_text(),
            Self::Layout(LayoutElement::Set { items, .. }) => items
                .iter()
                .map(Element::to_text)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Layout(LayoutElement::Component { body, .. }) => concat(body),
            Self::Algorithm(_) => String::new(),
        }
    }

    /// Fields in document order, nested layouts included.
    pub fn fields(&self) -> Vec<&FieldElement> {
        let mut fields = Vec::new();
        self.walk(&mut |element| {
            if let Element::Field(field) = element {
                fields.push(field);
            }
        });
        fields
    }

    /// Affordances in document order, nested layouts included.
    pub fn algorithms(&self) -> Vec<&AlgorithmElement> {
        let mut algorithms = Vec::new();
        self.walk(&mut |element| {
            if let Element::Algorithm(algorithm) = element {
                algorithms.push(algorithm);
            }
        });
        algorithms
    }

    fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Element)) {
        visit(self);
        match self {
            Self::Layout(LayoutElement::Flow(children))
            | Self::Layout(LayoutElement::Set {
                items: children, ..
            })
            | Self::Layout(LayoutElement::Component { body: children, .. }) => {
                for child in children {
                    child.walk(visit);
                }
            }
            Self::Layout(LayoutElement::Table(rows)) => {
                for child in rows.iter().flatten().flatten() {
                    child.walk(visit);
                }
            }
            Self::Layout(LayoutElement::Embedded { body, .. }) => body.walk(visit),
            _ => {}
        }
    }
}

fn concat(elements: &[Element]) -> String {
    elements.iter().map(Element::to_text).collect()
}

#[cfg(test)]
mod tests {
    use super::{Element, FieldElement, LayoutElement, StaticElement};
    use crate::model::concept::Slot;
    use crate::schema::definition::ValueType;
    use uuid::Uuid;

    fn field(value: &str) -> Element {
        Element::Field(FieldElement {
            concept: Uuid::new_v4(),
            slot: Slot::attribute("name"),
            kind: ValueType::String,
            value: value.to_string(),
            removable: false,
        })
    }

    #[test]
    fn to_text_renders_tables_and_errors() {
        let table = Element::Layout(LayoutElement::Table(vec![
            vec![vec![Element::text("Name ")], vec![field("Ada")]],
            vec![vec![Element::error("boom")]],
        ]));
        assert_eq!(table.to_text(), "Name | Ada\n[error: boom]");
    }

    #[test]
    fn fields_walk_nested_layouts() {
        let tree = Element::Layout(LayoutElement::Flow(vec![
            field("a"),
            Element::Static(StaticElement::LineBreak),
            Element::Layout(LayoutElement::Flow(vec![field("b")])),
        ]));
        let values: Vec<&str> = tree.fields().iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(tree.to_text(), "a\nb");
    }
}
