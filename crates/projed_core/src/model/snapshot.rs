//! Deep, detached copies of concept subtrees.
//!
//! Snapshots keep concept ids so that a restore rebuilds the same identities
//! and references between snapshotted concepts stay valid.

use crate::model::concept::ConceptId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSnapshot {
    pub id: ConceptId,
    pub name: String,
    pub attributes: Vec<AttributeSnapshot>,
    pub components: Vec<ComponentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    pub name: String,
    pub value: SnapshotValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub projection_index: usize,
    pub attributes: Vec<AttributeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SnapshotValue {
    Unset,
    Text(String),
    Number(f64),
    Boolean(bool),
    Identifier(String),
    Reference(ConceptId),
    Concept(Box<ConceptSnapshot>),
    Set(Vec<ConceptSnapshot>),
}

/// Snapshot of every root, in root order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub roots: Vec<ConceptSnapshot>,
}

impl ConceptSnapshot {
    /// Ids of this concept and every owned descendant.
    pub fn subtree_ids(&self) -> Vec<ConceptId> {
        let mut ids = vec![self.id];
        let nested = self
            .attributes
            .iter()
            .chain(self.components.iter().flat_map(|component| component.attributes.iter()));
        for attribute in nested {
            match &attribute.value {
                SnapshotValue::Concept(child) => ids.extend(child.subtree_ids()),
                SnapshotValue::Set(children) => {
                    for child in children {
                        ids.extend(child.subtree_ids());
                    }
                }
                _ => {}
            }
        }
        ids
    }
}
