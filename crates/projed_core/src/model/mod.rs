//! Concept graph: instances, attributes, components, and snapshots.

pub mod attribute;
pub mod component;
pub mod concept;
pub mod concept_model;
pub mod snapshot;
