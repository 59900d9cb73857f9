//! Projections: template registry, layout tokenizer, render elements, and
//! the engine that keeps rendered views in step with the concept model.

pub mod element;
pub mod engine;
pub mod layout;
pub mod registry;
