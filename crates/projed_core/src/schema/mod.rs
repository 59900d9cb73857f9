//! Metamodel input shapes and the concept schema registry.

pub mod definition;
pub mod registry;
