//! Use-case orchestration over the model, projections, and history.

pub mod editor_session;
