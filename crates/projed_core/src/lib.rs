//! Core of a projectional metamodel editor.
//! Concept graph, template-driven projections, and editing history live here;
//! hosts render the element trees and forward user edits back.

pub mod config;
pub mod history;
pub mod logging;
pub mod model;
pub mod notify;
pub mod projection;
pub mod schema;
pub mod service;

pub use config::{ConfigError, EditorConfig, LanguageConfig};
pub use history::state_log::{State, StateId, StateLog};
pub use history::undo::History;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::attribute::{Attribute, AttributeValue};
pub use model::concept::{Concept, ConceptId, Slot};
pub use model::concept_model::{ConceptModel, InvalidModelError, LoadReport, ModelResult};
pub use model::snapshot::{ConceptSnapshot, ModelSnapshot};
pub use notify::bus::{ChangeKind, ChangeSource, Listener, ListenerId, Message, Notification};
pub use notify::dispatch::{ActionEvent, DispatchOutcome, HandlerFailure};
pub use projection::element::{Element, ProjectionId};
pub use projection::engine::{ProjectionEngine, ProjectionError, ProjectionState, RefreshReport};
pub use projection::registry::UnimplementedError;
pub use schema::definition::{MetaModelSchema, ProjectionEntry, ProjectionTemplate, ValueType};
pub use schema::registry::{InvalidMetaModelError, SchemaRegistry};
pub use service::editor_session::{EditorSession, SessionError, SessionResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
