//! Editor session use-case service.
//!
//! # Responsibility
//! - Own one concept model, its projection engine, undo history, and
//!   restore points.
//! - Route projection edits to concept model mutations and refresh views.
//! - Snapshot the model into history after every committed edit.
//!
//! # Invariants
//! - Every successful edit is followed by a refresh and one history entry.
//! - Failed edits leave the model, views, and history unchanged.
//! - Undo/redo rebuild the whole model from a snapshot; views follow on the
//!   same refresh.

use crate::config::{ConfigError, EditorConfig};
use crate::history::state_log::{State, StateId, StateLog};
use crate::history::undo::History;
use crate::model::attribute::parse_input;
use crate::model::concept::{ConceptId, Slot};
use crate::model::concept_model::{ConceptModel, InvalidModelError, LoadReport, ModelResult};
use crate::model::snapshot::ModelSnapshot;
use crate::notify::bus::{ChangeSource, Listener, ListenerId};
use crate::notify::dispatch::{ActionEvent, DispatchOutcome, Handler, HandlerId, HandlerRegistry};
use crate::projection::element::{Element, ProjectionId};
use crate::projection::engine::{ProjectionEngine, ProjectionError, RefreshReport};
use crate::schema::definition::{MetaModelSchema, ProjectionEntry, ValueType};
use crate::schema::registry::{InvalidMetaModelError, SchemaRegistry};
use log::{info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for editor session use-cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    MetaModel(InvalidMetaModelError),
    Model(InvalidModelError),
    Config(ConfigError),
    Projection(ProjectionError),
    /// Field text does not parse as the attribute type.
    Parse {
        projection: ProjectionId,
        slot: String,
        message: String,
    },
    StateNotFound(StateId),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MetaModel(err) => write!(f, "{err}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Projection(err) => write!(f, "{err}"),
            Self::Parse {
                projection,
                slot,
                message,
            } => write!(f, "invalid input for `{slot}` in {projection}: {message}"),
            Self::StateNotFound(id) => write!(f, "state not found: {id}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MetaModel(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Projection(err) => Some(err),
            Self::Parse { .. } | Self::StateNotFound(_) => None,
        }
    }
}

impl From<InvalidMetaModelError> for SessionError {
    fn from(value: InvalidMetaModelError) -> Self {
        Self::MetaModel(value)
    }
}

impl From<InvalidModelError> for SessionError {
    fn from(value: InvalidModelError) -> Self {
        Self::Model(value)
    }
}

impl From<ConfigError> for SessionError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ProjectionError> for SessionError {
    fn from(value: ProjectionError) -> Self {
        Self::Projection(value)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Editing context for one metamodel and its instances.
#[derive(Debug)]
pub struct EditorSession {
    model: ConceptModel,
    engine: ProjectionEngine,
    history: History<ModelSnapshot>,
    states: StateLog,
    handlers: HandlerRegistry,
    config: EditorConfig,
}

impl EditorSession {
    /// Opens an empty session for a metamodel and external projections.
    ///
    /// # Errors
    /// - `MetaModel` when the schema does not resolve.
    /// - `Config` when `@config.settings` holds invalid values.
    pub fn new(schema: MetaModelSchema, projections: Vec<ProjectionEntry>) -> SessionResult<Self> {
        let registry = SchemaRegistry::from_schema(schema)?;
        let config = EditorConfig::from_language(registry.config())?;
        let model = ConceptModel::new(registry);
        let mut engine = ProjectionEngine::from_schema(model.registry(), projections);
        engine.attach(&model);
        let history = History::with_depth(model.snapshot(), config.undo_depth);
        let states = StateLog::with_capacity(config.history_capacity);

        info!(
            "event=session_open module=service status=ok concepts={} templates={} history_capacity={}",
            model.registry().len(),
            engine.registry().len(),
            config.history_capacity
        );
        Ok(Self {
            model,
            engine,
            history,
            states,
            handlers: HandlerRegistry::new(),
            config,
        })
    }

    /// Opens a session from raw schema and projection JSON.
    pub fn from_json(schema: &Value, projections: &Value) -> SessionResult<Self> {
        let schema = MetaModelSchema::from_value(schema)?;
        let projections = if projections.is_null() {
            Vec::new()
        } else {
            ProjectionEntry::list_from_value(projections)?
        };
        Self::new(schema, projections)
    }

    /// Opens a session and imports exported values in one step.
    ///
    /// Roots that fail to load are reported, not fatal.
    pub fn load_concept_model(
        schema: &Value,
        projections: &Value,
        values: &Value,
    ) -> SessionResult<(Self, LoadReport)> {
        let mut session = Self::from_json(schema, projections)?;
        let report = session.load_values(values);
        Ok((session, report))
    }

    pub fn model(&self) -> &ConceptModel {
        &self.model
    }

    pub fn engine(&self) -> &ProjectionEngine {
        &self.engine
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &History<ModelSnapshot> {
        &self.history
    }

    pub fn states(&self) -> &StateLog {
        &self.states
    }

    pub fn register<L>(&self, listener: L) -> ListenerId
    where
        L: Listener + 'static,
    {
        self.model.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.model.unregister(id)
    }

    /// Imports root values and creates a view for each loaded root.
    pub fn load_values(&mut self, values: &Value) -> LoadReport {
        let report = self.model.load_values(values);
        self.engine.project_roots(&self.model);
        if !report.loaded.is_empty() {
            self.commit();
        }
        report
    }

    /// Creates a root concept and its view.
    pub fn create_root(
        &mut self,
        type_name: &str,
        values: Option<&Value>,
    ) -> SessionResult<(ConceptId, ProjectionId)> {
        let concept = self.model.create_concept_with(type_name, values)?;
        let view = self.engine.project(&self.model, concept)?;
        self.commit();
        Ok((concept, view))
    }

    pub fn views(&self) -> Vec<ProjectionId> {
        self.engine.views()
    }

    pub fn render_tree(&self, projection: ProjectionId) -> Option<Element> {
        self.engine.render_tree(projection)
    }

    pub fn render_text(&self, projection: ProjectionId) -> Option<String> {
        self.engine.render_text(projection)
    }

    pub fn errors(&self) -> Vec<(ProjectionId, String)> {
        self.engine.errors()
    }

    pub fn export(&self) -> Value {
        self.model.export()
    }

    /// Parses `text` against the bound attribute type and stores it.
    ///
    /// Reference fields take the target's identifier; empty text clears them.
    ///
    /// # Errors
    /// - `Parse` when the text does not fit the attribute type; the
    ///   projection carries the message and the model is untouched.
    /// - `Model` for any rejected mutation.
    pub fn edit_field(&mut self, projection: ProjectionId, slot: &Slot, text: &str) -> SessionResult<()> {
        let concept = self.concept_of(projection)?;
        let attribute = self
            .model
            .concept(concept)
            .and_then(|owner| owner.slot(slot))
            .ok_or_else(|| InvalidModelError::AttributeNotCreated(slot.to_string()))?;
        let kind = attribute.kind().clone();

        let result = match kind {
            ValueType::Reference => {
                let key = text.trim();
                if key.is_empty() {
                    self.apply(projection, |model| model.set_reference(concept, slot, None))
                } else {
                    match self.model.find_by_key(&attribute.schema().accept, key) {
                        Some(target) => self.apply(projection, |model| {
                            model.set_reference(concept, slot, Some(target))
                        }),
                        None => Err(self.parse_failure(
                            projection,
                            slot,
                            format!("no concept with key `{key}`"),
                        )),
                    }
                }
            }
            ref primitive if primitive.is_primitive() => match parse_input(primitive, text) {
                Ok(value) => self.apply(projection, |model| model.set_value(concept, slot, value)),
                Err(message) => Err(self.parse_failure(projection, slot, message)),
            },
            other => Err(SessionError::Model(InvalidModelError::TypeMismatch {
                slot: slot.to_string(),
                expected: other.as_str().to_string(),
                found: "text".to_string(),
            })),
        };
        if result.is_ok() {
            self.engine.clear_error(projection);
        }
        result
    }

    /// Materializes an optional attribute of the bound concept.
    pub fn add_attribute(&mut self, projection: ProjectionId, slot: &Slot) -> SessionResult<()> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| model.create_attribute(concept, slot, None))
    }

    pub fn remove_attribute(
        &mut self,
        projection: ProjectionId,
        slot: &Slot,
    ) -> SessionResult<Vec<ConceptId>> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| model.remove_attribute(concept, slot))
    }

    pub fn add_component(&mut self, projection: ProjectionId, component: &str) -> SessionResult<()> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| model.create_component(concept, component))
    }

    /// Appends a set element; `type_name` is needed only when the set accepts
    /// more than one concrete type.
    pub fn add_element(
        &mut self,
        projection: ProjectionId,
        slot: &Slot,
        type_name: Option<&str>,
    ) -> SessionResult<ConceptId> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| {
            model.add_element(concept, slot, type_name, None)
        })
    }

    pub fn remove_element(
        &mut self,
        projection: ProjectionId,
        slot: &Slot,
        element: ConceptId,
    ) -> SessionResult<Vec<ConceptId>> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| model.remove_element(concept, slot, element))
    }

    /// Sets the concrete type of a concept-typed attribute.
    pub fn choose_concept(
        &mut self,
        projection: ProjectionId,
        slot: &Slot,
        type_name: &str,
    ) -> SessionResult<ConceptId> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| {
            model.assign_concept(concept, slot, Some(type_name), None)
        })
    }

    pub fn set_reference(
        &mut self,
        projection: ProjectionId,
        slot: &Slot,
        target: Option<ConceptId>,
    ) -> SessionResult<()> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| model.set_reference(concept, slot, target))
    }

    /// Deletes the concept bound to `projection`.
    pub fn remove_value(&mut self, projection: ProjectionId) -> SessionResult<Vec<ConceptId>> {
        let concept = self.concept_of(projection)?;
        self.apply(projection, |model| model.remove_value(concept))
    }

    /// Cycles the concept template of a projection; view state only.
    pub fn change_projection(&mut self, projection: ProjectionId) -> SessionResult<usize> {
        Ok(self.engine.change_projection(&self.model, projection)?)
    }

    /// Cycles the template of one component of the bound concept.
    pub fn change_component_projection(
        &mut self,
        projection: ProjectionId,
        component: &str,
    ) -> SessionResult<usize> {
        let concept = self.concept_of(projection)?;
        let count = self
            .engine
            .component_template_count(&self.model, concept, component);
        self.apply(projection, |model| {
            model.change_projection(concept, component, count)
        })
    }

    pub fn has_undo(&self) -> bool {
        self.history.has_undo()
    }

    pub fn has_redo(&self) -> bool {
        self.history.has_redo()
    }

    /// Steps back one committed edit; `false` at the oldest entry.
    pub fn undo(&mut self) -> SessionResult<bool> {
        let Some(snapshot) = self.history.undo().cloned() else {
            return Ok(false);
        };
        if let Err(err) = self.replace_model(&snapshot) {
            self.history.redo();
            return Err(err);
        }
        Ok(true)
    }

    /// Steps forward one undone edit; `false` at the newest entry.
    pub fn redo(&mut self) -> SessionResult<bool> {
        let Some(snapshot) = self.history.redo().cloned() else {
            return Ok(false);
        };
        if let Err(err) = self.replace_model(&snapshot) {
            self.history.undo();
            return Err(err);
        }
        Ok(true)
    }

    /// Records a restore point for `concept`.
    pub fn add_state(&mut self, concept: ConceptId) -> SessionResult<StateId> {
        let snapshot = self
            .model
            .snapshot_concept(concept)
            .ok_or(InvalidModelError::ConceptNotFound(concept))?;
        let element = self.engine.projections_of(concept).first().copied();
        Ok(self.states.add_state(concept, snapshot, element))
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id)
    }

    /// Rebuilds the captured concept in place of its current instance.
    ///
    /// A concept no longer in the model comes back as a new root.
    pub fn restore_state(&mut self, id: StateId) -> SessionResult<ConceptId> {
        let state = self
            .states
            .get(id)
            .cloned()
            .ok_or(SessionError::StateNotFound(id))?;
        let source = state
            .element
            .map_or(ChangeSource::Api, ChangeSource::Projection);
        let previous = self.model.set_source(source);
        let result = if self.model.contains(state.concept) {
            self.model.restore(state.concept, &state.value)
        } else {
            self.model.restore_root(&state.value)
        };
        self.model.set_source(previous);
        let restored = result?;
        self.engine.project_roots(&self.model);
        self.commit();
        Ok(restored)
    }

    pub fn on_action<H>(&mut self, action: impl Into<String>, handler: H) -> HandlerId
    where
        H: Handler + 'static,
    {
        self.handlers.on(action, handler)
    }

    pub fn off_action(&mut self, id: HandlerId) -> bool {
        self.handlers.off(id)
    }

    /// Runs the handlers named by the projection template's `action`.
    pub fn trigger_action(&mut self, projection: ProjectionId) -> SessionResult<DispatchOutcome> {
        let concept = self.concept_of(projection)?;
        let Some(action) = self
            .engine
            .template(projection)
            .and_then(|template| template.action)
        else {
            return Ok(DispatchOutcome::default());
        };
        Ok(self.handlers.dispatch(&ActionEvent {
            action,
            projection,
            concept,
        }))
    }

    fn concept_of(&self, projection: ProjectionId) -> SessionResult<ConceptId> {
        self.engine
            .concept_of(projection)
            .ok_or(SessionError::Projection(ProjectionError::ProjectionNotFound(
                projection,
            )))
    }

    /// Runs one model mutation attributed to `projection`, then commits.
    fn apply<T>(
        &mut self,
        projection: ProjectionId,
        edit: impl FnOnce(&mut ConceptModel) -> ModelResult<T>,
    ) -> SessionResult<T> {
        let previous = self.model.set_source(ChangeSource::Projection(projection));
        let result = edit(&mut self.model);
        self.model.set_source(previous);
        let value = result?;
        self.commit();
        Ok(value)
    }

    fn parse_failure(&mut self, projection: ProjectionId, slot: &Slot, message: String) -> SessionError {
        warn!(
            "event=field_edit module=service status=error projection={} slot={}",
            projection, slot
        );
        self.engine.set_error(projection, message.clone());
        SessionError::Parse {
            projection,
            slot: slot.to_string(),
            message,
        }
    }

    fn replace_model(&mut self, snapshot: &ModelSnapshot) -> SessionResult<RefreshReport> {
        let previous = self.model.set_source(ChangeSource::History);
        let result = self.model.replace_all(snapshot);
        self.model.set_source(previous);
        result?;
        Ok(self.engine.refresh(&self.model))
    }

    fn commit(&mut self) -> RefreshReport {
        let report = self.engine.refresh(&self.model);
        self.history.set(&self.model.snapshot());
        report
    }
}
