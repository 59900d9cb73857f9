//! Projection engine: binds concepts to templates and renders element trees.
//!
//! # Responsibility
//! - Create one projection per concept view and render it from the selected
//!   template.
//! - Track model notifications and re-render affected projections on
//!   `refresh`.
//! - Cycle templates and report rendering errors per projection.
//!
//! # Invariants
//! - A projection is destroyed when its concept leaves the model.
//! - A projection whose concept was restored from a snapshot is destroyed and
//!   rebuilt, never patched in place.
//! - Child projections are owned by exactly one parent projection.
//! - A failing template marks its own projection only; siblings still render.

use crate::model::attribute::{Attribute, AttributeValue};
use crate::model::component::Component;
use crate::model::concept::{Concept, ConceptId, Slot};
use crate::model::concept_model::ConceptModel;
use crate::notify::bus::{ChangeKind, Listener, ListenerId, Message, Notification};
use crate::projection::element::{
    AlgorithmElement, Element, FieldElement, LayoutElement, ProjectionId, StaticElement,
};
use crate::projection::layout::{table_rows, tokenize, LayoutToken};
use crate::projection::registry::{ProjectionKind, ProjectionRegistry};
use crate::schema::definition::{ProjectionEntry, ProjectionTemplate, ValueType};
use crate::schema::registry::SchemaRegistry;
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// Lifecycle of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionState {
    /// Allocated, not rendered yet.
    Unresolved,
    /// Render in progress.
    Resolving,
    Bound,
    /// Structure of the bound concept changed; re-render on next refresh.
    Stale,
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub id: ProjectionId,
    pub concept: ConceptId,
    pub parent: Option<ProjectionId>,
    pub state: ProjectionState,
    pub template: Option<ProjectionTemplate>,
    pub kind: Option<ProjectionKind>,
    /// Active template index among the candidates for the concept.
    pub index: usize,
    pub template_count: usize,
    /// Projections of concepts that reference this projection's concept.
    pub refs: Vec<ProjectionId>,
    pub error: Option<String>,
    pub body: Element,
    pub children: Vec<ProjectionId>,
    /// A value of the bound concept changed; re-render on next refresh.
    pub dirty: bool,
}

impl Projection {
    fn new(id: ProjectionId, concept: ConceptId, parent: Option<ProjectionId>) -> Self {
        Self {
            id,
            concept,
            parent,
            state: ProjectionState::Unresolved,
            template: None,
            kind: None,
            index: 0,
            template_count: 0,
            refs: Vec::new(),
            error: None,
            body: Element::Layout(LayoutElement::Flow(Vec::new())),
            children: Vec::new(),
            dirty: false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_view(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    ConceptNotFound(ConceptId),
    ProjectionNotFound(ProjectionId),
}

impl Display for ProjectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConceptNotFound(id) => write!(f, "concept not found: {id}"),
            Self::ProjectionNotFound(id) => write!(f, "projection not found: {id}"),
        }
    }
}

impl Error for ProjectionError {}

/// Outcome of one `refresh` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub rerendered: Vec<ProjectionId>,
    pub destroyed: Vec<ProjectionId>,
    /// Root views created for restored or reset concepts.
    pub rebuilt: Vec<ProjectionId>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.rerendered.is_empty() && self.destroyed.is_empty() && self.rebuilt.is_empty()
    }
}

#[derive(Debug, Default)]
struct ProjectionTable {
    projections: BTreeMap<ProjectionId, Projection>,
    by_concept: BTreeMap<ConceptId, BTreeSet<ProjectionId>>,
    /// Root views in creation order.
    views: Vec<ProjectionId>,
    /// Destroyed since the last refresh.
    destroyed: Vec<ProjectionId>,
    restored: Vec<(ConceptId, ConceptId)>,
    reset: bool,
    next_id: u64,
}

impl ProjectionTable {
    fn allocate(&mut self, concept: ConceptId, parent: Option<ProjectionId>) -> ProjectionId {
        self.next_id += 1;
        let id = ProjectionId::new(self.next_id);
        self.projections
            .insert(id, Projection::new(id, concept, parent));
        self.by_concept.entry(concept).or_default().insert(id);
        id
    }

    fn of_concept(&self, concept: ConceptId) -> Vec<ProjectionId> {
        self.by_concept
            .get(&concept)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn mark_stale(&mut self, concept: ConceptId) {
        for id in self.of_concept(concept) {
            if let Some(projection) = self.projections.get_mut(&id) {
                projection.state = ProjectionState::Stale;
            }
        }
    }

    fn mark_dirty(&mut self, concept: ConceptId) {
        for id in self.of_concept(concept) {
            if let Some(projection) = self.projections.get_mut(&id) {
                projection.dirty = true;
            }
        }
    }

    /// Removes the projection and its descendants; returns what was removed.
    fn destroy(&mut self, id: ProjectionId) -> Vec<ProjectionId> {
        let parent = self.projections.get(&id).and_then(|projection| projection.parent);
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(mut projection) = self.projections.remove(&current) else {
                continue;
            };
            projection.state = ProjectionState::Destroyed;
            pending.extend(projection.children.iter().copied());
            if let Some(ids) = self.by_concept.get_mut(&projection.concept) {
                ids.remove(&current);
                if ids.is_empty() {
                    self.by_concept.remove(&projection.concept);
                }
            }
            self.views.retain(|view| *view != current);
            removed.push(current);
        }
        if let Some(owner) = parent.and_then(|parent| self.projections.get_mut(&parent)) {
            owner.children.retain(|child| *child != id);
        }
        self.destroyed.extend(removed.iter().copied());
        removed
    }

    fn is_pending(&self, id: ProjectionId) -> bool {
        self.projections
            .get(&id)
            .is_some_and(|projection| projection.state == ProjectionState::Stale || projection.dirty)
    }
}

/// Bus listener feeding model changes into the projection table.
struct ProjectionListener {
    table: Rc<RefCell<ProjectionTable>>,
}

impl Listener for ProjectionListener {
    fn update(&mut self, notification: &Notification) {
        let mut table = self.table.borrow_mut();
        match &notification.change {
            ChangeKind::ModelReset => table.reset = true,
            ChangeKind::Restored { replaced, restored } => {
                table.restored.push((*replaced, *restored));
            }
            _ => {}
        }
        let Some(concept) = notification.concept else {
            return;
        };
        match notification.message {
            Message::StructureChanged => table.mark_stale(concept),
            Message::ValueChanged => table.mark_dirty(concept),
        }
    }
}

/// Renders concepts of one model through registered templates.
#[derive(Debug)]
pub struct ProjectionEngine {
    registry: ProjectionRegistry,
    table: Rc<RefCell<ProjectionTable>>,
    listener: Option<ListenerId>,
}

impl ProjectionEngine {
    pub fn new(registry: ProjectionRegistry) -> Self {
        Self {
            registry,
            table: Rc::new(RefCell::new(ProjectionTable::default())),
            listener: None,
        }
    }

    pub fn from_schema(schemas: &SchemaRegistry, entries: Vec<ProjectionEntry>) -> Self {
        Self::new(ProjectionRegistry::from_schema(schemas, entries))
    }

    pub fn registry(&self) -> &ProjectionRegistry {
        &self.registry
    }

    /// Subscribes the engine to the model's notifications.
    ///
    /// Attaching twice replaces the earlier subscription.
    pub fn attach(&mut self, model: &ConceptModel) -> ListenerId {
        if let Some(previous) = self.listener.take() {
            model.unregister(previous);
        }
        let id = model.register(ProjectionListener {
            table: Rc::clone(&self.table),
        });
        self.listener = Some(id);
        id
    }

    pub fn detach(&mut self, model: &ConceptModel) -> bool {
        self.listener
            .take()
            .is_some_and(|id| model.unregister(id))
    }

    /// Creates and renders a root view of `concept`.
    ///
    /// # Errors
    /// - `ProjectionError::ConceptNotFound` when the concept is absent.
    pub fn project(
        &mut self,
        model: &ConceptModel,
        concept: ConceptId,
    ) -> Result<ProjectionId, ProjectionError> {
        if !model.contains(concept) {
            return Err(ProjectionError::ConceptNotFound(concept));
        }
        let mut table = self.table.borrow_mut();
        let id = table.allocate(concept, None);
        table.views.push(id);
        Renderer::new(model, &self.registry, &mut table).render(id);
        refresh_refs(&mut table, model);
        debug!(
            "event=projection_create module=projection status=ok projection={} concept={}",
            id, concept
        );
        Ok(id)
    }

    /// Creates views for every root concept that has none yet.
    pub fn project_roots(&mut self, model: &ConceptModel) -> Vec<ProjectionId> {
        let missing: Vec<ConceptId> = {
            let table = self.table.borrow();
            model
                .root_concepts()
                .iter()
                .copied()
                .filter(|root| !has_view(&table, *root))
                .collect()
        };
        missing
            .into_iter()
            .filter_map(|root| self.project(model, root).ok())
            .collect()
    }

    /// Applies queued model changes to the projection tree.
    pub fn refresh(&mut self, model: &ConceptModel) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut table = self.table.borrow_mut();
        let reset = std::mem::take(&mut table.reset);
        let restored = std::mem::take(&mut table.restored);

        if reset {
            for projection in table.projections.values_mut() {
                projection.state = ProjectionState::Stale;
            }
        }

        for (replaced, restored_id) in restored {
            for id in table.of_concept(replaced) {
                let Some(projection) = table.projections.get(&id) else {
                    continue;
                };
                let parent = projection.parent;
                let position = table.views.iter().position(|view| *view == id);
                table.destroy(id);
                match (parent, position) {
                    (Some(parent), _) => {
                        if let Some(owner) = table.projections.get_mut(&parent) {
                            owner.state = ProjectionState::Stale;
                        }
                    }
                    (None, Some(position)) if model.contains(restored_id) => {
                        let rebuilt = table.allocate(restored_id, None);
                        table.views.insert(position, rebuilt);
                        Renderer::new(model, &self.registry, &mut table).render(rebuilt);
                        report.rebuilt.push(rebuilt);
                    }
                    _ => {}
                }
            }
        }

        let vanished: Vec<ProjectionId> = table
            .projections
            .values()
            .filter(|projection| !model.contains(projection.concept))
            .map(|projection| projection.id)
            .collect();
        for id in vanished {
            table.destroy(id);
        }

        // Reference fields display the target's identifier.
        let dirty_concepts: BTreeSet<ConceptId> = table
            .projections
            .values()
            .filter(|projection| projection.dirty)
            .map(|projection| projection.concept)
            .collect();
        for concept in dirty_concepts {
            for referrer in model.referrers(concept) {
                table.mark_dirty(referrer);
            }
        }

        let pending: Vec<ProjectionId> = table
            .projections
            .values()
            .filter(|projection| projection.state == ProjectionState::Stale || projection.dirty)
            .map(|projection| projection.id)
            .collect();
        for id in pending {
            if table.is_pending(id) {
                Renderer::new(model, &self.registry, &mut table).render(id);
                report.rerendered.push(id);
            }
        }

        if reset {
            for root in model.root_concepts() {
                if has_view(&table, *root) {
                    continue;
                }
                let view = table.allocate(*root, None);
                table.views.push(view);
                Renderer::new(model, &self.registry, &mut table).render(view);
                report.rebuilt.push(view);
            }
        }

        refresh_refs(&mut table, model);
        let mut destroyed = std::mem::take(&mut table.destroyed);
        destroyed.sort();
        destroyed.dedup();
        report.destroyed = destroyed;
        if !report.is_empty() {
            debug!(
                "event=projection_refresh module=projection status=ok rerendered={} destroyed={} rebuilt={}",
                report.rerendered.len(),
                report.destroyed.len(),
                report.rebuilt.len()
            );
        }
        report
    }

    /// Advances the concept template of `id` and re-renders it.
    ///
    /// Returns the new template index.
    pub fn change_projection(
        &mut self,
        model: &ConceptModel,
        id: ProjectionId,
    ) -> Result<usize, ProjectionError> {
        let mut table = self.table.borrow_mut();
        let projection = table
            .projections
            .get_mut(&id)
            .ok_or(ProjectionError::ProjectionNotFound(id))?;
        let count = projection.template_count.max(1);
        projection.index = (projection.index + 1) % count;
        let index = projection.index;
        Renderer::new(model, &self.registry, &mut table).render(id);
        refresh_refs(&mut table, model);
        Ok(index)
    }

    pub fn component_template_count(
        &self,
        model: &ConceptModel,
        concept: ConceptId,
        component: &str,
    ) -> usize {
        model
            .concept(concept)
            .map(|concept| {
                self.registry
                    .select_component(concept.schema(), component)
                    .len()
            })
            .unwrap_or(0)
    }

    pub fn projection(&self, id: ProjectionId) -> Option<Projection> {
        self.table.borrow().projections.get(&id).cloned()
    }

    pub fn contains(&self, id: ProjectionId) -> bool {
        self.table.borrow().projections.contains_key(&id)
    }

    pub fn state(&self, id: ProjectionId) -> Option<ProjectionState> {
        self.table
            .borrow()
            .projections
            .get(&id)
            .map(|projection| projection.state)
    }

    pub fn concept_of(&self, id: ProjectionId) -> Option<ConceptId> {
        self.table
            .borrow()
            .projections
            .get(&id)
            .map(|projection| projection.concept)
    }

    pub fn template(&self, id: ProjectionId) -> Option<ProjectionTemplate> {
        self.table
            .borrow()
            .projections
            .get(&id)
            .and_then(|projection| projection.template.clone())
    }

    pub fn projections_of(&self, concept: ConceptId) -> Vec<ProjectionId> {
        self.table.borrow().of_concept(concept)
    }

    /// Root views in creation order.
    pub fn views(&self) -> Vec<ProjectionId> {
        self.table.borrow().views.clone()
    }

    pub fn len(&self) -> usize {
        self.table.borrow().projections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().projections.is_empty()
    }

    pub fn refs(&self, id: ProjectionId) -> Vec<ProjectionId> {
        self.table
            .borrow()
            .projections
            .get(&id)
            .map(|projection| projection.refs.clone())
            .unwrap_or_default()
    }

    /// Destroys a projection and everything it embeds.
    pub fn destroy(&mut self, id: ProjectionId) -> Vec<ProjectionId> {
        let mut table = self.table.borrow_mut();
        let removed = table.destroy(id);
        let count = removed.len();
        table.destroyed.retain(|destroyed| !removed.contains(destroyed));
        if count > 0 {
            debug!(
                "event=projection_destroy module=projection status=ok projection={} count={}",
                id, count
            );
        }
        removed
    }

    pub fn set_error(&mut self, id: ProjectionId, message: impl Into<String>) -> bool {
        let mut table = self.table.borrow_mut();
        match table.projections.get_mut(&id) {
            Some(projection) => {
                projection.error = Some(message.into());
                true
            }
            None => false,
        }
    }

    pub fn clear_error(&mut self, id: ProjectionId) {
        if let Some(projection) = self.table.borrow_mut().projections.get_mut(&id) {
            projection.error = None;
        }
    }

    /// Projections currently carrying an error, in id order.
    pub fn errors(&self) -> Vec<(ProjectionId, String)> {
        self.table
            .borrow()
            .projections
            .values()
            .filter_map(|projection| {
                projection
                    .error
                    .as_ref()
                    .map(|error| (projection.id, error.clone()))
            })
            .collect()
    }

    /// Element tree with every child projection expanded in place.
    pub fn render_tree(&self, id: ProjectionId) -> Option<Element> {
        let table = self.table.borrow();
        let projection = table.projections.get(&id)?;
        Some(expand_tree(&table, &projection.body))
    }

    pub fn render_text(&self, id: ProjectionId) -> Option<String> {
        self.render_tree(id).map(|tree| tree.to_text())
    }
}

fn has_view(table: &ProjectionTable, concept: ConceptId) -> bool {
    table.views.iter().any(|view| {
        table
            .projections
            .get(view)
            .is_some_and(|projection| projection.concept == concept)
    })
}

fn refresh_refs(table: &mut ProjectionTable, model: &ConceptModel) {
    let ids: Vec<(ProjectionId, ConceptId)> = table
        .projections
        .values()
        .map(|projection| (projection.id, projection.concept))
        .collect();
    for (id, concept) in ids {
        let keyed = model
            .concept(concept)
            .is_some_and(|concept| concept.schema().id_attribute().is_some());
        let refs: Vec<ProjectionId> = if keyed {
            model
                .referrers(concept)
                .into_iter()
                .flat_map(|referrer| table.of_concept(referrer))
                .collect()
        } else {
            Vec::new()
        };
        if let Some(projection) = table.projections.get_mut(&id) {
            projection.refs = refs;
        }
    }
}

fn expand_tree(table: &ProjectionTable, element: &Element) -> Element {
    let expand_all =
        |elements: &[Element]| -> Vec<Element> { elements.iter().map(|e| expand_tree(table, e)).collect() };
    match element {
        Element::Layout(LayoutElement::Projection(child)) => match table.projections.get(child) {
            Some(projection) => Element::Layout(LayoutElement::Embedded {
                projection: *child,
                body: Box::new(expand_tree(table, &projection.body)),
            }),
            None => Element::error(format!("projection {child} is not available")),
        },
        Element::Layout(LayoutElement::Flow(children)) => {
            Element::Layout(LayoutElement::Flow(expand_all(children)))
        }
        Element::Layout(LayoutElement::Table(rows)) => Element::Layout(LayoutElement::Table(
            rows.iter()
                .map(|cells| cells.iter().map(|cell| expand_all(cell)).collect())
                .collect(),
        )),
        Element::Layout(LayoutElement::Set {
            concept,
            slot,
            items,
            can_remove,
        }) => Element::Layout(LayoutElement::Set {
            concept: *concept,
            slot: slot.clone(),
            items: expand_all(items),
            can_remove: *can_remove,
        }),
        Element::Layout(LayoutElement::Component {
            concept,
            name,
            template_index,
            template_count,
            body,
        }) => Element::Layout(LayoutElement::Component {
            concept: *concept,
            name: name.clone(),
            template_index: *template_index,
            template_count: *template_count,
            body: expand_all(body),
        }),
        other => other.clone(),
    }
}

/// Child projections of one render pass.
#[derive(Default)]
struct ChildTracker {
    previous: Vec<ProjectionId>,
    used: Vec<ProjectionId>,
}

/// What placeholders resolve against.
#[derive(Clone, Copy)]
struct Scope<'a> {
    projection: ProjectionId,
    concept: &'a Concept,
    component: Option<&'a Component>,
}

struct Renderer<'a> {
    model: &'a ConceptModel,
    registry: &'a ProjectionRegistry,
    table: &'a mut ProjectionTable,
    /// Components whose template is being expanded, innermost last.
    expanding: Vec<(ConceptId, String)>,
}

impl<'a> Renderer<'a> {
    fn new(
        model: &'a ConceptModel,
        registry: &'a ProjectionRegistry,
        table: &'a mut ProjectionTable,
    ) -> Self {
        Self {
            model,
            registry,
            table,
            expanding: Vec::new(),
        }
    }

    fn render(&mut self, id: ProjectionId) {
        let model = self.model;
        let registry = self.registry;
        let Some(projection) = self.table.projections.get_mut(&id) else {
            return;
        };
        projection.state = ProjectionState::Resolving;
        let requested = projection.index;
        let mut tracker = ChildTracker {
            previous: std::mem::take(&mut projection.children),
            used: Vec::new(),
        };
        let Some(concept) = model.concept(projection.concept) else {
            projection.children = tracker.previous;
            projection.state = ProjectionState::Stale;
            return;
        };

        let templates = registry.select_concept(concept.schema());
        let count = templates.len();
        let index = if count == 0 { 0 } else { requested % count };
        let scope = Scope {
            projection: id,
            concept,
            component: None,
        };

        let (template, kind, body, error) = match templates.get(index) {
            None => {
                let message = format!("no projection template for concept `{}`", concept.name());
                warn!(
                    "event=projection_render module=projection status=error projection={} concept={} reason=no_template",
                    id,
                    concept.name()
                );
                (None, None, vec![Element::error(message.clone())], Some(message))
            }
            Some(template) => match ProjectionKind::parse(&template.kind) {
                Err(err) => {
                    warn!(
                        "event=projection_render module=projection status=error projection={} concept={} reason=unimplemented type={}",
                        id,
                        concept.name(),
                        err.feature
                    );
                    (
                        Some(template.clone()),
                        None,
                        vec![Element::error(err.to_string())],
                        Some(err.to_string()),
                    )
                }
                Ok(kind) => {
                    let mut body = self.expand_layout(kind, &template.layout, scope, &mut tracker);
                    if count > 1 {
                        body.push(Element::Algorithm(AlgorithmElement::SwitchProjection {
                            projection: id,
                            component: None,
                            template_count: count,
                        }));
                    }
                    (Some(template.clone()), Some(kind), body, None)
                }
            },
        };

        for child in &tracker.previous {
            if !tracker.used.contains(child) {
                self.table.destroy(*child);
            }
        }
        if let Some(projection) = self.table.projections.get_mut(&id) {
            projection.template = template;
            projection.kind = kind;
            projection.index = index;
            projection.template_count = count;
            projection.body = Element::Layout(LayoutElement::Flow(body));
            projection.error = error;
            projection.children = tracker.used;
            projection.dirty = false;
            projection.state = ProjectionState::Bound;
        }
    }

    fn expand_layout(
        &mut self,
        kind: ProjectionKind,
        layout: &str,
        scope: Scope<'a>,
        tracker: &mut ChildTracker,
    ) -> Vec<Element> {
        match kind {
            ProjectionKind::Text => self.expand_tokens(tokenize(layout), scope, tracker),
            ProjectionKind::Table => {
                let mut rows = Vec::new();
                for cells in table_rows(layout) {
                    let mut row = Vec::with_capacity(cells.len());
                    for cell in cells {
                        row.push(self.expand_tokens(tokenize(&cell), scope, tracker));
                    }
                    rows.push(row);
                }
                vec![Element::Layout(LayoutElement::Table(rows))]
            }
        }
    }

    fn expand_tokens(
        &mut self,
        tokens: Vec<LayoutToken>,
        scope: Scope<'a>,
        tracker: &mut ChildTracker,
    ) -> Vec<Element> {
        let mut elements = Vec::new();
        for token in tokens {
            match token {
                LayoutToken::Text(text) => elements.push(Element::text(text)),
                LayoutToken::LineBreak => elements.push(Element::Static(StaticElement::LineBreak)),
                LayoutToken::Placeholder(name) => {
                    elements.extend(self.expand_placeholder(&name, scope, tracker));
                }
                LayoutToken::Nested(name) => {
                    if scope.concept.schema().component(&name).is_some() {
                        elements.extend(self.expand_component(&name, scope, tracker));
                    } else {
                        elements.push(self.unknown_name(&name, scope));
                    }
                }
            }
        }
        elements
    }

    fn expand_placeholder(
        &mut self,
        name: &str,
        scope: Scope<'a>,
        tracker: &mut ChildTracker,
    ) -> Vec<Element> {
        let concept = scope.concept;
        if let Some(component) = scope.component {
            if component.declared(name).is_some() {
                let slot = Slot::component(component.name(), name);
                return self.expand_attribute(slot, component.attribute(name), scope, tracker);
            }
        }
        if concept.schema().attributes.contains_key(name) {
            return self.expand_attribute(
                Slot::attribute(name),
                concept.attribute(name),
                scope,
                tracker,
            );
        }
        if concept.schema().component(name).is_some() {
            return self.expand_component(name, scope, tracker);
        }
        vec![self.unknown_name(name, scope)]
    }

    fn unknown_name(&self, name: &str, scope: Scope<'a>) -> Element {
        warn!(
            "event=projection_render module=projection status=error projection={} concept={} reason=unknown_placeholder name={}",
            scope.projection,
            scope.concept.name(),
            name
        );
        Element::error(format!(
            "unknown placeholder `#{name}` for `{}`",
            scope.concept.name()
        ))
    }

    fn expand_attribute(
        &mut self,
        slot: Slot,
        attribute: Option<&'a Attribute>,
        scope: Scope<'a>,
        tracker: &mut ChildTracker,
    ) -> Vec<Element> {
        let concept = scope.concept.id();
        let Some(attribute) = attribute else {
            return vec![Element::Algorithm(AlgorithmElement::AddAttribute { concept, slot })];
        };
        match (attribute.value(), attribute.kind()) {
            (AttributeValue::Concept(child), _) => {
                let child = self.child_projection(*child, scope.projection, tracker);
                vec![Element::Layout(LayoutElement::Projection(child))]
            }
            (AttributeValue::Set(elements), _) => {
                let items = elements
                    .iter()
                    .map(|element| {
                        let child = self.child_projection(*element, scope.projection, tracker);
                        Element::Layout(LayoutElement::Projection(child))
                    })
                    .collect();
                let mut out = vec![Element::Layout(LayoutElement::Set {
                    concept,
                    slot: slot.clone(),
                    items,
                    can_remove: attribute.can_remove_element(),
                })];
                if attribute.can_add_element() {
                    out.push(Element::Algorithm(AlgorithmElement::AddElement {
                        concept,
                        slot,
                        candidates: self
                            .model
                            .registry()
                            .concrete_candidates(&attribute.schema().accept),
                    }));
                }
                out
            }
            (AttributeValue::Unset, ValueType::Concept(type_name)) => {
                vec![Element::Algorithm(AlgorithmElement::ChooseConcept {
                    concept,
                    slot,
                    candidates: self
                        .model
                        .registry()
                        .concrete_candidates(std::slice::from_ref(type_name)),
                })]
            }
            _ => vec![Element::Field(FieldElement {
                concept,
                slot,
                kind: attribute.kind().clone(),
                value: self.model.value_label(attribute),
                removable: attribute.can_delete(),
            })],
        }
    }

    fn expand_component(
        &mut self,
        name: &str,
        scope: Scope<'a>,
        tracker: &mut ChildTracker,
    ) -> Vec<Element> {
        let registry = self.registry;
        let concept = scope.concept;
        let Some(component) = concept.component(name) else {
            return vec![Element::Algorithm(AlgorithmElement::AddComponent {
                concept: concept.id(),
                component: name.to_string(),
            })];
        };
        let templates = registry.select_component(concept.schema(), name);
        let count = templates.len();
        let Some(template) = templates.get(component.projection_index() % count.max(1)) else {
            warn!(
                "event=projection_render module=projection status=error projection={} component={} reason=no_template",
                scope.projection,
                component.full_name()
            );
            return vec![Element::error(format!(
                "no projection template for component `{}`",
                component.full_name()
            ))];
        };
        let key = (concept.id(), name.to_string());
        if self.expanding.contains(&key) {
            warn!(
                "event=projection_render module=projection status=error projection={} component={} reason=self_embedding",
                scope.projection,
                component.full_name()
            );
            return vec![Element::error(format!(
                "component `{}` embeds itself",
                component.full_name()
            ))];
        }
        let index = component.projection_index() % count;
        let inner = Scope {
            component: Some(component),
            ..scope
        };
        self.expanding.push(key);
        let mut body = match ProjectionKind::parse(&template.kind) {
            Ok(kind) => self.expand_layout(kind, &template.layout, inner, tracker),
            Err(err) => vec![Element::error(err.to_string())],
        };
        self.expanding.pop();
        if count > 1 {
            body.push(Element::Algorithm(AlgorithmElement::SwitchProjection {
                projection: scope.projection,
                component: Some(name.to_string()),
                template_count: count,
            }));
        }
        vec![Element::Layout(LayoutElement::Component {
            concept: concept.id(),
            name: name.to_string(),
            template_index: index,
            template_count: count,
            body,
        })]
    }

    /// Reuses the previous child projection of `concept` or creates one.
    fn child_projection(
        &mut self,
        concept: ConceptId,
        parent: ProjectionId,
        tracker: &mut ChildTracker,
    ) -> ProjectionId {
        let existing = tracker.previous.iter().copied().find(|id| {
            self.table
                .projections
                .get(id)
                .is_some_and(|projection| projection.concept == concept)
        });
        if let Some(id) = existing {
            tracker.used.push(id);
            return id;
        }
        let id = self.table.allocate(concept, Some(parent));
        self.render(id);
        tracker.used.push(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::{ProjectionEngine, ProjectionState};
    use crate::model::attribute::AttributeValue;
    use crate::model::concept::Slot;
    use crate::model::concept_model::ConceptModel;
    use crate::schema::definition::{MetaModelSchema, ProjectionEntry};
    use serde_json::json;

    fn fixture() -> (ConceptModel, ProjectionEngine) {
        let schema = MetaModelSchema::from_value(&json!({
            "Person": {
                "attribute": {
                    "name": { "type": "string" },
                    "nick": { "type": "string", "required": false }
                },
                "projection": [
                    { "type": "text", "layout": "Person #name #nick" },
                    { "type": "table", "layout": "Name | #name" }
                ]
            }
        }))
        .expect("schema should decode");
        let model = ConceptModel::from_schema(schema).expect("schema should load");
        let mut engine = ProjectionEngine::from_schema(model.registry(), Vec::<ProjectionEntry>::new());
        engine.attach(&model);
        (model, engine)
    }

    #[test]
    fn renders_fields_and_add_affordance() {
        let (mut model, mut engine) = fixture();
        let ada = model
            .create_concept_with("Person", Some(&json!({ "name": "Ada" })))
            .expect("person should be created");
        let view = engine.project(&model, ada).expect("view should be created");

        assert_eq!(engine.render_text(view).as_deref(), Some("Person Ada "));
        let tree = engine.render_tree(view).expect("tree exists");
        assert_eq!(tree.algorithms().len(), 2);
    }

    #[test]
    fn value_change_rerenders_on_refresh() {
        let (mut model, mut engine) = fixture();
        let ada = model
            .create_concept_with("Person", Some(&json!({ "name": "Ada" })))
            .expect("person should be created");
        let view = engine.project(&model, ada).expect("view should be created");

        model
            .set_value(ada, &Slot::attribute("name"), AttributeValue::Text("Grace".to_string()))
            .expect("value should be set");
        assert_eq!(engine.projection(view).map(|p| p.dirty), Some(true));

        let report = engine.refresh(&model);
        assert_eq!(report.rerendered, vec![view]);
        assert_eq!(engine.state(view), Some(ProjectionState::Bound));
        assert_eq!(engine.render_text(view).as_deref(), Some("Person Grace "));
    }

    #[test]
    fn cycling_wraps_after_template_count() {
        let (mut model, mut engine) = fixture();
        let ada = model
            .create_concept_with("Person", Some(&json!({ "name": "Ada" })))
            .expect("person should be created");
        let view = engine.project(&model, ada).expect("view should be created");

        assert_eq!(engine.change_projection(&model, view), Ok(1));
        assert_eq!(engine.render_text(view).as_deref(), Some("Name | Ada"));
        assert_eq!(engine.change_projection(&model, view), Ok(0));
    }
}
