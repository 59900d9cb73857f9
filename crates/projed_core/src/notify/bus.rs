//! Observer bus for concept model changes.
//!
//! # Responsibility
//! - Deliver immutable change notifications to registered listeners.
//! - Queue notifications raised while a dispatch is in progress.
//!
//! # Invariants
//! - Listeners run in registration order.
//! - A notification raised from inside a listener is delivered after the
//!   current notification has reached every listener.
//! - Listeners registered during a dispatch receive only later notifications.

use crate::model::concept::{ConceptId, Slot};
use crate::projection::element::ProjectionId;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// Message channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// A primitive or reference value changed; structure is intact.
    ValueChanged,
    /// Concepts, attributes, components, or set elements were added or removed.
    StructureChanged,
}

impl Message {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValueChanged => "value.changed",
            Self::StructureChanged => "structure.changed",
        }
    }
}

/// What happened to the concept named by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    ConceptCreated,
    ConceptRemoved,
    AttributeCreated,
    AttributeRemoved,
    ComponentCreated,
    ValueSet,
    ElementAdded(ConceptId),
    ElementRemoved(ConceptId),
    ProjectionChanged,
    /// Concept `replaced` was rebuilt from a snapshot as `restored`.
    Restored {
        replaced: ConceptId,
        restored: ConceptId,
    },
    /// Every root was replaced at once.
    ModelReset,
}

/// Origin of a mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeSource {
    #[default]
    Api,
    Load,
    Projection(ProjectionId),
    History,
}

/// Immutable change payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: Message,
    pub concept: Option<ConceptId>,
    pub slot: Option<Slot>,
    pub change: ChangeKind,
    /// Concepts removed from the model by this change, subtree included.
    pub removed: Vec<ConceptId>,
    pub source: ChangeSource,
}

/// Receiver of model notifications.
pub trait Listener {
    fn update(&mut self, notification: &Notification);
}

impl<F> Listener for F
where
    F: FnMut(&Notification),
{
    fn update(&mut self, notification: &Notification) {
        self(notification)
    }
}

/// Registration handle returned by [`ObserverBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type SharedListener = Rc<RefCell<dyn Listener>>;

#[derive(Default)]
struct BusState {
    listeners: RefCell<Vec<(ListenerId, SharedListener)>>,
    queue: RefCell<VecDeque<Notification>>,
    dispatching: Cell<bool>,
    next_id: Cell<u64>,
}

/// Single-threaded publish/subscribe channel.
///
/// Clones share the same listener list, so a listener holding a clone may
/// publish from inside `update`.
#[derive(Clone, Default)]
pub struct ObserverBus {
    state: Rc<BusState>,
}

impl Debug for ObserverBus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBus")
            .field("listeners", &self.state.listeners.borrow().len())
            .field("queued", &self.state.queue.borrow().len())
            .field("dispatching", &self.state.dispatching.get())
            .finish()
    }
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<L>(&self, listener: L) -> ListenerId
    where
        L: Listener + 'static,
    {
        self.register_shared(Rc::new(RefCell::new(listener)))
    }

    /// Registers a listener the caller keeps a handle to.
    pub fn register_shared(&self, listener: SharedListener) -> ListenerId {
        let id = ListenerId(self.state.next_id.get());
        self.state.next_id.set(id.0 + 1);
        self.state.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Returns whether a listener was removed.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(known, _)| *known != id);
        listeners.len() != before
    }

    pub fn unregister_all(&self) {
        self.state.listeners.borrow_mut().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.borrow().len()
    }

    /// Publishes one notification.
    ///
    /// Called during a dispatch, the notification is queued and this call
    /// returns immediately.
    pub fn notify(&self, notification: Notification) {
        self.state.queue.borrow_mut().push_back(notification);
        if self.state.dispatching.replace(true) {
            return;
        }

        loop {
            let next = self.state.queue.borrow_mut().pop_front();
            let Some(notification) = next else {
                break;
            };
            let listeners: Vec<SharedListener> = self
                .state
                .listeners
                .borrow()
                .iter()
                .map(|(_, listener)| Rc::clone(listener))
                .collect();
            for listener in listeners {
                listener.borrow_mut().update(&notification);
            }
        }

        self.state.dispatching.set(false);
    }
}
