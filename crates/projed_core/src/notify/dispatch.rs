//! Named action handler chain.
//!
//! Projection templates may name an `action`; triggering the projection runs
//! every handler registered for that name in registration order.
//!
//! # Invariants
//! - Dispatch stops at the first failing handler.
//! - Effects of handlers that ran before a failure are kept.

use crate::model::concept::ConceptId;
use crate::projection::element::ProjectionId;
use log::warn;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Payload passed to action handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvent {
    pub action: String,
    pub projection: ProjectionId,
    pub concept: ConceptId,
}

/// Failure reported by one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub message: String,
}

impl HandlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for HandlerFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for HandlerFailure {}

pub trait Handler {
    fn handle(&mut self, event: &ActionEvent) -> Result<(), HandlerFailure>;
}

impl<F> Handler for F
where
    F: FnMut(&ActionEvent) -> Result<(), HandlerFailure>,
{
    fn handle(&mut self, event: &ActionEvent) -> Result<(), HandlerFailure> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

/// Result of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers that ran, the failing one included.
    pub invoked: usize,
    pub failure: Option<HandlerFailure>,
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Vec<(HandlerId, Box<dyn Handler>)>>,
    next_id: u64,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(action, handlers)| (action.as_str(), handlers.len()))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<H>(&mut self, action: impl Into<String>, handler: H) -> HandlerId
    where
        H: Handler + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(action.into())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Returns whether a handler was removed.
    pub fn off(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for handlers in self.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(known, _)| *known != id);
            removed |= handlers.len() != before;
        }
        self.handlers.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    pub fn handler_count(&self, action: &str) -> usize {
        self.handlers.get(action).map_or(0, Vec::len)
    }

    pub fn dispatch(&mut self, event: &ActionEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(handlers) = self.handlers.get_mut(&event.action) else {
            return outcome;
        };

        for (_, handler) in handlers.iter_mut() {
            outcome.invoked += 1;
            if let Err(failure) = handler.handle(event) {
                warn!(
                    "event=action_dispatch module=notify status=error action={} invoked={}",
                    event.action, outcome.invoked
                );
                outcome.failure = Some(failure);
                break;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionEvent, HandlerFailure, HandlerRegistry};
    use crate::projection::element::ProjectionId;
    use std::cell::RefCell;
    use std::rc::Rc;
    use uuid::Uuid;

    fn event(action: &str) -> ActionEvent {
        ActionEvent {
            action: action.to_string(),
            projection: ProjectionId::new(1),
            concept: Uuid::new_v4(),
        }
    }

    #[test]
    fn dispatch_stops_at_first_failure_without_rollback() {
        let mut registry = HandlerRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let log = Rc::clone(&log);
            registry.on("save", move |_: &ActionEvent| -> Result<(), HandlerFailure> {
                log.borrow_mut().push("first");
                Ok(())
            });
        }
        registry.on("save", |_: &ActionEvent| -> Result<(), HandlerFailure> {
            Err(HandlerFailure::new("disk full"))
        });
        {
            let log = Rc::clone(&log);
            registry.on("save", move |_: &ActionEvent| -> Result<(), HandlerFailure> {
                log.borrow_mut().push("third");
                Ok(())
            });
        }

        let outcome = registry.dispatch(&event("save"));
        assert_eq!(outcome.invoked, 2);
        assert_eq!(outcome.failure, Some(HandlerFailure::new("disk full")));
        assert_eq!(*log.borrow(), vec!["first"]);
    }

    #[test]
    fn off_removes_handler_and_unknown_action_is_noop() {
        let mut registry = HandlerRegistry::new();
        let id = registry.on("open", |_: &ActionEvent| -> Result<(), HandlerFailure> { Ok(()) });
        assert_eq!(registry.handler_count("open"), 1);
        assert!(registry.off(id));
        assert_eq!(registry.handler_count("open"), 0);

        let outcome = registry.dispatch(&event("open"));
        assert!(outcome.is_ok());
        assert_eq!(outcome.invoked, 0);
    }
}
