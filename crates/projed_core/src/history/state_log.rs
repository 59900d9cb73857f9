//! Bounded log of restore points.
//!
//! # Invariants
//! - The log never holds more than `capacity` states.
//! - When full, the oldest state is evicted first.

use crate::config::DEFAULT_HISTORY_CAPACITY;
use crate::model::concept::ConceptId;
use crate::model::snapshot::ConceptSnapshot;
use crate::projection::element::ProjectionId;
use log::debug;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(Uuid);

impl StateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StateId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Restore point for one concept subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: StateId,
    pub concept: ConceptId,
    pub value: ConceptSnapshot,
    /// Projection the state was captured from, if any.
    pub element: Option<ProjectionId>,
}

#[derive(Debug, Clone)]
pub struct StateLog {
    capacity: usize,
    entries: VecDeque<State>,
}

impl Default for StateLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StateLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records a restore point, evicting the oldest one when full.
    pub fn add_state(
        &mut self,
        concept: ConceptId,
        value: ConceptSnapshot,
        element: Option<ProjectionId>,
    ) -> StateId {
        while self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(
                    "event=state_evict module=history status=ok state={} concept={}",
                    evicted.id, evicted.concept
                );
            }
        }
        let id = StateId::new();
        self.entries.push_back(State {
            id,
            concept,
            value,
            element,
        });
        id
    }

    pub fn get(&self, id: StateId) -> Option<&State> {
        self.entries.iter().find(|state| state.id == id)
    }

    /// Most recent state captured for `concept`.
    pub fn latest_for(&self, concept: ConceptId) -> Option<&State> {
        self.entries.iter().rev().find(|state| state.concept == concept)
    }

    /// States oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &State> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
