//! Linear undo/redo history over cloned values.
//!
//! # Invariants
//! - `set` pushes the previous current value onto the undo stack and clears
//!   the redo stack.
//! - `undo`/`redo` at a boundary are no-ops and return `None`.
//! - With a depth limit, the oldest undo entry is dropped first.

use log::debug;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct History<T: Clone> {
    current: T,
    undo: VecDeque<T>,
    redo: Vec<T>,
    depth: Option<usize>,
}

impl<T: Clone> History<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: initial,
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth: None,
        }
    }

    /// Keeps at most `depth` undo entries; `None` is unbounded.
    pub fn with_depth(initial: T, depth: Option<usize>) -> Self {
        Self {
            depth,
            ..Self::new(initial)
        }
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn set(&mut self, value: &T) {
        let previous = std::mem::replace(&mut self.current, value.clone());
        self.undo.push_back(previous);
        if let Some(depth) = self.depth {
            while self.undo.len() > depth {
                self.undo.pop_front();
            }
        }
        self.redo.clear();
    }

    /// Steps back; returns the new current value.
    pub fn undo(&mut self) -> Option<&T> {
        let previous = self.undo.pop_back()?;
        let current = std::mem::replace(&mut self.current, previous);
        self.redo.push(current);
        debug!(
            "event=history_undo module=history status=ok undo_len={} redo_len={}",
            self.undo.len(),
            self.redo.len()
        );
        Some(&self.current)
    }

    /// Steps forward; returns the new current value.
    pub fn redo(&mut self) -> Option<&T> {
        let next = self.redo.pop()?;
        let current = std::mem::replace(&mut self.current, next);
        self.undo.push_back(current);
        debug!(
            "event=history_redo module=history status=ok undo_len={} redo_len={}",
            self.undo.len(),
            self.redo.len()
        );
        Some(&self.current)
    }

    pub fn has_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn has_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Drops both stacks and makes `value` current.
    pub fn reset(&mut self, value: T) {
        self.current = value;
        self.undo.clear();
        self.redo.clear();
    }
}
