//! Undo/redo stacks and bounded restore points.

pub mod state_log;
pub mod undo;
