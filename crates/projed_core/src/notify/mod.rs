//! Change notification and action dispatch.

pub mod bus;
pub mod dispatch;
