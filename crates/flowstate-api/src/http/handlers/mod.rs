//! REST API handlers, one module per resource.

pub mod execution;
pub mod workflow;
