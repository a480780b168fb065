//! Shared domain types for Flowstate.
//!
//! This crate contains the types used across the engine: the workflow
//! definition model, classified task errors, execution records, trace
//! events and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod execution;
