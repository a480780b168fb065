//! Workflow engine and repository trait definitions for Flowstate.
//!
//! This crate defines the "ports" (task invocation, items sources, execution
//! storage) that the infrastructure layer implements. It depends only on
//! `flowstate-types` -- never on `flowstate-infra` or any database/IO crate.

pub mod repository;
pub mod workflow;
