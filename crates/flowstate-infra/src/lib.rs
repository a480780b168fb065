//! Infrastructure layer for Flowstate.
//!
//! Contains implementations of the ports defined in `flowstate-core`: SQLite
//! execution storage, HTTP task invocation, a directory-backed items source,
//! environment parameters and the TOML configuration loader.

pub mod config;
pub mod filesystem;
pub mod http;
pub mod secret;
pub mod sqlite;
