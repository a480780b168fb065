//! HTTP/REST API layer for Flowstate.
//!
//! Axum-based REST API at `/api/v1/` with the envelope response format.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
