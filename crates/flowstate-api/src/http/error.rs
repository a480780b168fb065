//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowstate_core::workflow::{DefinitionError, EngineError};
use flowstate_types::execution::Failure;

use crate::http::response::RequestTimer;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// A submitted definition did not load.
    Definition(DefinitionError),
    WorkflowNotFound(String),
    Engine(EngineError),
    /// A synchronous execution reached a failed terminal status.
    ExecutionFailed(Failure),
    Validation(String),
    Internal(String),
}

impl From<DefinitionError> for AppError {
    fn from(e: DefinitionError) -> Self {
        AppError::Definition(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Definition(e) => (StatusCode::BAD_REQUEST, "DEFINITION_ERROR", e.to_string()),
            AppError::WorkflowNotFound(name) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow '{name}' not found"),
            ),
            AppError::Engine(EngineError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "EXECUTION_NOT_FOUND",
                format!("Execution {id} not found"),
            ),
            AppError::Engine(EngineError::NotRunning(id)) => (
                StatusCode::CONFLICT,
                "VALIDATION_ERROR",
                format!("Execution {id} is not running"),
            ),
            AppError::Engine(e) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()),
            AppError::ExecutionFailed(failure) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "EXECUTION_FAILED",
                failure.to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        let details = match &self {
            AppError::ExecutionFailed(failure) => serde_json::to_value(failure).ok(),
            _ => None,
        };
        (status, Json(RequestTimer::start().failure(code, message, details))).into_response()
    }
}
