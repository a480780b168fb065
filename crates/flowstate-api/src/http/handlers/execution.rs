//! Execution inspection and stop handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use flowstate_types::execution::{ExecutionRecord, TraceEvent};
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Query parameters for listing executions.
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    /// Maximum number of executions to return (default 20).
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("invalid execution id: '{raw}'")))
}

/// GET /api/v1/executions - Most recent executions first.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<Vec<ExecutionRecord>>>, AppError> {
    let timer = RequestTimer::start();
    let records = state.engine.list_executions(query.limit).await?;
    Ok(Json(timer.success(records).with_link("self", "/api/v1/executions")))
}

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ExecutionRecord>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id)?;
    let record = state.engine.describe_execution(&id).await?;
    let href = format!("/api/v1/executions/{id}");
    let resp = timer
        .success(record)
        .with_link("self", &href)
        .with_link("trace", &format!("{href}/trace"));
    Ok(Json(resp))
}

/// GET /api/v1/executions/{id}/trace
pub async fn get_execution_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<TraceEvent>>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id)?;
    let trace = state.engine.get_execution_trace(&id).await?;
    Ok(Json(timer.success(trace).with_link("execution", &format!("/api/v1/executions/{id}"))))
}

/// POST /api/v1/executions/{id}/stop - Cancel a running execution.
pub async fn stop_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let timer = RequestTimer::start();
    let id = parse_id(&id)?;
    state.engine.stop_execution(&id).await?;
    Ok(Json(timer.success(serde_json::json!({
        "execution_id": id.to_string(),
        "stopping": true,
    }))))
}
