//! Workflow listing and execution start handlers.
//!
//! `POST .../executions` starts an execution in the background and returns
//! its identifiers; `POST .../executions:sync` waits for the terminal
//! outcome.

use axum::Json;
use axum::extract::{Path, State};
use flowstate_core::workflow::Workflow;
use serde::Serialize;
use serde_json::Value;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub start_at: String,
    pub states: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl WorkflowSummary {
    fn of(workflow: &Workflow) -> Self {
        let def = workflow.definition();
        Self {
            name: workflow.name().to_string(),
            start_at: def.start_at.clone(),
            states: def.states.len(),
            comment: def.comment.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// GET /api/v1/workflows - List the definitions served by name.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let timer = RequestTimer::start();
    let workflows = state.workflows.values().map(WorkflowSummary::of).collect();
    Ok(Json(timer.success(workflows).with_link("self", "/api/v1/workflows")))
}

/// POST /api/v1/workflows:validate - Load a JSON or YAML document without
/// registering or running it.
pub async fn validate_workflow(body: String) -> Result<Json<ApiResponse<WorkflowSummary>>, AppError> {
    let timer = RequestTimer::start();
    let workflow = Workflow::parse("submitted", &body)?;
    Ok(Json(timer.success(WorkflowSummary::of(&workflow))))
}

/// POST /api/v1/workflows/{name}/executions - Start an execution.
pub async fn start_execution(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<StartedResponse>>, AppError> {
    let timer = RequestTimer::start();
    let workflow = state
        .workflow(&name)
        .ok_or_else(|| AppError::WorkflowNotFound(name.clone()))?;

    let started = state.engine.start_execution(workflow, input).await?;
    let href = format!("/api/v1/executions/{}", started.execution_id);
    let resp = timer
        .success(StartedResponse {
            execution_id: started.execution_id.to_string(),
            job_id: started.job_id,
        })
        .with_link("execution", &href)
        .with_link("trace", &format!("{href}/trace"));

    Ok(Json(resp))
}

/// POST /api/v1/workflows/{name}/executions:sync - Run to completion.
///
/// Returns the terminal output, or `EXECUTION_FAILED` with `{error, cause}`
/// as the error details.
pub async fn start_sync_execution(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let workflow = state
        .workflow(&name)
        .ok_or_else(|| AppError::WorkflowNotFound(name.clone()))?;

    let output = state
        .engine
        .start_sync_execution(workflow, input)
        .await
        .map_err(AppError::ExecutionFailed)?;

    Ok(Json(timer.success(output)))
}
