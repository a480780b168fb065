//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route("/workflows", get(handlers::workflow::list_workflows))
        .route(
            "/workflows:validate",
            post(handlers::workflow::validate_workflow),
        )
        .route(
            "/workflows/{name}/executions",
            post(handlers::workflow::start_execution),
        )
        .route(
            "/workflows/{name}/executions:sync",
            post(handlers::workflow::start_sync_execution),
        )
        // Executions
        .route("/executions", get(handlers::execution::list_executions))
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route(
            "/executions/{id}/trace",
            get(handlers::execution::get_execution_trace),
        )
        .route(
            "/executions/{id}/stop",
            post(handlers::execution::stop_execution),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness plus the number of executions in flight.
async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "running_executions": state.engine.running_count(),
    }))
}
