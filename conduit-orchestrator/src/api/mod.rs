//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod environment;
pub mod error;
pub mod health;
pub mod task;

use axum::{
    Router,
    routing::{get, post},
};
use conduit_engine::Engine;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Create the main API router with all endpoints
pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Task lifecycle
        .route(
            "/api/workflow/v4/workflowtask",
            post(task::create_task).get(task::list_tasks),
        )
        .route("/api/workflow/v4/workflowtask/approve", post(task::approve))
        .route(
            "/api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}",
            get(task::get_task).delete(task::cancel_task),
        )
        .route(
            "/api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/clone",
            get(task::clone_task),
        )
        .route(
            "/api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/restart",
            post(task::restart_task),
        )
        .route(
            "/api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/archive",
            post(task::archive_task),
        )
        .route(
            "/api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/debug",
            post(task::enable_debug).delete(task::stop_debug),
        )
        // Breakpoints
        .route(
            "/api/workflow/v4/workflowtask/breakpoint/{workflow}/{job_key}/task/{id}/{position}",
            post(task::set_breakpoint),
        )
        .route(
            "/api/workflow/v4/workflowtask/breakpoint/{workflow}/{job_key}/task/{id}/{position}/release",
            post(task::release_breakpoint),
        )
        // Workflow definitions
        .route("/api/workflow/v4/preset/{workflow}", get(task::preset))
        .route("/api/workflow/v4/options/{workflow}", get(task::options))
        // Environments
        .route(
            "/api/environment/{project}/{env}/migrate",
            post(environment::migrate_host_env),
        )
        // Add state and middleware
        .with_state(AppState { engine })
        .layer(TraceLayer::new_for_http())
}
