//! Task API Handlers
//!
//! HTTP endpoints for workflow task submission and control.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use conduit_core::domain::task::WorkflowTask;
use conduit_core::domain::workflow::Workflow;
use conduit_core::dto::task::{
    ApproveRequest, BreakpointPosition, CreateTask, CreateTaskResponse, ListTasksQuery,
    TaskPreview,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::task_service;

/// Query parameters naming the acting user
#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    #[serde(default)]
    pub user: String,
}

/// Query parameters of the breakpoint toggle
#[derive(Debug, Deserialize)]
pub struct BreakpointQuery {
    #[serde(default = "default_set")]
    pub set: bool,
}

fn default_set() -> bool {
    true
}

// =============================================================================
// Task Lifecycle Endpoints
// =============================================================================

/// POST /api/workflow/v4/workflowtask
/// Create a task from workflow arguments and start it
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTask>,
) -> ApiResult<(StatusCode, Json<CreateTaskResponse>)> {
    tracing::info!("Creating task for workflow: {}", req.workflow.name);

    let created = task_service::create_task(&state.engine, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/workflow/v4/workflowtask?workflow_name=&page_num=&page_size=
/// List tasks of a workflow, newest first
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<TaskPreview>>> {
    tracing::debug!(
        "Listing tasks of {} (page {}, size {})",
        query.workflow_name,
        query.page_num,
        query.page_size
    );

    let tasks = task_service::list_tasks(&state.engine, &query).await?;
    Ok(Json(tasks))
}

/// GET /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}
/// Get a task document
pub async fn get_task(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
) -> ApiResult<Json<WorkflowTask>> {
    tracing::debug!("Getting task: {}#{}", workflow, id);

    let task = task_service::get_task(&state.engine, &workflow, id).await?;
    Ok(Json(task))
}

/// DELETE /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}
/// Cancel a task
pub async fn cancel_task(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling task: {}#{}", workflow, id);

    task_service::cancel_task(&state.engine, &workflow, id, &actor.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/clone
/// Get a task's arguments for re-submission
pub async fn clone_task(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
) -> ApiResult<Json<Workflow>> {
    let args = task_service::clone_task(&state.engine, &workflow, id).await?;
    Ok(Json(args))
}

/// POST /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/restart
/// Restart a finished task that did not pass
pub async fn restart_task(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    tracing::info!("Restarting task: {}#{}", workflow, id);

    task_service::restart_task(&state.engine, &workflow, id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/archive
pub async fn archive_task(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    task_service::archive_task(&state.engine, &workflow, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Control Endpoints
// =============================================================================

/// POST /api/workflow/v4/workflowtask/approve
/// Approve or reject a stage waiting for approval
pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "Approval decision on {}#{} stage {} by {}",
        req.workflow_name,
        req.task_id,
        req.stage_name,
        req.user
    );

    task_service::approve(&state.engine, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workflow/v4/workflowtask/breakpoint/{workflow}/{job_key}/task/{id}/{position}?set=
/// Set or unset a breakpoint
pub async fn set_breakpoint(
    State(state): State<AppState>,
    Path((workflow, job_key, id, position)): Path<(String, String, i64, BreakpointPosition)>,
    Query(query): Query<BreakpointQuery>,
) -> ApiResult<StatusCode> {
    task_service::set_breakpoint(&state.engine, &workflow, &job_key, id, position, query.set)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workflow/v4/workflowtask/breakpoint/{workflow}/{job_key}/task/{id}/{position}/release
/// Release a job paused at a breakpoint
pub async fn release_breakpoint(
    State(state): State<AppState>,
    Path((workflow, job_key, id, position)): Path<(String, String, i64, BreakpointPosition)>,
) -> ApiResult<StatusCode> {
    task_service::release_breakpoint(&state.engine, &workflow, &job_key, id, position).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/debug
pub async fn enable_debug(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    task_service::enable_debug(&state.engine, &workflow, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/workflow/v4/workflowtask/workflow/{workflow}/task/{id}/debug
pub async fn stop_debug(
    State(state): State<AppState>,
    Path((workflow, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    task_service::stop_debug(&state.engine, &workflow, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Definition Endpoints
// =============================================================================

/// GET /api/workflow/v4/preset/{workflow}
pub async fn preset(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
) -> ApiResult<Json<Workflow>> {
    let workflow = task_service::preset(&state.engine, &workflow).await?;
    Ok(Json(workflow))
}

/// GET /api/workflow/v4/options/{workflow}
pub async fn options(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
) -> ApiResult<Json<Workflow>> {
    let workflow = task_service::options(&state.engine, &workflow).await?;
    Ok(Json(workflow))
}
