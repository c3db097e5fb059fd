//! Task Service
//!
//! Business logic for workflow task submission and control.

use conduit_core::domain::task::WorkflowTask;
use conduit_core::domain::workflow::Workflow;
use conduit_core::dto::task::{
    ApproveRequest, BreakpointPosition, CreateTask, CreateTaskResponse, ListTasksQuery,
    TaskPreview,
};
use conduit_engine::{Engine, EngineError};
use std::sync::Arc;

/// Service error type
#[derive(Debug)]
pub enum TaskError {
    NotFound(String),
    ValidationError(String),
    InvalidState(String),
    EngineError(EngineError),
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(msg) => TaskError::NotFound(msg),
            EngineError::InvalidState(msg) => TaskError::InvalidState(msg),
            err if err.is_client_error() => TaskError::ValidationError(err.to_string()),
            err => TaskError::EngineError(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Create a task and start it
pub async fn create_task(engine: &Arc<Engine>, mut req: CreateTask) -> Result<CreateTaskResponse> {
    validate_create_request(&req)?;
    if req.creator.username.is_empty() {
        req.creator.username = SYSTEM_USER.to_string();
    }

    let created = engine.create_task(req).await?;

    tracing::info!(
        "Task created: {}#{} in project {}",
        created.workflow_name,
        created.task_id,
        created.project_name
    );

    Ok(created)
}

/// Get a task by workflow name and task id
pub async fn get_task(engine: &Engine, workflow_name: &str, task_id: i64) -> Result<WorkflowTask> {
    Ok(engine.get_task(workflow_name, task_id).await?)
}

/// List tasks of a workflow
pub async fn list_tasks(engine: &Engine, query: &ListTasksQuery) -> Result<Vec<TaskPreview>> {
    if query.workflow_name.trim().is_empty() {
        return Err(TaskError::ValidationError(
            "workflow_name is required".to_string(),
        ));
    }
    Ok(engine.list_tasks(query).await?)
}

/// Cancel a task
pub async fn cancel_task(engine: &Engine, workflow_name: &str, task_id: i64, user: &str) -> Result<()> {
    let user = if user.is_empty() { SYSTEM_USER } else { user };
    engine.cancel_task(workflow_name, task_id, user).await?;
    Ok(())
}

/// Record an approval decision
pub async fn approve(engine: &Engine, req: ApproveRequest) -> Result<()> {
    validate_approve_request(&req)?;
    engine.approve(req).await?;
    Ok(())
}

pub async fn clone_task(engine: &Engine, workflow_name: &str, task_id: i64) -> Result<Workflow> {
    Ok(engine.clone_task(workflow_name, task_id).await?)
}

pub async fn restart_task(engine: &Arc<Engine>, workflow_name: &str, task_id: i64) -> Result<()> {
    engine.restart_task(workflow_name, task_id).await?;
    Ok(())
}

pub async fn archive_task(engine: &Engine, workflow_name: &str, task_id: i64) -> Result<()> {
    engine.archive_task(workflow_name, task_id).await?;
    Ok(())
}

/// Set or unset a breakpoint on a job
pub async fn set_breakpoint(
    engine: &Engine,
    workflow_name: &str,
    job_key: &str,
    task_id: i64,
    position: BreakpointPosition,
    set: bool,
) -> Result<()> {
    engine
        .set_breakpoint(workflow_name, job_key, task_id, position, set)
        .await?;
    Ok(())
}

pub async fn release_breakpoint(
    engine: &Engine,
    workflow_name: &str,
    job_key: &str,
    task_id: i64,
    position: BreakpointPosition,
) -> Result<()> {
    engine
        .release_breakpoint(workflow_name, job_key, task_id, position)
        .await?;
    Ok(())
}

pub async fn enable_debug(engine: &Engine, workflow_name: &str, task_id: i64) -> Result<()> {
    engine.enable_debug(workflow_name, task_id).await?;
    Ok(())
}

pub async fn stop_debug(engine: &Engine, workflow_name: &str, task_id: i64) -> Result<()> {
    engine.stop_debug(workflow_name, task_id).await?;
    Ok(())
}

/// Stored workflow with presets for every job
pub async fn preset(engine: &Engine, workflow_name: &str) -> Result<Workflow> {
    Ok(engine.preset(workflow_name).await?)
}

/// Stored workflow with selectable options for every job
pub async fn options(engine: &Engine, workflow_name: &str) -> Result<Workflow> {
    Ok(engine.options(workflow_name).await?)
}

// =============================================================================
// Validation
// =============================================================================

const SYSTEM_USER: &str = "system";

fn validate_create_request(req: &CreateTask) -> Result<()> {
    if req.workflow.name.trim().is_empty() {
        return Err(TaskError::ValidationError(
            "Workflow name cannot be empty".to_string(),
        ));
    }

    if req.workflow.stages.is_empty() {
        return Err(TaskError::ValidationError(format!(
            "Workflow {} has no stages",
            req.workflow.name
        )));
    }

    Ok(())
}

fn validate_approve_request(req: &ApproveRequest) -> Result<()> {
    if req.stage_name.trim().is_empty() {
        return Err(TaskError::ValidationError(
            "Stage name cannot be empty".to_string(),
        ));
    }

    if req.user.trim().is_empty() {
        return Err(TaskError::ValidationError(
            "Approving user cannot be empty".to_string(),
        ));
    }

    Ok(())
}
