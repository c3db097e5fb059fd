//! Workflow task DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::status::Status;
use crate::domain::task::{Creator, WorkflowTask};
use crate::domain::workflow::Workflow;

/// Request to run a workflow
///
/// `workflow` carries the user's arguments: the stored definition with
/// user-editable fields filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub workflow: Workflow,
    #[serde(default)]
    pub creator: Creator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub project_name: String,
    pub workflow_name: String,
    pub task_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub stage_name: String,
    pub workflow_name: String,
    pub task_id: i64,
    pub approve: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointPosition {
    Before,
    After,
}

impl std::str::FromStr for BreakpointPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            other => Err(format!("invalid breakpoint position: {other}")),
        }
    }
}

/// Query parameters of the task listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    pub workflow_name: String,
    #[serde(default = "default_page_num")]
    pub page_num: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page_num() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

impl ListTasksQuery {
    pub fn offset(&self) -> i64 {
        (self.page_num.max(1) - 1) * self.limit()
    }

    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, 200)
    }
}

/// Listing entry with stage summaries but no job specs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPreview {
    pub task_id: i64,
    pub workflow_name: String,
    pub project_name: String,
    pub status: Status,
    pub creator: String,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub stages: Vec<StagePreview>,
    pub is_restart: bool,
    pub is_debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePreview {
    pub name: String,
    pub status: Status,
    /// Job key to status
    pub jobs: BTreeMap<String, Status>,
}

impl From<&WorkflowTask> for TaskPreview {
    fn from(task: &WorkflowTask) -> Self {
        Self {
            task_id: task.task_id,
            workflow_name: task.workflow_name.clone(),
            project_name: task.project_name.clone(),
            status: task.status,
            creator: task.creator.username.clone(),
            create_time: task.create_time,
            start_time: task.start_time,
            end_time: task.end_time,
            stages: task
                .stages
                .iter()
                .map(|stage| StagePreview {
                    name: stage.name.clone(),
                    status: stage.status,
                    jobs: stage
                        .jobs
                        .iter()
                        .map(|job| (job.key.clone(), job.status))
                        .collect(),
                })
                .collect(),
            is_restart: task.is_restart,
            is_debug: task.is_debug,
        }
    }
}
