//! Workflow task documents
//!
//! A `WorkflowTask` is one run of a workflow. It is created at submission
//! time with every job already expanded into concrete `JobTask`s, and it is
//! persisted after every status change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::job_type::JobType;
use super::status::Status;
use super::task_spec::JobTaskSpec;
use super::workflow::{Approval, KeyVal, Param, Workflow};

/// One execution instance of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: Uuid,
    /// Monotonic per workflow name
    pub task_id: i64,
    pub workflow_name: String,
    pub workflow_hash: String,
    pub workflow_display_name: String,
    pub project_name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Merged definition that is actually executed
    pub workflow_args: Workflow,
    /// Definition exactly as submitted
    pub origin_workflow_args: Workflow,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub global_context: BTreeMap<String, String>,
    #[serde(default)]
    pub cluster_id_map: BTreeSet<String>,
    pub status: Status,
    pub creator: Creator,
    #[serde(default)]
    pub revoker: String,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub stages: Vec<StageTask>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_restart: bool,
    #[serde(default)]
    pub is_debug: bool,
    #[serde(default)]
    pub error: String,
}

impl WorkflowTask {
    pub fn find_job(&self, key: &str) -> Option<&JobTask> {
        self.jobs().find(|job| job.key == key)
    }

    pub fn find_job_mut(&mut self, key: &str) -> Option<&mut JobTask> {
        self.stages
            .iter_mut()
            .flat_map(|stage| stage.jobs.iter_mut())
            .find(|job| job.key == key)
    }

    pub fn find_stage(&self, name: &str) -> Option<&StageTask> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobTask> {
        self.stages.iter().flat_map(|stage| stage.jobs.iter())
    }

    /// Tasks expanded from the named job definition, in stage order
    pub fn jobs_of(&self, job_name: &str) -> Vec<&JobTask> {
        self.jobs().filter(|job| job.job_name == job_name).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Creator {
    pub username: String,
    pub email: String,
    pub phone: String,
}

impl Creator {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTask {
    pub name: String,
    pub status: Status,
    pub parallel: bool,
    #[serde(default)]
    pub approval: Option<Approval>,
    pub jobs: Vec<JobTask>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: String,
}

impl StageTask {
    pub fn new(name: impl Into<String>, parallel: bool) -> Self {
        Self {
            name: name.into(),
            status: Status::Created,
            parallel,
            approval: None,
            jobs: Vec::new(),
            start_time: None,
            end_time: None,
            error: String::new(),
        }
    }

    pub fn needs_approval(&self) -> bool {
        self.approval.as_ref().is_some_and(|a| a.enabled)
    }
}

/// Concrete unit of execution produced by expanding a job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    pub name: String,
    /// Unique within the owning workflow task
    pub key: String,
    /// Name of the job definition this task was expanded from
    pub job_name: String,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: String,
    /// Minutes, 0 falls back to the engine default
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub breakpoint_before: bool,
    #[serde(default)]
    pub breakpoint_after: bool,
    #[serde(default)]
    pub service_modules: Vec<WorkflowServiceModule>,
    /// Free-form labels for display, e.g. the target environment
    #[serde(default)]
    pub job_info: BTreeMap<String, String>,
    pub spec: JobTaskSpec,
}

impl JobTask {
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        job_name: impl Into<String>,
        spec: JobTaskSpec,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            job_name: job_name.into(),
            status: Status::Created,
            start_time: None,
            end_time: None,
            error: String::new(),
            timeout: 0,
            retry: 0,
            retry_count: 0,
            best_effort: false,
            outputs: Vec::new(),
            breakpoint_before: false,
            breakpoint_after: false,
            service_modules: Vec::new(),
            job_info: BTreeMap::new(),
            spec,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.spec.job_type()
    }

    /// Clears everything a previous run recorded
    pub fn reset(&mut self) {
        self.status = Status::Created;
        self.start_time = None;
        self.end_time = None;
        self.error.clear();
        self.retry_count = 0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowServiceModule {
    pub service_name: String,
    pub service_module: String,
}

impl WorkflowServiceModule {
    pub fn new(service_name: impl Into<String>, service_module: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_module: service_module.into(),
        }
    }
}

/// Workload container whose image a deploy replaced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub name: String,
    pub kind: String,
    pub container: String,
    /// Image before replacement
    pub origin: String,
}

// =============================================================================
// Events
// =============================================================================

const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub time: String,
    pub message: String,
}

/// Audit timeline of a traffic-shifting job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Events(pub Vec<Event>);

impl Events {
    pub fn info(&mut self, message: impl Into<String>) {
        self.push("info", message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push("error", message.into());
    }

    fn push(&mut self, event_type: &str, message: String) {
        self.0.push(Event {
            event_type: event_type.to_string(),
            time: Utc::now().format(EVENT_TIME_FORMAT).to_string(),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Event> {
        self.0.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task_spec::{FreestyleTaskSpec, JobTaskSpec};

    fn job(key: &str, job_name: &str) -> JobTask {
        JobTask::new(
            key,
            key,
            job_name,
            JobTaskSpec::Freestyle(FreestyleTaskSpec::default()),
        )
    }

    #[test]
    fn test_events_record_type_and_time() {
        let mut events = Events::default();
        events.info("created canary");
        events.error("rollout failed");

        assert_eq!(events.len(), 2);
        assert_eq!(events.0[0].event_type, "info");
        let last = events.last().unwrap();
        assert_eq!(last.event_type, "error");
        assert_eq!(last.time.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_events_serialize_as_list() {
        let mut events = Events::default();
        events.info("x");
        let value = serde_json::to_value(&events).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn test_job_reset_clears_run_state() {
        let mut task = job("deploy.a", "deploy");
        task.status = Status::Failed;
        task.error = "boom".to_string();
        task.retry_count = 2;
        task.start_time = Some(Utc::now());

        task.reset();

        assert_eq!(task.status, Status::Created);
        assert!(task.error.is_empty());
        assert_eq!(task.retry_count, 0);
        assert!(task.start_time.is_none());
    }

    #[test]
    fn test_stage_approval_flag() {
        let mut stage = StageTask::new("s", false);
        assert!(!stage.needs_approval());
        stage.approval = Some(Approval {
            enabled: true,
            ..Default::default()
        });
        assert!(stage.needs_approval());
        stage.jobs.push(job("a", "a"));
        assert_eq!(stage.jobs[0].job_type(), JobType::Freestyle);
    }
}
