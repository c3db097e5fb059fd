//! Execution context of one running workflow task
//!
//! Rebuilt every time a task starts or resumes and never persisted itself.
//! Global context and cluster ids live on the task document and are
//! reached through the recorder, so concurrent jobs serialize on its lock.

use conduit_core::domain::status::Status;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ack::TaskRecorder;

#[derive(Clone)]
pub struct WorkflowTaskCtx {
    pub workflow_name: String,
    pub workflow_display_name: String,
    pub project_name: String,
    pub task_id: i64,
    pub creator: String,
    pub workspace: PathBuf,
    pub dist_dir: PathBuf,
    pub docker_host: Option<String>,
    recorder: TaskRecorder,
}

impl WorkflowTaskCtx {
    pub fn new(
        recorder: TaskRecorder,
        workspace: PathBuf,
        dist_dir: PathBuf,
        docker_host: Option<String>,
    ) -> Self {
        let (workflow_name, workflow_display_name, project_name, task_id, creator) =
            recorder.read(|task| {
                (
                    task.workflow_name.clone(),
                    task.workflow_display_name.clone(),
                    task.project_name.clone(),
                    task.task_id,
                    task.creator.username.clone(),
                )
            });
        Self {
            workflow_name,
            workflow_display_name,
            project_name,
            task_id,
            creator,
            workspace,
            dist_dir,
            docker_host,
            recorder,
        }
    }

    pub fn recorder(&self) -> &TaskRecorder {
        &self.recorder
    }

    pub fn global(&self, key: &str) -> Option<String> {
        self.recorder
            .read(|task| task.global_context.get(key).cloned())
    }

    pub fn set_global(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.recorder.update_quietly(|task| {
            task.global_context.insert(key, value);
        });
    }

    pub fn globals(&self) -> BTreeMap<String, String> {
        self.recorder.read(|task| task.global_context.clone())
    }

    pub fn add_cluster_id(&self, cluster_id: &str) {
        if cluster_id.is_empty() {
            return;
        }
        self.recorder.update_quietly(|task| {
            task.cluster_id_map.insert(cluster_id.to_string());
        });
    }

    pub fn set_status(&self, status: Status) {
        self.recorder.update(|task| task.status = status);
    }

    pub fn is_debug(&self) -> bool {
        self.recorder.read(|task| task.is_debug)
    }

    /// Substitutes every global context key found in `input`
    ///
    /// Keys are stored in their placeholder form, e.g. `{{.job.build.IMAGE}}`.
    pub fn render(&self, input: &str) -> String {
        if !input.contains("{{") {
            return input.to_string();
        }
        self.recorder.read(|task| {
            task.global_context
                .iter()
                .fold(input.to_string(), |acc, (key, value)| acc.replace(key, value))
        })
    }
}

/// Global context key of a task output
pub fn output_key(job_key: &str, output: &str) -> String {
    format!("{{{{.job.{}.{}}}}}", job_key, output)
}

/// Global context key of a workflow parameter
pub fn param_key(name: &str) -> String {
    format!("{{{{.workflow.params.{}}}}}", name)
}
