//! Workflow-trigger and offline-service configurators

use async_trait::async_trait;
use conduit_core::domain::job_spec::{OfflineServiceJobSpec, WorkflowTriggerJobSpec};
use conduit_core::domain::status::Status;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{
    JobTaskSpec, OfflineServiceTaskSpec, TriggeredWorkflow, WorkflowTriggerTaskSpec,
};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob};
use crate::error::{EngineError, Result};

pub struct WorkflowTriggerJob {
    inner: SpecJob<WorkflowTriggerJobSpec>,
}

impl WorkflowTriggerJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for WorkflowTriggerJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        if spec.workflows.is_empty() {
            return Err(EngineError::validation(format!(
                "trigger job {} starts no workflows",
                self.inner.name()
            )));
        }
        for target in &spec.workflows {
            if target.workflow_name == ctx.workflow.name {
                return Err(EngineError::configuration(format!(
                    "trigger job {} cannot start its own workflow {}",
                    self.inner.name(),
                    target.workflow_name
                )));
            }
            ctx.catalog
                .find_workflow(&target.workflow_name)
                .await
                .map_err(|e| {
                    EngineError::dependency(format!(
                        "trigger job {} starts an unknown workflow: {}",
                        self.inner.name(),
                        e
                    ))
                })?;
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(vec![self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::WorkflowTrigger(WorkflowTriggerTaskSpec {
                is_enable_check: spec.is_enable_check,
                workflows: spec
                    .workflows
                    .iter()
                    .map(|w| TriggeredWorkflow {
                        workflow_name: w.workflow_name.clone(),
                        params: w.params.clone(),
                        task_id: 0,
                        status: Status::Created,
                    })
                    .collect(),
            }),
        )])
    }
}

pub struct OfflineServiceJob {
    inner: SpecJob<OfflineServiceJobSpec>,
}

impl OfflineServiceJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for OfflineServiceJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        if self.inner.spec.env.is_empty() {
            return Err(EngineError::validation(format!(
                "offline job {} has no environment",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let env = ctx
            .catalog
            .find_env(&ctx.workflow.project, &spec.env)
            .await?;
        let mut task = self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::OfflineService(OfflineServiceTaskSpec {
                project: ctx.workflow.project.clone(),
                env: spec.env.clone(),
                cluster_id: env.cluster_id.clone(),
                namespace: env.namespace.clone(),
                services: spec.services.clone(),
                results: Vec::new(),
            }),
        );
        task.job_info.insert("env_name".to_string(), spec.env.clone());
        Ok(vec![task])
    }
}
