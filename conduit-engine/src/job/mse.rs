//! MSE gray release and offline configurators
//!
//! Gray workloads live next to the base environment's workloads and are told
//! apart by the `alicloud.service.tag` label.

use async_trait::async_trait;
use conduit_core::domain::job_spec::{MseGrayOfflineJobSpec, MseGrayReleaseJobSpec};
use conduit_core::domain::task::{JobTask, WorkflowServiceModule};
use conduit_core::domain::task_spec::{
    DeployServiceModule, JobTaskSpec, MseGrayOfflineTaskSpec, MseGrayReleaseTaskSpec,
};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob, fanout_key, minutes_to_secs};
use crate::error::{EngineError, Result};

pub const MSE_TAG_LABEL: &str = "alicloud.service.tag";

pub fn mse_workload_name(workload: &str, tag: &str) -> String {
    format!("{}-mse-{}", workload, tag)
}

fn require_tag(job: &str, tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(EngineError::validation(format!("mse job {} has no gray tag", job)));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(EngineError::validation(format!(
            "gray tag {} of job {} must be lowercase letters, digits or '-'",
            tag, job
        )));
    }
    Ok(())
}

pub struct MseGrayReleaseJob {
    inner: SpecJob<MseGrayReleaseJobSpec>,
}

impl MseGrayReleaseJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for MseGrayReleaseJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: MseGrayReleaseJobSpec = args.decode_spec()?;
        self.inner.spec.gray_services = args.gray_services;
        Ok(())
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        require_tag(self.inner.name(), &spec.gray_tag)?;
        if spec.base_env.is_empty() {
            return Err(EngineError::validation(format!(
                "mse job {} has no base environment",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let base = ctx
            .catalog
            .find_env(&ctx.workflow.project, &spec.base_env)
            .await?;
        Ok(spec
            .gray_services
            .iter()
            .map(|service| {
                let mut task = self.inner.task(
                    format!("{}-{}", service.service_name, self.inner.name()),
                    fanout_key(self.inner.name(), &service.service_name),
                    JobTaskSpec::MseGrayRelease(MseGrayReleaseTaskSpec {
                        project: ctx.workflow.project.clone(),
                        production: spec.production,
                        gray_tag: spec.gray_tag.clone(),
                        base_env: spec.base_env.clone(),
                        gray_env: spec.gray_env.clone(),
                        cluster_id: base.cluster_id.clone(),
                        namespace: base.namespace.clone(),
                        skip_check_run_status: spec.skip_check_run_status,
                        service_name: service.service_name.clone(),
                        replicas: service.replicas.max(1),
                        modules: service
                            .service_and_images
                            .iter()
                            .map(DeployServiceModule::from)
                            .collect(),
                        timeout: minutes_to_secs(spec.deploy_timeout),
                        events: Default::default(),
                    }),
                );
                task.service_modules = service
                    .service_and_images
                    .iter()
                    .map(|m| WorkflowServiceModule::new(&service.service_name, &m.service_module))
                    .collect();
                task.job_info
                    .insert("env_name".to_string(), spec.base_env.clone());
                task
            })
            .collect())
    }
}

pub struct MseGrayOfflineJob {
    inner: SpecJob<MseGrayOfflineJobSpec>,
}

impl MseGrayOfflineJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for MseGrayOfflineJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        require_tag(self.inner.name(), &self.inner.spec.gray_tag)
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let env = ctx
            .catalog
            .find_env(&ctx.workflow.project, &spec.env)
            .await?;
        Ok(vec![self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::MseGrayOffline(MseGrayOfflineTaskSpec {
                project: ctx.workflow.project.clone(),
                env: spec.env.clone(),
                cluster_id: env.cluster_id.clone(),
                namespace: env.namespace.clone(),
                gray_tag: spec.gray_tag.clone(),
                services: spec.services.clone(),
                events: Default::default(),
            }),
        )])
    }
}
