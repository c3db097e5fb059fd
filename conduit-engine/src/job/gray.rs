//! Gray release and rollback configurators
//!
//! The first gray job of a workflow names its targets. Later gray jobs quote
//! the first one and only change the gray scale.

use async_trait::async_trait;
use conduit_core::domain::job_spec::{GrayReleaseJobSpec, GrayRollbackJobSpec};
use conduit_core::domain::job_type::JobType;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{GrayReleaseTaskSpec, GrayRollbackTaskSpec, JobTaskSpec};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob, fanout_key, minutes_to_secs, quoted_spec};
use crate::error::{EngineError, Result};

pub fn gray_workload_name(workload: &str) -> String {
    format!("{}-zadig-gray", workload)
}

/// Replicas the gray workload runs with, at least one
pub fn gray_replicas(total: i32, scale: u32) -> i32 {
    let scaled = (i64::from(total) * i64::from(scale) + 99) / 100;
    scaled.clamp(1, i64::from(total.max(1))) as i32
}

pub struct GrayReleaseJob {
    inner: SpecJob<GrayReleaseJobSpec>,
}

impl GrayReleaseJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }

    fn is_first(&self) -> bool {
        self.inner.spec.from_job.is_empty()
    }

    /// The definition holding the targets: this one or the quoted first job
    fn first_spec(&self, ctx: &JobContext) -> Result<GrayReleaseJobSpec> {
        if self.is_first() {
            return Ok(self.inner.spec.clone());
        }
        let first: GrayReleaseJobSpec = quoted_spec(
            &ctx.workflow,
            self.inner.name(),
            &self.inner.spec.from_job,
            &[JobType::GrayRelease],
        )?;
        if !first.from_job.is_empty() {
            return Err(EngineError::configuration(format!(
                "gray job {} must quote the first gray job, {} is not",
                self.inner.name(),
                self.inner.spec.from_job
            )));
        }
        Ok(first)
    }
}

#[async_trait]
impl JobConfigurator for GrayReleaseJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        let scale = self.inner.spec.gray_scale;
        if scale == 0 || scale > 100 {
            return Err(EngineError::validation(format!(
                "gray scale of job {} must be within 1..=100",
                self.inner.name()
            )));
        }
        self.first_spec(ctx).map(|_| ())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let first = self.first_spec(ctx)?;
        let scale = self.inner.spec.gray_scale;
        Ok(first
            .targets
            .iter()
            .map(|target| {
                self.inner.task(
                    format!("{}-{}", target.workload_name, self.inner.name()),
                    fanout_key(self.inner.name(), &target.workload_name),
                    JobTaskSpec::GrayRelease(GrayReleaseTaskSpec {
                        cluster_id: first.cluster_id.clone(),
                        namespace: first.namespace.clone(),
                        first_job: self.is_first(),
                        workload_type: target.workload_type.clone(),
                        workload_name: target.workload_name.clone(),
                        gray_workload_name: gray_workload_name(&target.workload_name),
                        container_name: target.container_name.clone(),
                        image: target.image.clone(),
                        gray_scale: scale,
                        total_replica: target.replica,
                        gray_replica: gray_replicas(target.replica, scale),
                        timeout: minutes_to_secs(self.inner.spec.deploy_timeout),
                        events: Default::default(),
                    }),
                )
            })
            .collect())
    }
}

pub struct GrayRollbackJob {
    inner: SpecJob<GrayRollbackJobSpec>,
}

impl GrayRollbackJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for GrayRollbackJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(spec
            .targets
            .iter()
            .map(|target| {
                self.inner.task(
                    format!("{}-{}", target.workload_name, self.inner.name()),
                    fanout_key(self.inner.name(), &target.workload_name),
                    JobTaskSpec::GrayRollback(GrayRollbackTaskSpec {
                        cluster_id: spec.cluster_id.clone(),
                        namespace: spec.namespace.clone(),
                        workload_type: target.workload_type.clone(),
                        workload_name: target.workload_name.clone(),
                        gray_workload_name: gray_workload_name(&target.workload_name),
                        origin_image: String::new(),
                        origin_replica: 0,
                        timeout: minutes_to_secs(spec.rollback_timeout),
                        events: Default::default(),
                    }),
                )
            })
            .collect())
    }
}
