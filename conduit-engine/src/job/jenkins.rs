//! Jenkins configurator

use async_trait::async_trait;
use conduit_core::domain::integration::IntegrationKind;
use conduit_core::domain::job_spec::{JenkinsJobParameter, JenkinsJobSpec};
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{JenkinsTaskSpec, JobTaskSpec};
use conduit_core::domain::workflow::Job;

use super::integrations::require_integration;
use super::{JobConfigurator, JobContext, SpecJob, fanout_key};
use crate::error::{EngineError, Result};

pub struct JenkinsJob {
    inner: SpecJob<JenkinsJobSpec>,
}

/// Current parameter definitions with the stored values laid over them
///
/// Parameters Jenkins no longer defines are dropped; new ones keep their
/// server defaults.
pub fn merge_parameters(
    current: Vec<JenkinsJobParameter>,
    stored: &[JenkinsJobParameter],
) -> Vec<JenkinsJobParameter> {
    current
        .into_iter()
        .map(|mut param| {
            if let Some(saved) = stored.iter().find(|s| s.name == param.name) {
                param.value = saved.value.clone();
            }
            param
        })
        .collect()
}

impl JenkinsJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for JenkinsJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    async fn set_preset(&mut self, ctx: &JobContext) -> Result<()> {
        let server = require_integration(
            ctx,
            &self.inner.job.name,
            &self.inner.spec.id,
            IntegrationKind::Jenkins,
        )
        .await?;
        let client = ctx.infra.jenkins()?;
        for job in self.inner.spec.jobs.iter_mut() {
            let current = client.job_parameters(&server, &job.job_name).await?;
            job.parameters = merge_parameters(current, &job.parameters);
        }
        Ok(())
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        require_integration(ctx, self.inner.name(), &self.inner.spec.id, IntegrationKind::Jenkins)
            .await?;
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        if spec.jobs.is_empty() {
            return Err(EngineError::validation(format!(
                "jenkins job {} selects no jenkins jobs",
                self.inner.name()
            )));
        }
        Ok(spec
            .jobs
            .iter()
            .map(|job| {
                let mut task = self.inner.task(
                    format!("{}-{}", job.job_name, self.inner.name()),
                    fanout_key(self.inner.name(), &job.job_name),
                    JobTaskSpec::Jenkins(JenkinsTaskSpec {
                        id: spec.id.clone(),
                        job: job.clone(),
                        build_number: None,
                        build_url: String::new(),
                    }),
                );
                task.job_info
                    .insert("jenkins_job_name".to_string(), job.job_name.clone());
                task
            })
            .collect())
    }
}
