//! Freestyle and plugin configurators
//!
//! Each expands into exactly one task keyed by the job name.

use async_trait::async_trait;
use conduit_core::domain::job_spec::{FreestyleJobSpec, PluginJobSpec};
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{FreestyleTaskSpec, JobTaskSpec, PluginTaskSpec};
use conduit_core::domain::workflow::{Job, KeyVal, Param};

use super::{JobConfigurator, JobContext, SpecJob};
use crate::context::output_key;
use crate::error::{EngineError, Result};

/// Takes the values of `selected` for keys that already exist in `stored`
fn merge_env_values(stored: &mut [KeyVal], selected: &[KeyVal]) {
    for kv in stored.iter_mut() {
        if let Some(value) = selected.iter().find(|s| s.key == kv.key) {
            kv.value = value.value.clone();
        }
    }
}

fn merge_param_values(stored: &mut [Param], selected: &[Param]) {
    for param in stored.iter_mut() {
        if let Some(value) = selected.iter().find(|s| s.name == param.name) {
            param.value = value.value.clone();
        }
    }
}

pub struct FreestyleJob {
    inner: SpecJob<FreestyleJobSpec>,
}

impl FreestyleJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for FreestyleJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: FreestyleJobSpec = args.decode_spec()?;
        merge_env_values(&mut self.inner.spec.properties.envs, &args.properties.envs);
        Ok(())
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        if let Some(step) = self.inner.spec.steps.iter().find(|s| s.name.is_empty()) {
            return Err(EngineError::validation(format!(
                "freestyle job {} has an unnamed {} step",
                self.inner.name(),
                step.spec.step_type()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let steps = spec
            .steps
            .iter()
            .cloned()
            .map(|mut step| {
                step.job_name = self.inner.name().to_string();
                step
            })
            .collect();
        let mut task = self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::Freestyle(FreestyleTaskSpec {
                properties: spec.properties.clone(),
                steps,
            }),
        );
        task.timeout = spec.properties.timeout;
        task.retry = spec.properties.retry;
        task.outputs = spec.outputs.iter().map(|o| o.name.clone()).collect();
        Ok(vec![task])
    }

    fn outputs(&self) -> Vec<String> {
        self.inner
            .spec
            .outputs
            .iter()
            .map(|o| output_key(self.inner.name(), &o.name))
            .collect()
    }
}

pub struct PluginJob {
    inner: SpecJob<PluginJobSpec>,
}

impl PluginJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for PluginJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: PluginJobSpec = args.decode_spec()?;
        merge_param_values(&mut self.inner.spec.plugin.inputs, &args.plugin.inputs);
        merge_env_values(&mut self.inner.spec.properties.envs, &args.properties.envs);
        Ok(())
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        if self.inner.spec.plugin.image.is_empty() {
            return Err(EngineError::validation(format!(
                "plugin job {} has no image",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let mut task = self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::Plugin(PluginTaskSpec {
                properties: spec.properties.clone(),
                plugin: spec.plugin.clone(),
            }),
        );
        task.timeout = spec.properties.timeout;
        task.retry = spec.properties.retry;
        task.outputs = spec.plugin.outputs.iter().map(|o| o.name.clone()).collect();
        task.job_info
            .insert("plugin".to_string(), format!("{}@{}", spec.plugin.name, spec.plugin.version));
        Ok(vec![task])
    }

    fn outputs(&self) -> Vec<String> {
        self.inner
            .spec
            .plugin
            .outputs
            .iter()
            .map(|o| output_key(self.inner.name(), &o.name))
            .collect()
    }
}
