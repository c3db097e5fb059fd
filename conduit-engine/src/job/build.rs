//! Build and distribute-image configurators
//!
//! Both expand into freestyle tasks so the same step runtime executes them.
//! Deploy jobs quote them to learn which images were produced.

use async_trait::async_trait;
use conduit_core::domain::job_spec::{BuildJobSpec, DistributeImageJobSpec, JobProperties};
use conduit_core::domain::step::StepTask;
use conduit_core::domain::task::{JobTask, WorkflowServiceModule};
use conduit_core::domain::task_spec::{FreestyleTaskSpec, JobTaskSpec};
use conduit_core::domain::workflow::{Job, KeyVal};

use super::{JobConfigurator, JobContext, SpecJob, fanout_key};
use crate::context::output_key;
use crate::error::{EngineError, Result};
use crate::infra::steps::OUTPUTS_DIR_ENV;

/// Output holding the image a build or distribute task produced
pub const IMAGE_OUTPUT: &str = "IMAGE";

fn publish_image_line() -> String {
    format!("echo \"$IMAGE\" > \"${}/{}\"", OUTPUTS_DIR_ENV, IMAGE_OUTPUT)
}

fn module_task(
    inner: &SpecJob<impl serde::Serialize + serde::de::DeserializeOwned>,
    service: &str,
    module: &str,
    envs: Vec<KeyVal>,
    script: String,
) -> JobTask {
    let step = StepTask {
        job_name: inner.name().to_string(),
        ..StepTask::shell(format!("{}-{}", service, module), script)
    };
    let spec = FreestyleTaskSpec {
        properties: JobProperties {
            envs,
            ..Default::default()
        },
        steps: vec![step],
    };
    let mut task = inner.task(
        format!("{}-{}-{}", service, module, inner.name()),
        fanout_key(inner.name(), &format!("{}.{}", service, module)),
        JobTaskSpec::Freestyle(spec),
    );
    task.service_modules = vec![WorkflowServiceModule::new(service, module)];
    task.job_info
        .insert("service_name".to_string(), service.to_string());
    task.job_info
        .insert("service_module".to_string(), module.to_string());
    task.outputs = vec![IMAGE_OUTPUT.to_string()];
    task
}

pub struct BuildJob {
    inner: SpecJob<BuildJobSpec>,
}

impl BuildJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for BuildJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    /// Users pick the image of each module; scripts stay as authored
    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: BuildJobSpec = args.decode_spec()?;
        for build in &mut self.inner.spec.service_and_builds {
            let selected = args.service_and_builds.iter().find(|b| {
                b.service_name == build.service_name && b.service_module == build.service_module
            });
            if let Some(selected) = selected {
                build.image = selected.image.clone();
                build.envs = selected.envs.clone();
            }
        }
        Ok(())
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        for build in &self.inner.spec.service_and_builds {
            if build.service_name.is_empty() || build.service_module.is_empty() {
                return Err(EngineError::validation(format!(
                    "build job {} has a target without service or module",
                    self.inner.name()
                )));
            }
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        Ok(self
            .inner
            .spec
            .service_and_builds
            .iter()
            .map(|build| {
                let mut envs = vec![
                    KeyVal::new("SERVICE", &build.service_name),
                    KeyVal::new("SERVICE_MODULE", &build.service_module),
                    KeyVal::new("IMAGE", &build.image),
                ];
                envs.extend(build.envs.iter().cloned());
                let script = if build.script.trim().is_empty() {
                    publish_image_line()
                } else {
                    format!("{}\n{}", build.script.trim_end(), publish_image_line())
                };
                module_task(&self.inner, &build.service_name, &build.service_module, envs, script)
            })
            .collect())
    }

    fn outputs(&self) -> Vec<String> {
        self.inner
            .spec
            .service_and_builds
            .iter()
            .map(|b| {
                output_key(
                    &fanout_key(self.inner.name(), &format!("{}.{}", b.service_name, b.service_module)),
                    IMAGE_OUTPUT,
                )
            })
            .collect()
    }
}

pub struct DistributeJob {
    inner: SpecJob<DistributeImageJobSpec>,
}

impl DistributeJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for DistributeJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        for target in &self.inner.spec.targets {
            if target.source_image.is_empty() || target.target_image.is_empty() {
                return Err(EngineError::validation(format!(
                    "distribute job {} needs a source and target image for {}/{}",
                    self.inner.name(),
                    target.service_name,
                    target.service_module
                )));
            }
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        Ok(self
            .inner
            .spec
            .targets
            .iter()
            .map(|target| {
                let envs = vec![
                    KeyVal::new("SOURCE_IMAGE", &target.source_image),
                    KeyVal::new("IMAGE", &target.target_image),
                ];
                let script = format!(
                    "docker pull \"$SOURCE_IMAGE\"\ndocker tag \"$SOURCE_IMAGE\" \"$IMAGE\"\ndocker push \"$IMAGE\"\n{}",
                    publish_image_line()
                );
                module_task(&self.inner, &target.service_name, &target.service_module, envs, script)
            })
            .collect())
    }
}
