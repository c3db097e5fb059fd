//! Job configurators
//!
//! A configurator owns one job definition of a workflow. It fills defaults,
//! computes presets and options for the submission surface, merges
//! re-submitted arguments, validates the definition and finally expands it
//! into concrete job tasks.
//!
//! Configurators are picked by job kind through [`configurator_for`].

pub mod build;
pub mod custom_deploy;
pub mod deploy;
pub mod freestyle;
pub mod gray;
pub mod integrations;
pub mod istio;
pub mod jenkins;
pub mod k8s_patch;
pub mod mse;
pub mod rollout;
pub mod trigger;

use async_trait::async_trait;
use conduit_core::domain::job_type::JobType;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use conduit_core::domain::workflow::{Job, Workflow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::catalog::EnvironmentCatalog;
use crate::config::{License, MAX_TIMEOUT};
use crate::error::{EngineError, Result};
use crate::infra::Infra;

/// What a configurator may consult besides its own definition
#[derive(Clone)]
pub struct JobContext {
    /// Workflow the job belongs to, as submitted
    pub workflow: Workflow,
    pub catalog: Arc<dyn EnvironmentCatalog>,
    pub infra: Infra,
    pub license: License,
}

impl JobContext {
    pub fn new(
        workflow: Workflow,
        catalog: Arc<dyn EnvironmentCatalog>,
        infra: Infra,
        license: License,
    ) -> Self {
        Self {
            workflow,
            catalog,
            infra,
            license,
        }
    }
}

#[async_trait]
pub trait JobConfigurator: Send + Sync {
    /// Current definition with the typed spec written back
    fn to_job(&self) -> Result<Job>;

    /// Fills computed defaults into the spec
    async fn instantiate(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Computes the values offered to the user for this job
    async fn set_preset(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Computes the choices offered for every selectable target
    async fn set_options(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Drops the user's selection, keeping only author settings
    fn clear_selection(&mut self) {}

    /// Reconciles a stored submission with the latest stored definition
    async fn update_with_latest_setting(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Takes the user-editable fields of a re-submitted definition
    fn merge_args(&mut self, args: &Job) -> Result<()>;

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Expands the definition into job tasks; deterministic for equal input
    async fn to_jobs(&self, ctx: &JobContext, task_id: i64) -> Result<Vec<JobTask>>;

    /// Global context keys this job publishes
    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }
}

// =============================================================================
// Typed spec holder
// =============================================================================

/// A job definition together with its decoded spec
#[derive(Debug, Clone)]
pub struct SpecJob<T> {
    pub job: Job,
    pub spec: T,
}

impl<T: Serialize + DeserializeOwned> SpecJob<T> {
    pub fn decode(job: &Job) -> Result<Self> {
        let spec = job.decode_spec().map_err(|e| {
            EngineError::validation(format!("job {} has an invalid spec: {}", job.name, e))
        })?;
        Ok(Self {
            job: job.clone(),
            spec,
        })
    }

    pub fn encode(&self) -> Result<Job> {
        let mut job = self.job.clone();
        job.encode_spec(&self.spec)?;
        Ok(job)
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    /// Replaces the spec with the one from `args` when it is the same job
    pub fn replace_from(&mut self, args: &Job) -> Result<()> {
        if args.name == self.job.name && args.job_type == self.job.job_type {
            self.spec = Self::decode(args)?.spec;
        }
        Ok(())
    }

    /// Stamps the fields every expanded task shares
    pub fn task(
        &self,
        name: impl Into<String>,
        key: impl Into<String>,
        spec: JobTaskSpec,
    ) -> JobTask {
        let mut task = JobTask::new(name, key, self.job.name.clone(), spec);
        task.best_effort = self.job.best_effort;
        task.job_info
            .insert("job_name".to_string(), self.job.name.clone());
        task
    }
}

/// Key of one fan-out task of a job
pub fn fanout_key(job_name: &str, part: &str) -> String {
    format!("{}.{}", job_name, part)
}

/// Converts a minutes setting into task spec seconds, clamped to the
/// longest supported timeout
pub fn minutes_to_secs(minutes: i64) -> i64 {
    let max_minutes = (MAX_TIMEOUT.as_secs() / 60) as i64;
    minutes.clamp(0, max_minutes) * 60
}

/// Finds the job a definition quotes
pub fn find_quoted_job<'a>(workflow: &'a Workflow, current: &str, quoted: &str) -> Result<&'a Job> {
    if quoted.is_empty() {
        return Err(EngineError::validation(format!(
            "job {} does not name the job it depends on",
            current
        )));
    }
    workflow
        .find_job(quoted)
        .map(|(_, job)| job)
        .ok_or_else(|| {
            EngineError::dependency(format!(
                "job {} quotes {}, which is not part of workflow {}",
                current, quoted, workflow.name
            ))
        })
}

/// Quoting a job is legal only when the quoted job runs strictly earlier
pub fn ensure_quoted_earlier(workflow: &Workflow, current: &str, quoted: &str) -> Result<()> {
    find_quoted_job(workflow, current, quoted)?;
    let ranks = workflow.job_rank_map();
    let (Some(current_rank), Some(quoted_rank)) = (ranks.get(current), ranks.get(quoted)) else {
        return Err(EngineError::dependency(format!(
            "job {} or {} is missing from workflow {}",
            current, quoted, workflow.name
        )));
    };
    if quoted_rank >= current_rank {
        return Err(EngineError::configuration(format!(
            "job {} can only quote a job that runs before it, {} does not",
            current, quoted
        )));
    }
    Ok(())
}

/// Decodes the spec of a quoted job, which must be one of `kinds` and run
/// strictly earlier
pub fn quoted_spec<T: DeserializeOwned>(
    workflow: &Workflow,
    current: &str,
    quoted: &str,
    kinds: &[JobType],
) -> Result<T> {
    ensure_quoted_earlier(workflow, current, quoted)?;
    let job = find_quoted_job(workflow, current, quoted)?;
    if !kinds.contains(&job.job_type) {
        return Err(EngineError::configuration(format!(
            "job {} quotes {}, a {} job it cannot follow",
            current, quoted, job.job_type
        )));
    }
    Ok(job.decode_spec()?)
}

/// Picks the configurator for a job definition
pub fn configurator_for(job: &Job) -> Result<Box<dyn JobConfigurator>> {
    let configurator: Box<dyn JobConfigurator> = match job.job_type {
        JobType::ZadigDeploy | JobType::ZadigHelmDeploy => Box::new(deploy::DeployJob::new(job)?),
        JobType::ZadigBuild => Box::new(build::BuildJob::new(job)?),
        JobType::ZadigDistributeImage => Box::new(build::DistributeJob::new(job)?),
        JobType::Freestyle => Box::new(freestyle::FreestyleJob::new(job)?),
        JobType::Plugin => Box::new(freestyle::PluginJob::new(job)?),
        JobType::CustomDeploy => Box::new(custom_deploy::CustomDeployJob::new(job)?),
        JobType::CanaryDeploy => Box::new(rollout::CanaryDeployJob::new(job)?),
        JobType::CanaryRelease => Box::new(rollout::CanaryReleaseJob::new(job)?),
        JobType::BlueGreenDeploy => Box::new(rollout::BlueGreenDeployJob::new(job)?),
        JobType::BlueGreenRelease => Box::new(rollout::BlueGreenReleaseJob::new(job)?),
        JobType::BlueGreenDeployV2 => Box::new(rollout::BlueGreenDeployV2Job::new(job)?),
        JobType::BlueGreenReleaseV2 => Box::new(rollout::BlueGreenReleaseV2Job::new(job)?),
        JobType::GrayRelease => Box::new(gray::GrayReleaseJob::new(job)?),
        JobType::GrayRollback => Box::new(gray::GrayRollbackJob::new(job)?),
        JobType::IstioRelease => Box::new(istio::IstioReleaseJob::new(job)?),
        JobType::IstioRollback => Box::new(istio::IstioRollbackJob::new(job)?),
        JobType::K8sPatch => Box::new(k8s_patch::K8sPatchJob::new(job)?),
        JobType::Jenkins => Box::new(jenkins::JenkinsJob::new(job)?),
        JobType::Sql => Box::new(integrations::SqlJob::new(job)?),
        JobType::Nacos => Box::new(integrations::NacosJob::new(job)?),
        JobType::Apollo => Box::new(integrations::ApolloJob::new(job)?),
        JobType::Jira => Box::new(integrations::JiraJob::new(job)?),
        JobType::GuanceyunCheck => Box::new(integrations::GuanceyunCheckJob::new(job)?),
        JobType::WorkflowTrigger => Box::new(trigger::WorkflowTriggerJob::new(job)?),
        JobType::OfflineService => Box::new(trigger::OfflineServiceJob::new(job)?),
        JobType::MseGrayRelease => Box::new(mse::MseGrayReleaseJob::new(job)?),
        JobType::MseGrayOffline => Box::new(mse::MseGrayOfflineJob::new(job)?),
    };
    Ok(configurator)
}

/// Lints and expands every job of a workflow, in stage order
///
/// Fails before producing anything when any job is invalid.
pub async fn expand_workflow(
    ctx: &JobContext,
    task_id: i64,
) -> Result<Vec<(String, bool, Vec<JobTask>)>> {
    let mut stages = Vec::new();
    let mut keys = std::collections::HashSet::new();

    for stage in &ctx.workflow.stages {
        let mut tasks = Vec::new();
        for job in &stage.jobs {
            let mut configurator = configurator_for(job)?;
            configurator.instantiate(ctx).await?;
            configurator.lint(ctx).await?;
            for task in configurator.to_jobs(ctx, task_id).await? {
                if !keys.insert(task.key.clone()) {
                    return Err(EngineError::validation(format!(
                        "job task key {} is produced twice",
                        task.key
                    )));
                }
                tasks.push(task);
            }
        }
        stages.push((stage.name.clone(), stage.parallel, tasks));
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::domain::workflow::Stage;
    use serde_json::json;

    fn workflow() -> Workflow {
        Workflow {
            name: "wf".to_string(),
            stages: vec![
                Stage {
                    name: "build".to_string(),
                    parallel: true,
                    approval: None,
                    jobs: vec![Job::new("build", JobType::ZadigBuild, json!({}))],
                },
                Stage {
                    name: "deploy".to_string(),
                    parallel: false,
                    approval: None,
                    jobs: vec![
                        Job::new("deploy", JobType::ZadigDeploy, json!({})),
                        Job::new("check", JobType::Freestyle, json!({})),
                    ],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_quoting_earlier_job() {
        let workflow = workflow();
        assert!(ensure_quoted_earlier(&workflow, "deploy", "build").is_ok());
        assert!(ensure_quoted_earlier(&workflow, "check", "deploy").is_ok());
    }

    #[test]
    fn test_quoting_later_job_is_configuration_error() {
        let workflow = workflow();
        let err = ensure_quoted_earlier(&workflow, "build", "deploy").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        let err = ensure_quoted_earlier(&workflow, "deploy", "deploy").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_quoting_missing_job_is_dependency_error() {
        let err = ensure_quoted_earlier(&workflow(), "deploy", "ghost").unwrap_err();
        assert!(matches!(err, EngineError::Dependency(_)));
    }

    #[test]
    fn test_every_kind_has_a_configurator() {
        for job_type in JobType::ALL {
            let job = Job::new("j", job_type, json!({}));
            assert!(configurator_for(&job).is_ok(), "{}", job_type);
        }
    }

    #[test]
    fn test_replace_from_requires_same_job() {
        let job = Job::new("f", JobType::Freestyle, json!({"properties": {"timeout": 5}}));
        let mut holder: SpecJob<conduit_core::domain::job_spec::FreestyleJobSpec> =
            SpecJob::decode(&job).unwrap();

        let other = Job::new("g", JobType::Freestyle, json!({"properties": {"timeout": 9}}));
        holder.replace_from(&other).unwrap();
        assert_eq!(holder.spec.properties.timeout, 5);

        let same = Job::new("f", JobType::Freestyle, json!({"properties": {"timeout": 9}}));
        holder.replace_from(&same).unwrap();
        assert_eq!(holder.spec.properties.timeout, 9);
    }

    #[test]
    fn test_minutes_to_secs_clamps() {
        assert_eq!(minutes_to_secs(10), 600);
        assert_eq!(minutes_to_secs(-3), 0);
        assert_eq!(minutes_to_secs(i64::MAX), MAX_TIMEOUT.as_secs() as i64);
    }
}
