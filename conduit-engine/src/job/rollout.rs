//! Canary and blue-green configurators
//!
//! Deploy-side jobs carry their own targets. Release-side jobs quote an
//! earlier deploy-side job and derive their targets from it.

use async_trait::async_trait;
use conduit_core::domain::job_spec::{
    BlueGreenDeployJobSpec, BlueGreenDeployV2JobSpec, BlueGreenTarget, CanaryDeployJobSpec,
    CanaryTarget, ReleaseJobSpec, strip_fixed_mark,
};
use conduit_core::domain::job_type::JobType;
use conduit_core::domain::task::{JobTask, WorkflowServiceModule};
use conduit_core::domain::task_spec::{
    BlueGreenTaskSpec, BlueGreenV2TaskSpec, CanaryTaskSpec, DeployServiceModule, JobTaskSpec,
};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob, fanout_key, minutes_to_secs, quoted_spec};
use crate::error::{EngineError, Result};

pub fn canary_workload_name(workload: &str) -> String {
    format!("{}-zadig-canary", workload)
}

pub fn blue_workload_name(target: &BlueGreenTarget) -> String {
    if target.blue_workload_name.is_empty() {
        format!("{}-zadig-blue", target.workload_name)
    } else {
        target.blue_workload_name.clone()
    }
}

pub fn blue_service_name(target: &BlueGreenTarget) -> String {
    if target.blue_k8s_service_name.is_empty() {
        format!("{}-zadig-blue", target.k8s_service_name)
    } else {
        target.blue_k8s_service_name.clone()
    }
}

fn require_cluster(job: &str, cluster_id: &str, namespace: &str) -> Result<()> {
    if cluster_id.is_empty() || namespace.is_empty() {
        return Err(EngineError::validation(format!(
            "job {} needs a cluster and namespace",
            job
        )));
    }
    Ok(())
}

// =============================================================================
// Canary
// =============================================================================

fn canary_tasks<T>(
    inner: &SpecJob<T>,
    deploy: &CanaryDeployJobSpec,
    timeout_minutes: i64,
    wrap: fn(CanaryTaskSpec) -> JobTaskSpec,
) -> Vec<JobTask>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    deploy
        .targets
        .iter()
        .map(|target: &CanaryTarget| {
            let mut task = inner.task(
                format!("{}-{}", target.k8s_service_name, inner.name()),
                fanout_key(inner.name(), &target.k8s_service_name),
                wrap(CanaryTaskSpec {
                    cluster_id: deploy.cluster_id.clone(),
                    namespace: deploy.namespace.clone(),
                    k8s_service_name: target.k8s_service_name.clone(),
                    workload_type: target.workload_type.clone(),
                    workload_name: target.workload_name.clone(),
                    container_name: target.container_name.clone(),
                    canary_workload_name: canary_workload_name(&target.workload_name),
                    canary_percentage: target.canary_percentage,
                    canary_replica: 0,
                    image: target.image.clone(),
                    timeout: minutes_to_secs(timeout_minutes),
                    events: Default::default(),
                }),
            );
            task.job_info
                .insert("k8s_service_name".to_string(), target.k8s_service_name.clone());
            task
        })
        .collect()
}

pub struct CanaryDeployJob {
    inner: SpecJob<CanaryDeployJobSpec>,
}

impl CanaryDeployJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for CanaryDeployJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        require_cluster(self.inner.name(), &spec.cluster_id, &spec.namespace)?;
        if let Some(target) = spec
            .targets
            .iter()
            .find(|t| t.canary_percentage == 0 || t.canary_percentage > 100)
        {
            return Err(EngineError::validation(format!(
                "canary percentage of {} must be within 1..=100",
                target.k8s_service_name
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(canary_tasks(&self.inner, spec, spec.deploy_timeout, JobTaskSpec::CanaryDeploy))
    }
}

pub struct CanaryReleaseJob {
    inner: SpecJob<ReleaseJobSpec>,
}

impl CanaryReleaseJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for CanaryReleaseJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        quoted_spec::<CanaryDeployJobSpec>(
            &ctx.workflow,
            self.inner.name(),
            &self.inner.spec.from_job,
            &[JobType::CanaryDeploy],
        )?;
        Ok(())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let deploy: CanaryDeployJobSpec = quoted_spec(
            &ctx.workflow,
            self.inner.name(),
            &self.inner.spec.from_job,
            &[JobType::CanaryDeploy],
        )?;
        Ok(canary_tasks(
            &self.inner,
            &deploy,
            self.inner.spec.release_timeout,
            JobTaskSpec::CanaryRelease,
        ))
    }
}

// =============================================================================
// Blue-green
// =============================================================================

fn blue_green_tasks<T>(
    inner: &SpecJob<T>,
    deploy: &BlueGreenDeployJobSpec,
    timeout_minutes: i64,
    wrap: fn(BlueGreenTaskSpec) -> JobTaskSpec,
) -> Vec<JobTask>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    deploy
        .targets
        .iter()
        .map(|target| {
            inner.task(
                format!("{}-{}", target.k8s_service_name, inner.name()),
                fanout_key(inner.name(), &target.k8s_service_name),
                wrap(BlueGreenTaskSpec {
                    cluster_id: deploy.cluster_id.clone(),
                    namespace: deploy.namespace.clone(),
                    k8s_service_name: target.k8s_service_name.clone(),
                    blue_k8s_service_name: blue_service_name(target),
                    workload_type: target.workload_type.clone(),
                    workload_name: target.workload_name.clone(),
                    blue_workload_name: blue_workload_name(target),
                    container_name: target.container_name.clone(),
                    image: target.image.clone(),
                    timeout: minutes_to_secs(timeout_minutes),
                    events: Default::default(),
                }),
            )
        })
        .collect()
}

pub struct BlueGreenDeployJob {
    inner: SpecJob<BlueGreenDeployJobSpec>,
}

impl BlueGreenDeployJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for BlueGreenDeployJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        require_cluster(self.inner.name(), &spec.cluster_id, &spec.namespace)
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(blue_green_tasks(
            &self.inner,
            spec,
            spec.deploy_timeout,
            JobTaskSpec::BlueGreenDeploy,
        ))
    }
}

pub struct BlueGreenReleaseJob {
    inner: SpecJob<ReleaseJobSpec>,
}

impl BlueGreenReleaseJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }

    fn quoted(&self, ctx: &JobContext) -> Result<BlueGreenDeployJobSpec> {
        quoted_spec(
            &ctx.workflow,
            self.inner.name(),
            &self.inner.spec.from_job,
            &[JobType::BlueGreenDeploy],
        )
    }
}

#[async_trait]
impl JobConfigurator for BlueGreenReleaseJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        self.quoted(ctx).map(|_| ())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let deploy = self.quoted(ctx)?;
        Ok(blue_green_tasks(
            &self.inner,
            &deploy,
            self.inner.spec.release_timeout,
            JobTaskSpec::BlueGreenRelease,
        ))
    }
}

// =============================================================================
// Blue-green v2 (environment services)
// =============================================================================

async fn blue_green_v2_tasks<T>(
    inner: &SpecJob<T>,
    ctx: &JobContext,
    deploy: &BlueGreenDeployV2JobSpec,
    timeout_minutes: i64,
    wrap: fn(BlueGreenV2TaskSpec) -> JobTaskSpec,
) -> Result<Vec<JobTask>>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Sync,
{
    let env_name = strip_fixed_mark(&deploy.env);
    let env = ctx.catalog.find_env(&ctx.workflow.project, env_name).await?;
    Ok(deploy
        .services
        .iter()
        .map(|service| {
            let mut task = inner.task(
                format!("{}-{}", service.service_name, inner.name()),
                fanout_key(inner.name(), &service.service_name),
                wrap(BlueGreenV2TaskSpec {
                    project: ctx.workflow.project.clone(),
                    env: env.env_name.clone(),
                    production: deploy.production,
                    cluster_id: env.cluster_id.clone(),
                    namespace: env.namespace.clone(),
                    service_name: service.service_name.clone(),
                    modules: service
                        .service_and_images
                        .iter()
                        .map(DeployServiceModule::from)
                        .collect(),
                    timeout: minutes_to_secs(timeout_minutes),
                    events: Default::default(),
                }),
            );
            task.service_modules = service
                .service_and_images
                .iter()
                .map(|m| WorkflowServiceModule::new(&service.service_name, &m.service_module))
                .collect();
            task.job_info
                .insert("env_name".to_string(), env.env_name.clone());
            task
        })
        .collect())
}

pub struct BlueGreenDeployV2Job {
    inner: SpecJob<BlueGreenDeployV2JobSpec>,
}

impl BlueGreenDeployV2Job {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for BlueGreenDeployV2Job {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: BlueGreenDeployV2JobSpec = args.decode_spec()?;
        self.inner.spec.services = args.services;
        Ok(())
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        if strip_fixed_mark(&self.inner.spec.env).is_empty() {
            return Err(EngineError::validation(format!(
                "blue-green job {} has no environment",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        blue_green_v2_tasks(
            &self.inner,
            ctx,
            spec,
            spec.deploy_timeout,
            JobTaskSpec::BlueGreenDeployV2,
        )
        .await
    }
}

pub struct BlueGreenReleaseV2Job {
    inner: SpecJob<ReleaseJobSpec>,
}

impl BlueGreenReleaseV2Job {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }

    fn quoted(&self, ctx: &JobContext) -> Result<BlueGreenDeployV2JobSpec> {
        quoted_spec(
            &ctx.workflow,
            self.inner.name(),
            &self.inner.spec.from_job,
            &[JobType::BlueGreenDeployV2],
        )
    }
}

#[async_trait]
impl JobConfigurator for BlueGreenReleaseV2Job {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        self.quoted(ctx).map(|_| ())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let deploy = self.quoted(ctx)?;
        blue_green_v2_tasks(
            &self.inner,
            ctx,
            &deploy,
            self.inner.spec.release_timeout,
            JobTaskSpec::BlueGreenReleaseV2,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::job_context;
    use conduit_core::domain::workflow::{Stage, Workflow};
    use serde_json::json;

    fn workflow(jobs: Vec<Job>) -> Workflow {
        Workflow {
            name: "rollout".to_string(),
            project: "shop".to_string(),
            stages: jobs
                .into_iter()
                .map(|job| Stage {
                    name: job.name.clone(),
                    parallel: false,
                    approval: None,
                    jobs: vec![job],
                })
                .collect(),
            ..Default::default()
        }
    }

    fn canary_deploy() -> Job {
        Job::new(
            "canary",
            JobType::CanaryDeploy,
            json!({
                "cluster_id": "c1",
                "namespace": "ns",
                "deploy_timeout": 3,
                "targets": [{
                    "k8s_service_name": "web",
                    "workload_type": "Deployment",
                    "workload_name": "web",
                    "container_name": "web",
                    "canary_percentage": 20,
                    "image": "repo/web:v2"
                }]
            }),
        )
    }

    #[tokio::test]
    async fn test_canary_release_follows_deploy() {
        let release = Job::new(
            "release",
            JobType::CanaryRelease,
            json!({"from_job": "canary", "release_timeout": 1}),
        );
        let ctx = job_context(workflow(vec![canary_deploy(), release.clone()]));
        let configurator = CanaryReleaseJob::new(&release).unwrap();
        configurator.lint(&ctx).await.unwrap();

        let tasks = configurator.to_jobs(&ctx, 1).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].key, "release.web");
        let JobTaskSpec::CanaryRelease(spec) = &tasks[0].spec else {
            panic!("expected a canary release task");
        };
        assert_eq!(spec.canary_workload_name, "web-zadig-canary");
        assert_eq!(spec.image, "repo/web:v2");
        assert_eq!(spec.timeout, 60);
    }

    #[tokio::test]
    async fn test_release_before_deploy_is_rejected() {
        let release = Job::new("release", JobType::CanaryRelease, json!({"from_job": "canary"}));
        let ctx = job_context(workflow(vec![release.clone(), canary_deploy()]));
        let err = CanaryReleaseJob::new(&release).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_release_must_quote_matching_kind() {
        let deploy = Job::new("bg", JobType::BlueGreenDeploy, json!({"cluster_id": "c1", "namespace": "ns"}));
        let release = Job::new("release", JobType::CanaryRelease, json!({"from_job": "bg"}));
        let ctx = job_context(workflow(vec![deploy, release.clone()]));
        let err = CanaryReleaseJob::new(&release).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_canary_percentage_bounds() {
        let mut job = canary_deploy();
        job.spec["targets"][0]["canary_percentage"] = json!(0);
        let ctx = job_context(workflow(vec![job.clone()]));
        let err = CanaryDeployJob::new(&job).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_blue_green_default_names() {
        let job = Job::new(
            "bg",
            JobType::BlueGreenDeploy,
            json!({
                "cluster_id": "c1",
                "namespace": "ns",
                "targets": [{"k8s_service_name": "web", "workload_type": "Deployment", "workload_name": "web", "container_name": "web", "image": "x:2"}]
            }),
        );
        let ctx = job_context(workflow(vec![job.clone()]));
        let tasks = BlueGreenDeployJob::new(&job).unwrap().to_jobs(&ctx, 1).await.unwrap();
        let JobTaskSpec::BlueGreenDeploy(spec) = &tasks[0].spec else {
            panic!("expected a blue-green task");
        };
        assert_eq!(spec.blue_workload_name, "web-zadig-blue");
        assert_eq!(spec.blue_k8s_service_name, "web-zadig-blue");
    }

    #[tokio::test]
    async fn test_blue_green_v2_resolves_environment() {
        let job = Job::new(
            "bg2",
            JobType::BlueGreenDeployV2,
            json!({
                "env": "dev",
                "deploy_timeout": 5,
                "services": [{"service_name": "a", "service_and_images": [{"service_module": "web", "image": "repo/a:v3"}]}]
            }),
        );
        let ctx = job_context(workflow(vec![job.clone()]));
        let tasks = BlueGreenDeployV2Job::new(&job).unwrap().to_jobs(&ctx, 1).await.unwrap();
        let JobTaskSpec::BlueGreenDeployV2(spec) = &tasks[0].spec else {
            panic!("expected a blue-green v2 task");
        };
        assert_eq!(spec.namespace, "shop-dev");
        assert_eq!(spec.cluster_id, "c1");
        assert_eq!(spec.modules[0].image, "repo/a:v3");
        assert_eq!(tasks[0].service_modules.len(), 1);
    }
}
