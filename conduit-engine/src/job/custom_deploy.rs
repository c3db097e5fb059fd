//! Custom deploy configurator: set images on arbitrary workloads

use async_trait::async_trait;
use conduit_core::domain::job_spec::{CustomDeployJobSpec, CustomDeployTarget};
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{CustomDeployTaskSpec, JobTaskSpec};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob, fanout_key, minutes_to_secs};
use crate::error::{EngineError, Result};
use crate::infra::kube::WorkloadKind;

pub struct CustomDeployJob {
    inner: SpecJob<CustomDeployJobSpec>,
}

/// Splits `<workloadType>/<workloadName>/<containerName>`
pub fn parse_target(target: &str) -> Option<(WorkloadKind, &str, &str)> {
    let mut parts = target.splitn(3, '/');
    let kind = WorkloadKind::parse(parts.next()?)?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    let container = parts.next().filter(|s| !s.is_empty())?;
    Some((kind, name, container))
}

impl CustomDeployJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }

    fn target_task(&self, target: &CustomDeployTarget) -> Result<JobTask> {
        let spec = &self.inner.spec;
        let (kind, name, container) = parse_target(&target.target).ok_or_else(|| {
            EngineError::validation(format!(
                "custom deploy job {} has an invalid target {}",
                self.inner.name(),
                target.target
            ))
        })?;
        let mut task = self.inner.task(
            format!("{}-{}", container, self.inner.name()),
            fanout_key(self.inner.name(), &target.target.replace('/', "-")),
            JobTaskSpec::CustomDeploy(CustomDeployTaskSpec {
                cluster_id: spec.cluster_id.clone(),
                namespace: spec.namespace.clone(),
                workload_type: kind.to_string(),
                workload_name: name.to_string(),
                container_name: container.to_string(),
                image: target.image.clone(),
                skip_check_run_status: spec.skip_check_run_status,
                replace_resources: Vec::new(),
                timeout: minutes_to_secs(spec.timeout),
            }),
        );
        task.job_info
            .insert("namespace".to_string(), spec.namespace.clone());
        Ok(task)
    }
}

#[async_trait]
impl JobConfigurator for CustomDeployJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    /// Only the target images are user-editable
    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: CustomDeployJobSpec = args.decode_spec()?;
        self.inner.spec.targets = args.targets;
        Ok(())
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        if spec.cluster_id.is_empty() || spec.namespace.is_empty() {
            return Err(EngineError::validation(format!(
                "custom deploy job {} needs a cluster and namespace",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        self.inner
            .spec
            .targets
            .iter()
            .map(|target| self.target_task(target))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::job_context;
    use conduit_core::domain::job_type::JobType;
    use conduit_core::domain::workflow::Workflow;
    use serde_json::json;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("Deployment/web/nginx"),
            Some((WorkloadKind::Deployment, "web", "nginx"))
        );
        assert!(parse_target("DaemonSet/web/nginx").is_none());
        assert!(parse_target("Deployment/web").is_none());
    }

    #[tokio::test]
    async fn test_custom_deploy_fans_out_per_target() {
        let job = Job::new(
            "custom",
            JobType::CustomDeploy,
            json!({
                "cluster_id": "c1",
                "namespace": "ns",
                "timeout": 2,
                "targets": [
                    {"target": "Deployment/web/nginx", "image": "nginx:1.25"},
                    {"target": "StatefulSet/db/mysql", "image": "mysql:8"}
                ]
            }),
        );
        let ctx = job_context(Workflow::default());
        let configurator = CustomDeployJob::new(&job).unwrap();
        configurator.lint(&ctx).await.unwrap();
        let tasks = configurator.to_jobs(&ctx, 1).await.unwrap();

        let keys: Vec<&str> = tasks.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["custom.Deployment-web-nginx", "custom.StatefulSet-db-mysql"]);
        let JobTaskSpec::CustomDeploy(spec) = &tasks[1].spec else {
            panic!("expected a custom deploy task");
        };
        assert_eq!(spec.workload_type, "StatefulSet");
        assert_eq!(spec.timeout, 120);
    }
}
