//! Istio weighted release and rollback configurators

use async_trait::async_trait;
use conduit_core::domain::job_spec::{IstioReleaseJobSpec, IstioRollbackJobSpec};
use conduit_core::domain::job_type::JobType;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{IstioTaskSpec, JobTaskSpec};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob, fanout_key, minutes_to_secs, quoted_spec};
use crate::error::{EngineError, Result};

pub struct IstioReleaseJob {
    inner: SpecJob<IstioReleaseJobSpec>,
}

impl IstioReleaseJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }

    fn first_spec(&self, ctx: &JobContext) -> Result<IstioReleaseJobSpec> {
        if self.inner.spec.first {
            return Ok(self.inner.spec.clone());
        }
        let first: IstioReleaseJobSpec = quoted_spec(
            &ctx.workflow,
            self.inner.name(),
            &self.inner.spec.from_job,
            &[JobType::IstioRelease],
        )?;
        if !first.first {
            return Err(EngineError::configuration(format!(
                "istio job {} must quote the first istio release job, {} is not",
                self.inner.name(),
                self.inner.spec.from_job
            )));
        }
        Ok(first)
    }
}

#[async_trait]
impl JobConfigurator for IstioReleaseJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        if spec.weight > 100 {
            return Err(EngineError::validation(format!(
                "istio job {} has a weight above 100",
                self.inner.name()
            )));
        }
        if spec.first && (spec.replica_percentage == 0 || spec.replica_percentage > 100) {
            return Err(EngineError::validation(format!(
                "replica percentage of istio job {} must be within 1..=100",
                self.inner.name()
            )));
        }
        self.first_spec(ctx).map(|_| ())
    }

    async fn to_jobs(&self, ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let first = self.first_spec(ctx)?;
        let spec = &self.inner.spec;
        Ok(first
            .targets
            .iter()
            .map(|target| {
                self.inner.task(
                    format!("{}-{}", target.workload_name, self.inner.name()),
                    fanout_key(self.inner.name(), &target.workload_name),
                    JobTaskSpec::IstioRelease(IstioTaskSpec {
                        first: spec.first,
                        cluster_id: first.cluster_id.clone(),
                        namespace: first.namespace.clone(),
                        weight: spec.weight,
                        replica_percentage: first.replica_percentage,
                        replicas: 0,
                        target: target.clone(),
                        timeout: minutes_to_secs(spec.timeout),
                        events: Default::default(),
                    }),
                )
            })
            .collect())
    }
}

pub struct IstioRollbackJob {
    inner: SpecJob<IstioRollbackJobSpec>,
}

impl IstioRollbackJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for IstioRollbackJob {
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
                    JobTaskSpec::IstioRollback(IstioTaskSpec {
                        cluster_id: spec.cluster_id.clone(),
                        namespace: spec.namespace.clone(),
                        target: target.clone(),
                        timeout: minutes_to_secs(spec.timeout),
                        ..Default::default()
                    }),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::job_context;
    use conduit_core::domain::workflow::{Stage, Workflow};
    use serde_json::json;

    #[tokio::test]
    async fn test_later_istio_job_shifts_weight_only() {
        let first = Job::new(
            "istio-10",
            JobType::IstioRelease,
            json!({
                "first": true,
                "cluster_id": "c1",
                "namespace": "ns",
                "replica_percentage": 50,
                "weight": 10,
                "targets": [{"workload_name": "web", "container_name": "web", "virtual_service_name": "web", "host": "web", "image": "repo/web:v2"}]
            }),
        );
        let second = Job::new("istio-100", JobType::IstioRelease, json!({"from_job": "istio-10", "weight": 100}));
        let workflow = Workflow {
            stages: vec![
                Stage {
                    name: "a".to_string(),
                    jobs: vec![first],
                    ..Default::default()
                },
                Stage {
                    name: "b".to_string(),
                    jobs: vec![second.clone()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let ctx = job_context(workflow);
        let configurator = IstioReleaseJob::new(&second).unwrap();
        configurator.lint(&ctx).await.unwrap();
        let tasks = configurator.to_jobs(&ctx, 1).await.unwrap();

        let JobTaskSpec::IstioRelease(spec) = &tasks[0].spec else {
            panic!("expected an istio task");
        };
        assert!(!spec.first);
        assert_eq!(spec.weight, 100);
        assert_eq!(spec.namespace, "ns");
        assert_eq!(spec.target.image, "repo/web:v2");
        assert_eq!(tasks[0].key, "istio-100.web");
    }
}
