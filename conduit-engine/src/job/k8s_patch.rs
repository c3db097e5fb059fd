//! Kubernetes resource patch configurator

use async_trait::async_trait;
use conduit_core::domain::job_spec::K8sPatchJobSpec;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{JobTaskSpec, K8sPatchTaskSpec};
use conduit_core::domain::workflow::Job;

use super::{JobConfigurator, JobContext, SpecJob};
use crate::error::{EngineError, Result};

pub struct K8sPatchJob {
    inner: SpecJob<K8sPatchJobSpec>,
}

impl K8sPatchJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for K8sPatchJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, _ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        if spec.cluster_id.is_empty() || spec.namespace.is_empty() {
            return Err(EngineError::validation(format!(
                "patch job {} needs a cluster and namespace",
                self.inner.name()
            )));
        }
        if let Some(item) = spec
            .patch_items
            .iter()
            .find(|item| item.resource_name.is_empty() || item.resource_kind.is_empty())
        {
            return Err(EngineError::validation(format!(
                "patch job {} has an item without a resource name or kind: {:?}",
                self.inner.name(),
                item.resource_name
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let mut task = self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::K8sPatch(K8sPatchTaskSpec {
                cluster_id: spec.cluster_id.clone(),
                namespace: spec.namespace.clone(),
                patch_items: spec.patch_items.clone(),
            }),
        );
        task.job_info
            .insert("namespace".to_string(), spec.namespace.clone());
        Ok(vec![task])
    }
}
