//! MSE gray release and offline controllers
//!
//! A gray release clones every base workload of a service under a tagged
//! name. The tag label on labels and selector keeps gray pods apart from
//! base pods; MSE routes tagged traffic to them.

use async_trait::async_trait;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use std::sync::Arc;
use tracing::{info, warn};

use super::deploy::service_selector;
use super::wait::wait_workloads_ready;
use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};
use crate::infra::kube::{KubeClient, WorkloadKind};
use crate::job::mse::{MSE_TAG_LABEL, mse_workload_name};

#[derive(Default)]
pub struct MseGrayReleaseController {
    kube: Option<Arc<dyn KubeClient>>,
    created: Vec<(WorkloadKind, String)>,
}

#[async_trait]
impl JobController for MseGrayReleaseController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::MseGrayRelease);
        let kube = ctx.kube(&spec.cluster_id).await?;
        self.kube = Some(kube.clone());

        let base: Vec<_> = kube
            .list_workloads(&spec.namespace, &service_selector(&spec.project, &spec.service_name))
            .await?
            .into_iter()
            .filter(|w| !w.labels.contains_key(MSE_TAG_LABEL))
            .collect();
        if base.is_empty() {
            return Err(EngineError::not_found(format!(
                "service {} has no workloads in {}",
                spec.service_name, spec.base_env
            )));
        }

        for workload in base {
            let name = mse_workload_name(&workload.name, &spec.gray_tag);
            let mut gray = workload.clone_as(&name);
            gray.labels.insert(MSE_TAG_LABEL.to_string(), spec.gray_tag.clone());
            gray.selector.insert(MSE_TAG_LABEL.to_string(), spec.gray_tag.clone());
            gray.replicas = spec.replicas.max(1);
            for module in spec.modules.iter() {
                if !gray.set_image(&module.service_module, &module.image) {
                    return Err(EngineError::not_found(format!(
                        "container {} not found in {} {}",
                        module.service_module, workload.kind, workload.name
                    )));
                }
            }

            kube.apply_workload(&gray).await?;
            info!("Created gray workload {}/{} with tag {}", spec.namespace, name, spec.gray_tag);
            spec.events.info(format!("gray workload {} created from {}", name, workload.name));
            self.created.push((gray.kind, name));
        }
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::MseGrayRelease);
        if spec.skip_check_run_status {
            return Ok(());
        }
        let Some(kube) = &self.kube else {
            return Ok(());
        };
        wait_workloads_ready(ctx, kube, &spec.namespace, &self.created, spec.timeout).await?;
        spec.events.info(format!("{} gray workload(s) ready", self.created.len()));
        Ok(())
    }

    async fn clean(&mut self, _ctx: &RunContext, job: &mut JobTask) {
        let JobTaskSpec::MseGrayRelease(spec) = &mut job.spec else {
            return;
        };
        let Some(kube) = &self.kube else {
            return;
        };
        for (kind, name) in self.created.drain(..) {
            match kube.delete_workload(&spec.namespace, kind, &name).await {
                Ok(()) => spec.events.info(format!("gray workload {} removed", name)),
                Err(e) => {
                    warn!("Failed to remove gray workload {}: {:#}", name, e);
                    spec.events.error(format!("failed to remove gray workload {}: {:#}", name, e));
                }
            }
        }
    }
}

/// Removes every workload carrying a gray tag for the listed services
pub struct MseGrayOfflineController;

#[async_trait]
impl JobController for MseGrayOfflineController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::MseGrayOffline);
        let kube = ctx.kube(&spec.cluster_id).await?;

        let mut failed = Vec::new();
        for service in spec.services.iter() {
            let mut selector = service_selector(&spec.project, service);
            selector.insert(MSE_TAG_LABEL.to_string(), spec.gray_tag.clone());
            match kube.delete_labelled(&spec.namespace, &selector).await {
                Ok(()) => spec
                    .events
                    .info(format!("gray workloads of {} with tag {} removed", service, spec.gray_tag)),
                Err(e) => {
                    spec.events.error(format!("failed to remove gray workloads of {}: {:#}", service, e));
                    failed.push(service.as_str());
                }
            }
        }
        if !failed.is_empty() {
            return Err(EngineError::infrastructure(format!(
                "failed to take gray services offline: {}",
                failed.join(", ")
            )));
        }
        Ok(())
    }
}
