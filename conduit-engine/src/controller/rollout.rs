//! Canary and blue-green controllers
//!
//! Canary and blue-green v1 jobs target one named workload. Blue-green v2
//! jobs target every workload of a platform service and clone them with a
//! fixed suffix.

use async_trait::async_trait;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{BlueGreenV2TaskSpec, JobTaskSpec};
use std::sync::Arc;
use tracing::{info, warn};

use super::deploy::service_selector;
use super::wait::{require_workload, wait_workloads_ready, workload_kind};
use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};
use crate::infra::kube::{K8sService, KubeClient, Workload, WorkloadKind};
use crate::job::gray::gray_replicas;

/// Label that separates blue pods from the live ones
pub const VERSION_LABEL: &str = "zadig-version";
pub const BLUE_VERSION: &str = "blue";

fn blue_v2_name(workload: &str) -> String {
    format!("{}-zadig-blue", workload)
}

fn is_blue(workload: &Workload) -> bool {
    workload.labels.get(VERSION_LABEL).map(String::as_str) == Some(BLUE_VERSION)
}

/// Marks a clone so that only a blue selector reaches its pods
fn paint_blue(workload: &mut Workload) {
    workload
        .labels
        .insert(VERSION_LABEL.to_string(), BLUE_VERSION.to_string());
    workload
        .selector
        .insert(VERSION_LABEL.to_string(), BLUE_VERSION.to_string());
}

fn set_container_image(workload: &mut Workload, container: &str, image: &str) -> Result<()> {
    if workload.set_image(container, image) {
        Ok(())
    } else {
        Err(EngineError::not_found(format!(
            "container {} not found in {}",
            container, workload.name
        )))
    }
}

async fn delete_quietly(kube: &Arc<dyn KubeClient>, namespace: &str, kind: WorkloadKind, name: &str) {
    if let Err(e) = kube.delete_workload(namespace, kind, name).await {
        warn!("Failed to delete {} {}/{}: {:#}", kind, namespace, name, e);
    }
}

// =============================================================================
// Canary
// =============================================================================

pub struct CanaryDeployController;

#[async_trait]
impl JobController for CanaryDeployController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::CanaryDeploy);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let image = ctx.task.render(&spec.image);

        let primary = require_workload(&kube, &spec.namespace, kind, &spec.workload_name).await?;
        let replicas = gray_replicas(primary.replicas, spec.canary_percentage);
        let mut canary = primary.clone_as(&spec.canary_workload_name);
        canary.replicas = replicas;
        set_container_image(&mut canary, &spec.container_name, &image)?;
        kube.apply_workload(&canary).await?;

        spec.image = image;
        spec.canary_replica = replicas;
        spec.events.info(format!(
            "created canary workload {} with {} replica(s) of {}",
            canary.name, replicas, spec.image
        ));
        info!(
            "Canary {} of {} started with {} replica(s)",
            canary.name, spec.workload_name, replicas
        );
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::CanaryDeploy);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let target = [(kind, spec.canary_workload_name.clone())];
        let result = wait_workloads_ready(ctx, &kube, &spec.namespace, &target, spec.timeout).await;
        match &result {
            Ok(()) => spec.events.info("canary workload is ready"),
            Err(e) => spec.events.error(format!("canary workload not ready: {}", e)),
        }
        result
    }

    async fn clean(&mut self, ctx: &RunContext, job: &mut JobTask) {
        let JobTaskSpec::CanaryDeploy(spec) = &mut job.spec else {
            return;
        };
        let (Ok(kind), Ok(kube)) = (workload_kind(&spec.workload_type), ctx.kube(&spec.cluster_id).await) else {
            return;
        };
        delete_quietly(&kube, &spec.namespace, kind, &spec.canary_workload_name).await;
        spec.events.info("removed canary workload");
    }
}

pub struct CanaryReleaseController;

#[async_trait]
impl JobController for CanaryReleaseController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::CanaryRelease);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let image = ctx.task.render(&spec.image);

        require_workload(&kube, &spec.namespace, kind, &spec.workload_name).await?;
        kube.set_image(&spec.namespace, kind, &spec.workload_name, &spec.container_name, &image)
            .await?;
        spec.image = image;
        spec.events
            .info(format!("updated {} to {}", spec.workload_name, spec.image));
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::CanaryRelease);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let target = [(kind, spec.workload_name.clone())];
        wait_workloads_ready(ctx, &kube, &spec.namespace, &target, spec.timeout).await?;

        kube.delete_workload(&spec.namespace, kind, &spec.canary_workload_name)
            .await?;
        spec.events.info(format!(
            "released {} and removed canary {}",
            spec.workload_name, spec.canary_workload_name
        ));
        Ok(())
    }
}

// =============================================================================
// Blue-green
// =============================================================================

pub struct BlueGreenDeployController;

#[async_trait]
impl JobController for BlueGreenDeployController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenDeploy);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let image = ctx.task.render(&spec.image);

        let service = kube
            .get_service(&spec.namespace, &spec.k8s_service_name)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "service {}/{} not found",
                    spec.namespace, spec.k8s_service_name
                ))
            })?;
        let primary = require_workload(&kube, &spec.namespace, kind, &spec.workload_name).await?;

        let mut blue = primary.clone_as(&spec.blue_workload_name);
        paint_blue(&mut blue);
        set_container_image(&mut blue, &spec.container_name, &image)?;
        kube.apply_workload(&blue).await?;
        spec.events
            .info(format!("created blue workload {} with {}", blue.name, image));

        let mut blue_service = K8sService {
            name: spec.blue_k8s_service_name.clone(),
            namespace: spec.namespace.clone(),
            labels: service.labels.clone(),
            selector: service.selector.clone(),
        };
        blue_service
            .selector
            .insert(VERSION_LABEL.to_string(), BLUE_VERSION.to_string());
        kube.apply_service(&blue_service).await?;
        spec.events
            .info(format!("created blue service {}", blue_service.name));

        spec.image = image;
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenDeploy);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let target = [(kind, spec.blue_workload_name.clone())];
        wait_workloads_ready(ctx, &kube, &spec.namespace, &target, spec.timeout).await?;
        spec.events.info("blue workload is ready");
        Ok(())
    }

    async fn clean(&mut self, ctx: &RunContext, job: &mut JobTask) {
        let JobTaskSpec::BlueGreenDeploy(spec) = &mut job.spec else {
            return;
        };
        let (Ok(kind), Ok(kube)) = (workload_kind(&spec.workload_type), ctx.kube(&spec.cluster_id).await) else {
            return;
        };
        delete_quietly(&kube, &spec.namespace, kind, &spec.blue_workload_name).await;
        if let Err(e) = kube
            .delete_service(&spec.namespace, &spec.blue_k8s_service_name)
            .await
        {
            warn!("Failed to delete blue service {}: {:#}", spec.blue_k8s_service_name, e);
        }
        spec.events.info("removed blue workload and service");
    }
}

/// Sends traffic to the blue pods, updates the primary, then switches back
pub struct BlueGreenReleaseController;

#[async_trait]
impl JobController for BlueGreenReleaseController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenRelease);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let image = ctx.task.render(&spec.image);

        let mut service = kube
            .get_service(&spec.namespace, &spec.k8s_service_name)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "service {}/{} not found",
                    spec.namespace, spec.k8s_service_name
                ))
            })?;
        require_workload(&kube, &spec.namespace, kind, &spec.blue_workload_name).await?;

        service
            .selector
            .insert(VERSION_LABEL.to_string(), BLUE_VERSION.to_string());
        kube.apply_service(&service).await?;
        spec.events
            .info(format!("switched {} to blue pods", spec.k8s_service_name));

        kube.set_image(&spec.namespace, kind, &spec.workload_name, &spec.container_name, &image)
            .await?;
        spec.image = image;
        spec.events
            .info(format!("updated {} to {}", spec.workload_name, spec.image));
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenRelease);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let target = [(kind, spec.workload_name.clone())];
        wait_workloads_ready(ctx, &kube, &spec.namespace, &target, spec.timeout).await?;

        restore_selector(&kube, &spec.namespace, &spec.k8s_service_name).await?;
        kube.delete_workload(&spec.namespace, kind, &spec.blue_workload_name)
            .await?;
        kube.delete_service(&spec.namespace, &spec.blue_k8s_service_name)
            .await?;
        spec.events.info(format!(
            "switched {} back to {} and removed blue resources",
            spec.k8s_service_name, spec.workload_name
        ));
        Ok(())
    }

    async fn clean(&mut self, _ctx: &RunContext, job: &mut JobTask) {
        // blue pods keep serving until the primary is healthy again
        if let JobTaskSpec::BlueGreenRelease(spec) = &mut job.spec {
            spec.events.error(format!(
                "release stopped, {} still routes to blue pods",
                spec.k8s_service_name
            ));
        }
    }
}

async fn restore_selector(kube: &Arc<dyn KubeClient>, namespace: &str, name: &str) -> Result<()> {
    let Some(mut service) = kube.get_service(namespace, name).await? else {
        return Err(EngineError::not_found(format!("service {}/{} not found", namespace, name)));
    };
    service.selector.remove(VERSION_LABEL);
    kube.apply_service(&service).await?;
    Ok(())
}

/// Primary workloads of a service paired with the modules they run
async fn service_workloads(
    kube: &Arc<dyn KubeClient>,
    spec: &BlueGreenV2TaskSpec,
) -> Result<Vec<Workload>> {
    let workloads: Vec<Workload> = kube
        .list_workloads(
            &spec.namespace,
            &service_selector(&spec.project, &spec.service_name),
        )
        .await?
        .into_iter()
        .filter(|w| !is_blue(w))
        .filter(|w| spec.modules.iter().any(|m| w.container(&m.service_module).is_some()))
        .collect();
    if workloads.is_empty() {
        return Err(EngineError::not_found(format!(
            "no workloads of service {} in namespace {}",
            spec.service_name, spec.namespace
        )));
    }
    Ok(workloads)
}

#[derive(Default)]
pub struct BlueGreenDeployV2Controller {
    blues: Vec<(WorkloadKind, String)>,
}

#[async_trait]
impl JobController for BlueGreenDeployV2Controller {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenDeployV2);
        let kube = ctx.kube(&spec.cluster_id).await?;
        for module in spec.modules.iter_mut() {
            module.image = ctx.task.render(&module.image);
        }

        for workload in service_workloads(&kube, spec).await? {
            let mut blue = workload.clone_as(&blue_v2_name(&workload.name));
            paint_blue(&mut blue);
            for module in &spec.modules {
                blue.set_image(&module.service_module, &module.image);
            }
            kube.apply_workload(&blue).await?;
            spec.events.info(format!("created blue workload {}", blue.name));
            self.blues.push((blue.kind, blue.name));
        }
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenDeployV2);
        let kube = ctx.kube(&spec.cluster_id).await?;
        wait_workloads_ready(ctx, &kube, &spec.namespace, &self.blues, spec.timeout).await?;
        spec.events.info("blue workloads are ready");
        Ok(())
    }

    async fn clean(&mut self, ctx: &RunContext, job: &mut JobTask) {
        let JobTaskSpec::BlueGreenDeployV2(spec) = &mut job.spec else {
            return;
        };
        let Ok(kube) = ctx.kube(&spec.cluster_id).await else {
            return;
        };
        for (kind, name) in self.blues.drain(..) {
            delete_quietly(&kube, &spec.namespace, kind, &name).await;
        }
        spec.events.info("removed blue workloads");
    }
}

#[derive(Default)]
pub struct BlueGreenReleaseV2Controller {
    primaries: Vec<(WorkloadKind, String)>,
}

#[async_trait]
impl JobController for BlueGreenReleaseV2Controller {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenReleaseV2);
        let kube = ctx.kube(&spec.cluster_id).await?;
        for module in spec.modules.iter_mut() {
            module.image = ctx.task.render(&module.image);
        }

        for workload in service_workloads(&kube, spec).await? {
            for module in &spec.modules {
                if workload.container(&module.service_module).is_none() {
                    continue;
                }
                kube.set_image(
                    &spec.namespace,
                    workload.kind,
                    &workload.name,
                    &module.service_module,
                    &module.image,
                )
                .await?;
            }
            spec.events.info(format!("updated {}", workload.name));
            self.primaries.push((workload.kind, workload.name));
        }
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::BlueGreenReleaseV2);
        let kube = ctx.kube(&spec.cluster_id).await?;
        wait_workloads_ready(ctx, &kube, &spec.namespace, &self.primaries, spec.timeout).await?;

        for (kind, name) in &self.primaries {
            kube.delete_workload(&spec.namespace, *kind, &blue_v2_name(name))
                .await?;
        }
        spec.events.info("released service and removed blue workloads");
        Ok(())
    }
}
