//! Istio weighted release and rollback controllers

use async_trait::async_trait;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{IstioTaskSpec, JobTaskSpec};
use std::sync::Arc;
use tracing::info;

use super::wait::{require_workload, wait_workloads_ready};
use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};
use crate::infra::kube::{
    DestinationRule, KubeClient, Labels, RouteDestination, Subset, VirtualService, WorkloadKind,
};
use crate::job::gray::gray_replicas;

/// Pod label telling the two subsets apart
pub const SUBSET_LABEL: &str = "zadig-istio-release-version";
pub const ORIGINAL_SUBSET: &str = "original";
pub const NEW_SUBSET: &str = "new";

pub fn new_workload_name(workload: &str) -> String {
    format!("{}-zadig-new", workload)
}

pub fn destination_rule_name(workload: &str) -> String {
    format!("{}-zadig", workload)
}

fn virtual_service_name(spec: &IstioTaskSpec) -> &str {
    if spec.target.virtual_service_name.is_empty() {
        &spec.target.workload_name
    } else {
        &spec.target.virtual_service_name
    }
}

fn subset_labels(base: &Labels, subset: &str) -> Labels {
    let mut labels = base.clone();
    labels.insert(SUBSET_LABEL.to_string(), subset.to_string());
    labels
}

fn weighted_routes(host: &str, weight: u32) -> Vec<RouteDestination> {
    vec![
        RouteDestination {
            host: host.to_string(),
            subset: ORIGINAL_SUBSET.to_string(),
            weight: 100 - weight.min(100),
        },
        RouteDestination {
            host: host.to_string(),
            subset: NEW_SUBSET.to_string(),
            weight: weight.min(100),
        },
    ]
}

async fn route(kube: &Arc<dyn KubeClient>, spec: &IstioTaskSpec, routes: Vec<RouteDestination>) -> Result<()> {
    let service = VirtualService {
        name: virtual_service_name(spec).to_string(),
        namespace: spec.namespace.clone(),
        hosts: vec![spec.target.host.clone()],
        routes,
    };
    kube.apply_virtual_service(&service).await?;
    Ok(())
}

/// Sends all traffic back to the host, drops the subsets and the new pods
async fn restore(kube: &Arc<dyn KubeClient>, spec: &IstioTaskSpec) -> Result<()> {
    let target = &spec.target;
    route(
        kube,
        spec,
        vec![RouteDestination {
            host: target.host.clone(),
            subset: String::new(),
            weight: 100,
        }],
    )
    .await?;
    kube.delete_destination_rule(&spec.namespace, &destination_rule_name(&target.workload_name))
        .await?;
    kube.delete_workload(
        &spec.namespace,
        WorkloadKind::Deployment,
        &new_workload_name(&target.workload_name),
    )
    .await?;
    Ok(())
}

pub struct IstioReleaseController;

impl IstioReleaseController {
    async fn start(&self, kube: &Arc<dyn KubeClient>, spec: &mut IstioTaskSpec) -> Result<()> {
        let target = spec.target.clone();
        let ns = spec.namespace.clone();
        let mut primary =
            require_workload(kube, &ns, WorkloadKind::Deployment, &target.workload_name).await?;
        let base_selector = primary.selector.clone();

        let total = if target.target_replica > 0 { target.target_replica } else { primary.replicas };
        let replicas = gray_replicas(total, spec.replica_percentage);
        let mut fresh = primary.clone_as(&new_workload_name(&target.workload_name));
        fresh.replicas = replicas;
        fresh.selector = subset_labels(&base_selector, NEW_SUBSET);
        if !fresh.set_image(&target.container_name, &target.image) {
            return Err(EngineError::not_found(format!(
                "container {} not found in {}",
                target.container_name, target.workload_name
            )));
        }

        primary.selector = subset_labels(&base_selector, ORIGINAL_SUBSET);
        kube.apply_workload(&primary).await?;
        kube.apply_workload(&fresh).await?;

        let rule = DestinationRule {
            name: destination_rule_name(&target.workload_name),
            namespace: ns.clone(),
            host: target.host.clone(),
            subsets: vec![
                Subset {
                    name: ORIGINAL_SUBSET.to_string(),
                    labels: subset_labels(&base_selector, ORIGINAL_SUBSET),
                },
                Subset {
                    name: NEW_SUBSET.to_string(),
                    labels: subset_labels(&base_selector, NEW_SUBSET),
                },
            ],
        };
        kube.apply_destination_rule(&rule).await?;
        route(kube, spec, weighted_routes(&target.host, spec.weight)).await?;

        spec.replicas = replicas;
        spec.events.info(format!(
            "created {} with {} replica(s), {}% of traffic",
            fresh.name, replicas, spec.weight
        ));
        Ok(())
    }

    async fn promote(&self, kube: &Arc<dyn KubeClient>, spec: &mut IstioTaskSpec) -> Result<()> {
        let target = spec.target.clone();
        route(kube, spec, weighted_routes(&target.host, 100)).await?;

        let mut primary = require_workload(
            kube,
            &spec.namespace,
            WorkloadKind::Deployment,
            &target.workload_name,
        )
        .await?;
        if !primary.set_image(&target.container_name, &target.image) {
            return Err(EngineError::not_found(format!(
                "container {} not found in {}",
                target.container_name, target.workload_name
            )));
        }
        primary.selector.remove(SUBSET_LABEL);
        kube.apply_workload(&primary).await?;
        spec.events
            .info(format!("updated {} to {}", target.workload_name, target.image));
        Ok(())
    }
}

#[async_trait]
impl JobController for IstioReleaseController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::IstioRelease);
        let kube = ctx.kube(&spec.cluster_id).await?;
        spec.target.image = ctx.task.render(&spec.target.image);

        if spec.first {
            return self.start(&kube, spec).await;
        }
        require_workload(
            &kube,
            &spec.namespace,
            WorkloadKind::Deployment,
            &new_workload_name(&spec.target.workload_name),
        )
        .await?;
        if spec.weight >= 100 {
            return self.promote(&kube, spec).await;
        }
        route(&kube, spec, weighted_routes(&spec.target.host, spec.weight)).await?;
        spec.events
            .info(format!("shifted {}% of traffic to the new subset", spec.weight));
        info!("Istio release of {} at {}%", spec.target.workload_name, spec.weight);
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::IstioRelease);
        let kube = ctx.kube(&spec.cluster_id).await?;
        let workload = spec.target.workload_name.clone();
        if spec.first {
            let targets = [
                (WorkloadKind::Deployment, workload.clone()),
                (WorkloadKind::Deployment, new_workload_name(&workload)),
            ];
            return wait_workloads_ready(ctx, &kube, &spec.namespace, &targets, spec.timeout).await;
        }
        if spec.weight >= 100 {
            let targets = [(WorkloadKind::Deployment, workload)];
            wait_workloads_ready(ctx, &kube, &spec.namespace, &targets, spec.timeout).await?;
            restore(&kube, spec).await?;
            spec.events.info("release finished, subsets removed");
        }
        Ok(())
    }
}

pub struct IstioRollbackController;

#[async_trait]
impl JobController for IstioRollbackController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::IstioRollback);
        let kube = ctx.kube(&spec.cluster_id).await?;
        let workload = spec.target.workload_name.clone();

        restore(&kube, spec).await?;
        let mut primary =
            require_workload(&kube, &spec.namespace, WorkloadKind::Deployment, &workload).await?;
        if primary.selector.remove(SUBSET_LABEL).is_some() {
            kube.apply_workload(&primary).await?;
        }
        spec.events
            .info(format!("rolled back {} to its original pods", workload));
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::IstioRollback);
        let kube = ctx.kube(&spec.cluster_id).await?;
        let targets = [(WorkloadKind::Deployment, spec.target.workload_name.clone())];
        wait_workloads_ready(ctx, &kube, &spec.namespace, &targets, spec.timeout).await
    }
}
