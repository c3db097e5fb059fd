//! Kubernetes deploy and custom deploy controllers

use async_trait::async_trait;
use conduit_core::domain::job_spec::DeployContent;
use conduit_core::domain::task::{JobTask, Resource};
use conduit_core::domain::task_spec::JobTaskSpec;
use std::collections::BTreeMap;
use tracing::info;

use super::wait::wait_workloads_ready;
use super::{JobController, RunContext, task_spec};
use crate::context::output_key;
use crate::error::{EngineError, Result};
use crate::infra::kube::{Labels, WorkloadKind};
use crate::job::deploy::ENV_NAME_OUTPUT;
use crate::render::{IMAGE_PLACEHOLDER, replace_container_images};

/// Label carrying the project of a platform-managed workload
pub const PRODUCT_LABEL: &str = "s-product";
/// Label carrying the service of a platform-managed workload
pub const SERVICE_LABEL: &str = "s-service";

pub fn service_selector(project: &str, service: &str) -> Labels {
    Labels::from([
        (PRODUCT_LABEL.to_string(), project.to_string()),
        (SERVICE_LABEL.to_string(), service.to_string()),
    ])
}

fn remember(touched: &mut Vec<(WorkloadKind, String)>, kind: WorkloadKind, name: &str) {
    if !touched.iter().any(|(k, n)| *k == kind && n == name) {
        touched.push((kind, name.to_string()));
    }
}

#[derive(Default)]
pub struct DeployController {
    touched: Vec<(WorkloadKind, String)>,
}

#[async_trait]
impl JobController for DeployController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let job_name = job.job_name.clone();
        let spec = task_spec!(job, JobTaskSpec::Deploy);
        let kube = ctx.kube(&spec.cluster_id).await?;
        ctx.task
            .set_global(output_key(&job_name, ENV_NAME_OUTPUT), spec.env.clone());

        for module in spec.service_and_images.iter_mut() {
            module.image = ctx.task.render(&module.image);
        }

        let applies_manifest = spec.system_env
            && !spec.yaml.trim().is_empty()
            && spec
                .deploy_contents
                .iter()
                .any(|c| matches!(c, DeployContent::Vars | DeployContent::Config));

        if applies_manifest {
            let images: BTreeMap<String, String> = if spec.deploy_contents.contains(&DeployContent::Image)
            {
                spec.service_and_images
                    .iter()
                    .map(|m| (m.service_module.clone(), m.image.clone()))
                    .collect()
            } else {
                BTreeMap::new()
            };
            let manifest = ctx
                .task
                .render(&replace_container_images(&spec.yaml, &images)?);
            if manifest.contains(IMAGE_PLACEHOLDER) {
                return Err(EngineError::dependency(format!(
                    "manifest of service {} still has images no job produced",
                    spec.service_name
                )));
            }
            let applied = kube
                .apply_manifest(&spec.namespace, &manifest)
                .await
                .map_err(|e| {
                    EngineError::Infrastructure(e.context(format!(
                        "failed to apply manifest of service {}",
                        spec.service_name
                    )))
                })?;
            for (kind, name) in &applied {
                remember(&mut self.touched, *kind, name);
            }
            spec.yaml = manifest;
            info!(
                "Applied manifest of {} to {} ({} workloads)",
                spec.service_name,
                spec.namespace,
                applied.len()
            );
            return Ok(());
        }

        let workloads = kube
            .list_workloads(
                &spec.namespace,
                &service_selector(&spec.project, &spec.service_name),
            )
            .await?;
        if workloads.is_empty() {
            return Err(EngineError::not_found(format!(
                "no workloads of service {} in namespace {}",
                spec.service_name, spec.namespace
            )));
        }

        spec.replace_resources.clear();
        for module in &spec.service_and_images {
            let mut found = false;
            for workload in &workloads {
                let Some(container) = workload.container(&module.service_module) else {
                    continue;
                };
                found = true;
                spec.replace_resources.push(Resource {
                    name: workload.name.clone(),
                    kind: workload.kind.to_string(),
                    container: container.name.clone(),
                    origin: container.image.clone(),
                });
                kube.set_image(
                    &spec.namespace,
                    workload.kind,
                    &workload.name,
                    &module.service_module,
                    &module.image,
                )
                .await?;
                remember(&mut self.touched, workload.kind, &workload.name);
                info!(
                    "Set {} {}/{} container {} to {}",
                    workload.kind, spec.namespace, workload.name, module.service_module, module.image
                );
            }
            if !found {
                return Err(EngineError::not_found(format!(
                    "container {} of service {} not found in namespace {}",
                    module.service_module, spec.service_name, spec.namespace
                )));
            }
        }
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::Deploy);
        if spec.skip_check_run_status {
            return Ok(());
        }
        let kube = ctx.kube(&spec.cluster_id).await?;
        wait_workloads_ready(ctx, &kube, &spec.namespace, &self.touched, spec.timeout).await
    }
}

#[derive(Default)]
pub struct CustomDeployController {
    target: Option<(WorkloadKind, String)>,
}

#[async_trait]
impl JobController for CustomDeployController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::CustomDeploy);
        let kind = WorkloadKind::parse(&spec.workload_type).ok_or_else(|| {
            EngineError::validation(format!("unsupported workload type {}", spec.workload_type))
        })?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let image = ctx.task.render(&spec.image);

        let workload = kube
            .get_workload(&spec.namespace, kind, &spec.workload_name)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "{} {}/{} not found",
                    kind, spec.namespace, spec.workload_name
                ))
            })?;
        let container = workload.container(&spec.container_name).ok_or_else(|| {
            EngineError::not_found(format!(
                "container {} not found in {}",
                spec.container_name, spec.workload_name
            ))
        })?;
        spec.replace_resources = vec![Resource {
            name: workload.name.clone(),
            kind: kind.to_string(),
            container: container.name.clone(),
            origin: container.image.clone(),
        }];

        kube.set_image(&spec.namespace, kind, &spec.workload_name, &spec.container_name, &image)
            .await?;
        spec.image = image;
        self.target = Some((kind, spec.workload_name.clone()));
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::CustomDeploy);
        if spec.skip_check_run_status {
            return Ok(());
        }
        let Some(target) = self.target.clone() else {
            return Ok(());
        };
        let kube = ctx.kube(&spec.cluster_id).await?;
        wait_workloads_ready(ctx, &kube, &spec.namespace, &[target], spec.timeout).await
    }
}
