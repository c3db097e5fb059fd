//! Workflow-trigger and offline-service controllers

use async_trait::async_trait;
use conduit_core::domain::status::Status;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{ItemResult, JobTaskSpec};
use tracing::{debug, info, warn};

use super::deploy::service_selector;
use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};

/// Starts other workflows and optionally waits for them
pub struct WorkflowTriggerController;

#[async_trait]
impl JobController for WorkflowTriggerController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let launcher = ctx.infra.launcher()?;
        let spec = task_spec!(job, JobTaskSpec::WorkflowTrigger);

        for target in spec.workflows.iter_mut() {
            for param in target.params.iter_mut() {
                param.value = ctx.task.render(&param.value);
            }
            let task_id = launcher
                .launch(&target.workflow_name, &target.params, &ctx.task.creator)
                .await
                .map_err(|e| {
                    EngineError::infrastructure(format!(
                        "failed to start workflow {}: {:#}",
                        target.workflow_name, e
                    ))
                })?;
            target.task_id = task_id;
            target.status = Status::Created;
            info!("Started workflow {} task {}", target.workflow_name, task_id);
        }
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let launcher = ctx.infra.launcher()?;
        let spec = task_spec!(job, JobTaskSpec::WorkflowTrigger);
        if !spec.is_enable_check {
            return Ok(());
        }

        loop {
            let mut pending = 0;
            for target in spec.workflows.iter_mut().filter(|t| !t.status.is_terminal()) {
                target.status = launcher
                    .task_status(&target.workflow_name, target.task_id)
                    .await
                    .map_err(EngineError::infrastructure)?;
                if !target.status.is_terminal() {
                    pending += 1;
                }
            }
            if pending == 0 {
                break;
            }
            debug!("Waiting for {} triggered workflow(s)", pending);
            ctx.sleep().await?;
        }

        let failed: Vec<String> = spec
            .workflows
            .iter()
            .filter(|t| t.status != Status::Passed)
            .map(|t| format!("{} #{} {}", t.workflow_name, t.task_id, t.status))
            .collect();
        if !failed.is_empty() {
            return Err(EngineError::infrastructure(format!(
                "triggered workflow(s) did not pass: {}",
                failed.join(", ")
            )));
        }
        Ok(())
    }
}

/// Removes services' workloads from an environment
pub struct OfflineServiceController;

#[async_trait]
impl JobController for OfflineServiceController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::OfflineService);
        let kube = ctx.kube(&spec.cluster_id).await?;

        spec.results.clear();
        for service in spec.services.iter() {
            let selector = service_selector(&spec.project, service);
            match kube.delete_labelled(&spec.namespace, &selector).await {
                Ok(()) => {
                    info!("Took service {} offline in {}", service, spec.env);
                    spec.results.push(ItemResult::passed(service));
                }
                Err(e) => {
                    warn!("Failed to take service {} offline: {:#}", service, e);
                    spec.results.push(ItemResult::failed(service, format!("{:#}", e)));
                }
            }
        }

        let failed = spec.results.iter().filter(|r| r.status.is_failure()).count();
        if failed > 0 {
            return Err(EngineError::infrastructure(format!(
                "{} of {} service(s) could not be taken offline",
                failed,
                spec.results.len()
            )));
        }
        Ok(())
    }
}
