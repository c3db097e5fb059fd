//! Workload lookups and readiness polling shared by the deploy-family
//! controllers

use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use super::RunContext;
use crate::error::{EngineError, Result};
use crate::infra::kube::{KubeClient, Workload, WorkloadKind};

/// Reads a workload a job depends on
pub async fn require_workload(
    kube: &Arc<dyn KubeClient>,
    namespace: &str,
    kind: WorkloadKind,
    name: &str,
) -> Result<Workload> {
    kube.get_workload(namespace, kind, name)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("{} {}/{} not found", kind, namespace, name)))
}

/// Parses a workload type named in a job
pub fn workload_kind(name: &str) -> Result<WorkloadKind> {
    WorkloadKind::parse(name)
        .ok_or_else(|| EngineError::validation(format!("unsupported workload type {}", name)))
}

/// Polls until every workload has converged
///
/// Cancellation ends the wait within one poll interval. Past the deadline a
/// single diagnostic read of the workloads' pods is attached to the timeout.
pub async fn wait_workloads_ready(
    ctx: &RunContext,
    kube: &Arc<dyn KubeClient>,
    namespace: &str,
    workloads: &[(WorkloadKind, String)],
    timeout_secs: i64,
) -> Result<()> {
    let deadline = ctx.deadline(timeout_secs);
    loop {
        let mut pending = Vec::new();
        for (kind, name) in workloads {
            match kube.get_workload(namespace, *kind, name).await? {
                Some(workload) if workload.ready() => {}
                Some(_) => pending.push((*kind, name.clone())),
                None => {
                    return Err(EngineError::infrastructure(format!(
                        "{} {}/{} disappeared while waiting",
                        kind, namespace, name
                    )));
                }
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        if Instant::now() >= deadline {
            let details = diagnose(kube, namespace, &pending).await;
            let names: Vec<&str> = pending.iter().map(|(_, n)| n.as_str()).collect();
            return Err(EngineError::Timeout(format!(
                "workloads {} not ready in time{}",
                names.join(", "),
                if details.is_empty() {
                    String::new()
                } else {
                    format!(": {}", details.join("; "))
                }
            )));
        }
        debug!("Waiting for {} workload(s) in {}", pending.len(), namespace);
        ctx.sleep().await?;
    }
}

/// Describes the non-ready containers of the pending workloads' pods
async fn diagnose(
    kube: &Arc<dyn KubeClient>,
    namespace: &str,
    pending: &[(WorkloadKind, String)],
) -> Vec<String> {
    let mut details = Vec::new();
    for (kind, name) in pending {
        let Ok(Some(workload)) = kube.get_workload(namespace, *kind, name).await else {
            continue;
        };
        let Ok(pods) = kube.list_pods(namespace, &workload.selector).await else {
            continue;
        };
        for pod in pods.iter().filter(|p| !p.ready()) {
            for container in pod.containers.iter().filter(|c| !c.ready) {
                details.push(format!(
                    "pod {} container {}: Status: {}, Reason: {}, Message: {}",
                    pod.name, container.name, container.state, container.reason, container.message
                ));
            }
        }
    }
    details
}
