//! Gray release and rollback controllers
//!
//! The first gray job records what it is about to change as annotations on
//! the primary workload. Later jobs and rollbacks read them back, so a
//! rollback needs nothing from the release task that preceded it.

use async_trait::async_trait;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use std::sync::Arc;
use tracing::info;

use super::wait::{require_workload, wait_workloads_ready, workload_kind};
use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};
use crate::infra::kube::{KubeClient, Workload, WorkloadKind};
use crate::job::gray::gray_replicas;

pub const GRAY_ORIGIN_IMAGE: &str = "conduit/gray-origin-image";
pub const GRAY_ORIGIN_CONTAINER: &str = "conduit/gray-origin-container";
pub const GRAY_ORIGIN_REPLICAS: &str = "conduit/gray-origin-replicas";

/// Image, container and replica count saved by the first gray job
#[derive(Debug, Clone, PartialEq)]
struct GrayOrigin {
    image: String,
    container: String,
    replicas: i32,
}

impl GrayOrigin {
    fn read(workload: &Workload) -> Option<Self> {
        let get = |key: &str| workload.annotations.get(key);
        Some(Self {
            image: get(GRAY_ORIGIN_IMAGE)?.clone(),
            container: get(GRAY_ORIGIN_CONTAINER)?.clone(),
            replicas: get(GRAY_ORIGIN_REPLICAS)?.parse().ok()?,
        })
    }

    fn write(&self, workload: &mut Workload) {
        let annotations = &mut workload.annotations;
        annotations.insert(GRAY_ORIGIN_IMAGE.to_string(), self.image.clone());
        annotations.insert(GRAY_ORIGIN_CONTAINER.to_string(), self.container.clone());
        annotations.insert(GRAY_ORIGIN_REPLICAS.to_string(), self.replicas.to_string());
    }
}

async fn clear_origin(
    kube: &Arc<dyn KubeClient>,
    namespace: &str,
    kind: WorkloadKind,
    name: &str,
) -> Result<()> {
    let mut workload = require_workload(kube, namespace, kind, name).await?;
    for key in [GRAY_ORIGIN_IMAGE, GRAY_ORIGIN_CONTAINER, GRAY_ORIGIN_REPLICAS] {
        workload.annotations.remove(key);
    }
    kube.apply_workload(&workload).await?;
    Ok(())
}

pub struct GrayReleaseController;

#[async_trait]
impl JobController for GrayReleaseController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::GrayRelease);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        spec.image = ctx.task.render(&spec.image);
        let ns = spec.namespace.clone();

        let mut primary = require_workload(&kube, &ns, kind, &spec.workload_name).await?;
        let origin = GrayOrigin::read(&primary);

        if spec.gray_scale >= 100 {
            let replicas = origin
                .map(|o| o.replicas)
                .filter(|r| *r > 0)
                .unwrap_or(if spec.total_replica > 0 { spec.total_replica } else { primary.replicas });
            kube.set_image(&ns, kind, &spec.workload_name, &spec.container_name, &spec.image)
                .await?;
            kube.scale(&ns, kind, &spec.workload_name, replicas).await?;
            spec.total_replica = replicas;
            spec.gray_replica = 0;
            spec.events.info(format!(
                "promoted {} to {} with {} replica(s)",
                spec.workload_name, spec.image, replicas
            ));
            return Ok(());
        }

        if spec.first_job {
            let total = if spec.total_replica > 0 { spec.total_replica } else { primary.replicas };
            let current = primary.container(&spec.container_name).ok_or_else(|| {
                EngineError::not_found(format!(
                    "container {} not found in {}",
                    spec.container_name, spec.workload_name
                ))
            })?;
            let origin = GrayOrigin {
                image: current.image.clone(),
                container: current.name.clone(),
                replicas: total,
            };
            origin.write(&mut primary);
            kube.apply_workload(&primary).await?;

            let gray = gray_replicas(total, spec.gray_scale);
            let mut gray_workload = primary.clone_as(&spec.gray_workload_name);
            gray_workload.replicas = gray;
            gray_workload.set_image(&spec.container_name, &spec.image);
            kube.apply_workload(&gray_workload).await?;
            kube.scale(&ns, kind, &spec.workload_name, (total - gray).max(0))
                .await?;

            spec.total_replica = total;
            spec.gray_replica = gray;
            spec.events.info(format!(
                "created gray workload {} with {} of {} replica(s)",
                spec.gray_workload_name, gray, total
            ));
            info!("Gray release of {} started at {}%", spec.workload_name, spec.gray_scale);
            return Ok(());
        }

        let total = match origin {
            Some(o) => o.replicas,
            None if spec.total_replica > 0 => spec.total_replica,
            None => {
                return Err(EngineError::validation(format!(
                    "{} has no gray release in progress",
                    spec.workload_name
                )));
            }
        };
        require_workload(&kube, &ns, kind, &spec.gray_workload_name).await?;
        let gray = gray_replicas(total, spec.gray_scale);
        kube.set_image(&ns, kind, &spec.gray_workload_name, &spec.container_name, &spec.image)
            .await?;
        kube.scale(&ns, kind, &spec.gray_workload_name, gray).await?;
        kube.scale(&ns, kind, &spec.workload_name, (total - gray).max(0))
            .await?;
        spec.total_replica = total;
        spec.gray_replica = gray;
        spec.events
            .info(format!("shifted gray workload to {} of {} replica(s)", gray, total));
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::GrayRelease);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let mut targets = vec![(kind, spec.workload_name.clone())];
        if spec.gray_scale < 100 {
            targets.push((kind, spec.gray_workload_name.clone()));
        }
        wait_workloads_ready(ctx, &kube, &spec.namespace, &targets, spec.timeout).await?;

        if spec.gray_scale >= 100 {
            kube.delete_workload(&spec.namespace, kind, &spec.gray_workload_name)
                .await?;
            clear_origin(&kube, &spec.namespace, kind, &spec.workload_name).await?;
            spec.events
                .info(format!("removed gray workload {}", spec.gray_workload_name));
        }
        Ok(())
    }
}

pub struct GrayRollbackController;

#[async_trait]
impl JobController for GrayRollbackController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::GrayRollback);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;

        let primary = require_workload(&kube, &spec.namespace, kind, &spec.workload_name).await?;
        let origin = GrayOrigin::read(&primary).ok_or_else(|| {
            EngineError::validation(format!(
                "{} carries no gray release to roll back",
                spec.workload_name
            ))
        })?;

        kube.set_image(&spec.namespace, kind, &spec.workload_name, &origin.container, &origin.image)
            .await?;
        kube.scale(&spec.namespace, kind, &spec.workload_name, origin.replicas)
            .await?;
        spec.origin_image = origin.image;
        spec.origin_replica = origin.replicas;
        spec.events.info(format!(
            "restored {} to {} with {} replica(s)",
            spec.workload_name, spec.origin_image, spec.origin_replica
        ));
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::GrayRollback);
        let kind = workload_kind(&spec.workload_type)?;
        let kube = ctx.kube(&spec.cluster_id).await?;
        let target = [(kind, spec.workload_name.clone())];
        wait_workloads_ready(ctx, &kube, &spec.namespace, &target, spec.timeout).await?;

        kube.delete_workload(&spec.namespace, kind, &spec.gray_workload_name)
            .await?;
        clear_origin(&kube, &spec.namespace, kind, &spec.workload_name).await?;
        spec.events
            .info(format!("removed gray workload {}", spec.gray_workload_name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::run_job;
    use crate::testutil::{FakeKube, infra_with_kube, run_context, service_deployment};
    use conduit_core::domain::status::Status;
    use conduit_core::domain::task_spec::{GrayReleaseTaskSpec, GrayRollbackTaskSpec};

    fn cluster() -> Arc<FakeKube> {
        let kube = Arc::new(FakeKube::default());
        let mut web = service_deployment("ns", "shop", "a", "web", &[("web", "repo/web:v1")]);
        web.replicas = 5;
        kube.add_workload(web);
        kube
    }

    fn gray(first: bool, scale: u32) -> JobTask {
        JobTask::new(
            format!("gray-{}", scale),
            format!("gray-{}.web", scale),
            format!("gray-{}", scale),
            JobTaskSpec::GrayRelease(GrayReleaseTaskSpec {
                cluster_id: "c1".to_string(),
                namespace: "ns".to_string(),
                first_job: first,
                workload_type: "Deployment".to_string(),
                workload_name: "web".to_string(),
                gray_workload_name: "web-zadig-gray".to_string(),
                container_name: "web".to_string(),
                image: "repo/web:v2".to_string(),
                gray_scale: scale,
                total_replica: 5,
                ..Default::default()
            }),
        )
    }

    fn rollback() -> JobTask {
        JobTask::new(
            "rollback",
            "rollback.web",
            "rollback",
            JobTaskSpec::GrayRollback(GrayRollbackTaskSpec {
                cluster_id: "c1".to_string(),
                namespace: "ns".to_string(),
                workload_type: "Deployment".to_string(),
                workload_name: "web".to_string(),
                gray_workload_name: "web-zadig-gray".to_string(),
                ..Default::default()
            }),
        )
    }

    async fn run(kube: &Arc<FakeKube>, job: JobTask) -> (Status, JobTask) {
        let key = job.key.clone();
        let (ctx, _) = run_context(job, infra_with_kube(kube.clone()));
        let status = run_job(&ctx, &key).await;
        (status, ctx.task.recorder().job(&key).unwrap())
    }

    fn primary(kube: &FakeKube) -> Workload {
        kube.workload("ns", WorkloadKind::Deployment, "web").unwrap()
    }

    #[tokio::test]
    async fn test_first_job_splits_replicas_and_records_origin() {
        let kube = cluster();
        let (status, _) = run(&kube, gray(true, 20)).await;
        assert_eq!(status, Status::Passed);

        let web = primary(&kube);
        assert_eq!(web.replicas, 4);
        assert_eq!(
            web.annotations.get(GRAY_ORIGIN_IMAGE).map(String::as_str),
            Some("repo/web:v1")
        );
        assert_eq!(web.annotations.get(GRAY_ORIGIN_REPLICAS).map(String::as_str), Some("5"));
        let gray_workload = kube
            .workload("ns", WorkloadKind::Deployment, "web-zadig-gray")
            .unwrap();
        assert_eq!(gray_workload.replicas, 1);
        assert_eq!(gray_workload.container("web").unwrap().image, "repo/web:v2");
    }

    #[tokio::test]
    async fn test_full_scale_promotes_and_cleans_up() {
        let kube = cluster();
        run(&kube, gray(true, 20)).await;
        let (status, _) = run(&kube, gray(false, 60)).await;
        assert_eq!(status, Status::Passed);
        assert_eq!(primary(&kube).replicas, 2);

        let (status, job) = run(&kube, gray(false, 100)).await;
        assert_eq!(status, Status::Passed);

        let web = primary(&kube);
        assert_eq!(web.replicas, 5);
        assert_eq!(web.container("web").unwrap().image, "repo/web:v2");
        assert!(web.annotations.is_empty());
        assert!(kube.workload("ns", WorkloadKind::Deployment, "web-zadig-gray").is_none());
        let JobTaskSpec::GrayRelease(spec) = &job.spec else {
            panic!("expected a gray task");
        };
        assert!(spec.events.len() >= 2);
    }

    #[tokio::test]
    async fn test_rollback_restores_from_annotations() {
        let kube = cluster();
        run(&kube, gray(true, 40)).await;

        let (status, job) = run(&kube, rollback()).await;
        assert_eq!(status, Status::Passed);

        let web = primary(&kube);
        assert_eq!(web.replicas, 5);
        assert_eq!(web.container("web").unwrap().image, "repo/web:v1");
        assert!(kube.workload("ns", WorkloadKind::Deployment, "web-zadig-gray").is_none());
        let JobTaskSpec::GrayRollback(spec) = &job.spec else {
            panic!("expected a rollback task");
        };
        assert_eq!(spec.origin_image, "repo/web:v1");
        assert_eq!(spec.origin_replica, 5);
    }

    #[tokio::test]
    async fn test_rollback_without_gray_release_fails() {
        let kube = cluster();
        let (status, job) = run(&kube, rollback()).await;
        assert_eq!(status, Status::Failed);
        assert!(job.error.contains("no gray release"));
    }
}
