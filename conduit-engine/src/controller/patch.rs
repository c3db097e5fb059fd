//! Kubernetes resource patch controller

use async_trait::async_trait;
use conduit_core::domain::job_spec::{PatchItem, PatchStrategy};
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};
use crate::infra::kube::ResourceRef;
use crate::render::render_template;

/// Patch type as the API server names it
pub fn patch_type(strategy: PatchStrategy) -> &'static str {
    match strategy {
        PatchStrategy::StrategicMerge => "strategic-merge",
        PatchStrategy::Merge => "merge",
        PatchStrategy::Json => "json",
    }
}

fn render_patch(ctx: &RunContext, item: &PatchItem) -> String {
    let vars: BTreeMap<String, String> = item
        .params
        .iter()
        .map(|p| (p.name.clone(), ctx.task.render(&p.value)))
        .collect();
    render_template(&ctx.task.render(&item.patch_content), &vars)
}

pub struct K8sPatchController;

#[async_trait]
impl JobController for K8sPatchController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::K8sPatch);
        let kube = ctx.kube(&spec.cluster_id).await?;

        let mut failed = 0;
        for item in spec.patch_items.iter_mut() {
            let resource = ResourceRef {
                group: item.resource_group.clone(),
                version: item.resource_version.clone(),
                kind: item.resource_kind.clone(),
                name: item.resource_name.clone(),
            };
            let content = render_patch(ctx, item);
            match kube
                .patch(&spec.namespace, &resource, patch_type(item.patch_strategy), &content)
                .await
            {
                Ok(()) => {
                    item.error.clear();
                    info!("Patched {} {}/{}", resource.kind, spec.namespace, resource.name);
                }
                Err(e) => {
                    item.error = format!("{:#}", e);
                    failed += 1;
                    warn!("Failed to patch {} {}: {}", resource.kind, resource.name, item.error);
                }
            }
            item.patch_content = content;
        }

        if failed > 0 {
            return Err(EngineError::infrastructure(format!(
                "{} of {} patch(es) failed",
                failed,
                spec.patch_items.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::run_job;
    use crate::testutil::{FakeKube, infra_with_kube, run_context};
    use conduit_core::domain::status::Status;
    use conduit_core::domain::task_spec::K8sPatchTaskSpec;
    use conduit_core::domain::workflow::Param;
    use std::sync::Arc;

    fn item(name: &str, content: &str) -> PatchItem {
        PatchItem {
            resource_name: name.to_string(),
            resource_kind: "ConfigMap".to_string(),
            resource_version: "v1".to_string(),
            patch_content: content.to_string(),
            params: vec![Param::new("level", "debug")],
            patch_strategy: PatchStrategy::Merge,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_patch_renders_params_and_globals() {
        let kube = Arc::new(FakeKube::default());
        let job = JobTask::new(
            "patch",
            "patch",
            "patch",
            JobTaskSpec::K8sPatch(K8sPatchTaskSpec {
                cluster_id: "c1".to_string(),
                namespace: "ns".to_string(),
                patch_items: vec![item(
                    "app-config",
                    r#"{"data": {"level": "{{.level}}", "tag": "{{.job.build.TAG}}"}}"#,
                )],
            }),
        );
        let (ctx, _) = run_context(job, infra_with_kube(kube.clone()));
        ctx.task.set_global("{{.job.build.TAG}}", "v7");

        assert_eq!(run_job(&ctx, "patch").await, Status::Passed);
        let patches = kube.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].2, "merge");
        assert_eq!(patches[0].3, r#"{"data": {"level": "debug", "tag": "v7"}}"#);
    }

    #[tokio::test]
    async fn test_failed_item_is_recorded() {
        let kube = Arc::new(FakeKube::default());
        let job = JobTask::new(
            "patch",
            "patch",
            "patch",
            JobTaskSpec::K8sPatch(K8sPatchTaskSpec {
                cluster_id: "c1".to_string(),
                namespace: "ns".to_string(),
                patch_items: vec![item("good", r#"{"a": 1}"#), item("bad", "not json")],
            }),
        );
        let (ctx, _) = run_context(job, infra_with_kube(kube.clone()));

        assert_eq!(run_job(&ctx, "patch").await, Status::Failed);
        assert_eq!(kube.patches().len(), 1);
        let job = ctx.task.recorder().job("patch").unwrap();
        let JobTaskSpec::K8sPatch(spec) = &job.spec else {
            panic!("expected a patch task");
        };
        assert!(spec.patch_items[0].error.is_empty());
        assert!(spec.patch_items[1].error.contains("bad"));
    }
}
