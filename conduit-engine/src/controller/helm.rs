//! Helm deploy controller

use async_trait::async_trait;
use conduit_core::domain::environment::ImagePathSpec;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use regex::Regex;
use serde_yaml::Value;
use std::sync::LazyLock;
use tracing::info;

use super::{JobController, RunContext, task_spec};
use crate::error::{EngineError, Result};
use crate::infra::HelmUpgrade;
use crate::infra::storage::service_bundle_key;
use crate::values::{kvs_to_yaml, merge_into, parse, set_path, to_yaml};

static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<repo>.+/)?(?P<image>[^:]+){1}(:)?(?P<tag>.+)?$").expect("valid image regex")
});

/// Registry part, image name and tag of an image url
pub fn split_image(image: &str) -> Option<(String, String, String)> {
    let captures = IMAGE_URL.captures(image)?;
    let part = |name: &str| {
        captures
            .name(name)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };
    Some((part("repo"), part("image"), part("tag")))
}

/// Writes an image into helm values at the locations a path spec names
///
/// With three paths the registry, name and tag go to separate keys. With
/// repo and tag the registry and name stay together. A single image path
/// gets the whole url.
pub fn assign_image(values: &mut Value, path: &ImagePathSpec, image: &str) -> Result<()> {
    let (repo, name, tag) = split_image(image)
        .ok_or_else(|| EngineError::validation(format!("invalid image url {}", image)))?;
    let has = |p: &str| !p.is_empty();
    match (has(&path.repo), has(&path.image), has(&path.tag)) {
        (true, true, true) => {
            set_path(values, &path.repo, Value::from(repo.trim_end_matches('/')));
            set_path(values, &path.image, Value::from(name));
            set_path(values, &path.tag, Value::from(tag));
        }
        (true, false, true) => {
            set_path(values, &path.repo, Value::from(format!("{}{}", repo, name)));
            set_path(values, &path.tag, Value::from(tag));
        }
        (true, true, false) => {
            set_path(values, &path.repo, Value::from(repo.trim_end_matches('/')));
            let name = if tag.is_empty() { name } else { format!("{}:{}", name, tag) };
            set_path(values, &path.image, Value::from(name));
        }
        (false, true, false) => {
            set_path(values, &path.image, Value::from(image));
        }
        _ => {
            return Err(EngineError::validation(format!(
                "image path {:?} cannot hold an image",
                path
            )));
        }
    }
    Ok(())
}

pub struct HelmDeployController;

#[async_trait]
impl JobController for HelmDeployController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let spec = task_spec!(job, JobTaskSpec::HelmDeploy);
        let storage = ctx.infra.storage()?;
        let helm = ctx.infra.helm()?;
        ctx.task.add_cluster_id(&spec.cluster_id);

        let key = service_bundle_key(&spec.project, &spec.service_name, spec.service_revision);
        let chart = ctx.task.workspace.join("charts").join(&key);
        storage.download(&key, &chart).await.map_err(|e| {
            EngineError::Infrastructure(e.context(format!("failed to fetch chart of {}", spec.service_name)))
        })?;

        let current = helm
            .release_values(&spec.cluster_id, &spec.namespace, &spec.release_name)
            .await?;
        let mut values = parse(current.as_deref().unwrap_or_default())?;

        if spec.update_config {
            merge_into(&mut values, parse(&spec.variable_yaml)?);
            merge_into(&mut values, parse(&kvs_to_yaml(&spec.variable_kvs)?)?);
        }

        for module in spec.image_and_modules.iter_mut() {
            module.image = ctx.task.render(&module.image);
            let path = module.image_path.as_ref().ok_or_else(|| {
                EngineError::validation(format!(
                    "module {} of service {} has no image path",
                    module.service_module, spec.service_name
                ))
            })?;
            assign_image(&mut values, path, &module.image)?;
        }

        let upgrade = HelmUpgrade {
            cluster_id: spec.cluster_id.clone(),
            namespace: spec.namespace.clone(),
            release_name: spec.release_name.clone(),
            chart_dir: chart,
            values_yaml: to_yaml(&values)?,
            wait: !spec.skip_check_run_status,
            timeout: ctx.budget(spec.timeout),
        };
        info!(
            "Upgrading release {} in {} with {} image(s)",
            upgrade.release_name,
            upgrade.namespace,
            spec.image_and_modules.len()
        );
        helm.upgrade(&upgrade).await.map_err(|e| {
            EngineError::Infrastructure(e.context(format!("helm upgrade of {} failed", upgrade.release_name)))
        })?;
        Ok(())
    }
}
