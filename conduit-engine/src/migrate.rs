//! Host environment migration
//!
//! Environments created outside the platform carry no service records of
//! their own. They are rebuilt from the workloads observed in the
//! environment's namespace.

use anyhow::Context;
use conduit_core::domain::environment::{Container, EnvService, Environment, extract_image_name};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::catalog::EnvironmentCatalog;
use crate::controller::deploy::SERVICE_LABEL;
use crate::infra::kube::{KubeClient, Labels};

/// Rebuilds the service records of an externally created environment
///
/// A workload belongs to the service named by its `s-service` label, or to
/// a service of its own name when unlabelled. Revisions come from the
/// latest service templates; services without a template get revision 1.
pub async fn migrate_host_env(
    catalog: &dyn EnvironmentCatalog,
    kube: &dyn KubeClient,
    env: &Environment,
) -> anyhow::Result<Environment> {
    let revisions: HashMap<String, i64> = catalog
        .list_services(&env.project, env.production)
        .await
        .with_context(|| format!("Failed to list services of project {}", env.project))?
        .into_iter()
        .map(|template| (template.service_name, template.revision))
        .collect();

    let workloads = kube
        .list_workloads(&env.namespace, &Labels::new())
        .await
        .with_context(|| format!("Failed to list workloads in {}", env.namespace))?;

    let mut services: BTreeMap<String, EnvService> = BTreeMap::new();
    for workload in workloads {
        let service_name = workload
            .labels
            .get(SERVICE_LABEL)
            .cloned()
            .unwrap_or_else(|| workload.name.clone());
        let service = services.entry(service_name.clone()).or_insert_with(|| EnvService {
            revision: revisions.get(&service_name).copied().unwrap_or(1),
            service_name: service_name.clone(),
            ..Default::default()
        });
        for container in workload.containers {
            if service.containers.iter().any(|c| c.name == container.name) {
                continue;
            }
            service.containers.push(Container {
                image_name: extract_image_name(&container.image),
                name: container.name,
                image: container.image,
                image_path: None,
            });
        }
        debug!("Workload {} mapped to service {}", workload.name, service_name);
    }

    info!(
        "Migrated host environment {}/{} with {} service(s)",
        env.project,
        env.env_name,
        services.len()
    );
    Ok(Environment {
        services: services.into_values().collect(),
        ..env.clone()
    })
}
