//! Environment catalog
//!
//! Read access to projects, environments, service templates, stored
//! workflows and integrations. Configurators consult it when presetting
//! and expanding jobs.

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::domain::environment::{Environment, Project, ServiceTemplate};
use conduit_core::domain::integration::Integration;
use conduit_core::domain::workflow::Workflow;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[async_trait]
pub trait EnvironmentCatalog: Send + Sync {
    async fn find_project(&self, name: &str) -> anyhow::Result<Project>;

    async fn find_env(&self, project: &str, env_name: &str) -> anyhow::Result<Environment>;

    async fn list_envs(&self, project: &str, production: bool) -> anyhow::Result<Vec<Environment>>;

    /// Latest revision of every service template of a project
    async fn list_services(
        &self,
        project: &str,
        production: bool,
    ) -> anyhow::Result<Vec<ServiceTemplate>>;

    /// A specific revision, or the latest one when `revision` is `None`
    async fn find_service(
        &self,
        project: &str,
        service_name: &str,
        revision: Option<i64>,
        production: bool,
    ) -> anyhow::Result<ServiceTemplate>;

    /// The latest stored definition of a workflow
    async fn find_workflow(&self, name: &str) -> anyhow::Result<Workflow>;

    async fn find_integration(&self, id: &str) -> anyhow::Result<Integration>;

    /// Replaces the record of an environment
    async fn save_env(&self, env: Environment) -> anyhow::Result<()>;
}

/// Catalog document as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogData {
    pub projects: Vec<Project>,
    pub environments: Vec<Environment>,
    pub services: Vec<ServiceTemplate>,
    pub workflows: Vec<Workflow>,
    pub integrations: Vec<Integration>,
}

/// Catalog backed by a YAML document
pub struct FileCatalog {
    data: RwLock<CatalogData>,
}

impl FileCatalog {
    pub fn new(data: CatalogData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let data: CatalogData = serde_yaml::from_str(yaml).context("Invalid catalog document")?;
        Ok(Self::new(data))
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::from_yaml(&yaml)
    }

    /// Replaces the stored definition of a workflow
    pub fn upsert_workflow(&self, workflow: Workflow) {
        let mut data = self.data.write();
        data.workflows.retain(|w| w.name != workflow.name);
        data.workflows.push(workflow);
    }

    pub fn upsert_env(&self, env: Environment) {
        let mut data = self.data.write();
        data.environments
            .retain(|e| !(e.project == env.project && e.env_name == env.env_name));
        data.environments.push(env);
    }
}

#[async_trait]
impl EnvironmentCatalog for FileCatalog {
    async fn find_project(&self, name: &str) -> anyhow::Result<Project> {
        self.data
            .read()
            .projects
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("project {} not found", name))
    }

    async fn find_env(&self, project: &str, env_name: &str) -> anyhow::Result<Environment> {
        self.data
            .read()
            .environments
            .iter()
            .find(|e| e.project == project && e.env_name == env_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("env {} not found in project {}", env_name, project))
    }

    async fn list_envs(&self, project: &str, production: bool) -> anyhow::Result<Vec<Environment>> {
        Ok(self
            .data
            .read()
            .environments
            .iter()
            .filter(|e| e.project == project && e.production == production)
            .cloned()
            .collect())
    }

    async fn list_services(
        &self,
        project: &str,
        production: bool,
    ) -> anyhow::Result<Vec<ServiceTemplate>> {
        let data = self.data.read();
        let mut latest: BTreeMap<&str, &ServiceTemplate> = BTreeMap::new();
        for service in data
            .services
            .iter()
            .filter(|s| s.project == project && s.production == production)
        {
            let entry = latest.entry(service.service_name.as_str()).or_insert(service);
            if service.revision > entry.revision {
                *entry = service;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn find_service(
        &self,
        project: &str,
        service_name: &str,
        revision: Option<i64>,
        production: bool,
    ) -> anyhow::Result<ServiceTemplate> {
        let data = self.data.read();
        let mut candidates = data.services.iter().filter(|s| {
            s.project == project && s.service_name == service_name && s.production == production
        });
        let found = match revision {
            Some(revision) if revision > 0 => candidates.find(|s| s.revision == revision),
            _ => candidates.max_by_key(|s| s.revision),
        };
        found.cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "service {} (revision {:?}) not found in project {}",
                service_name,
                revision,
                project
            )
        })
    }

    async fn find_workflow(&self, name: &str) -> anyhow::Result<Workflow> {
        self.data
            .read()
            .workflows
            .iter()
            .find(|w| w.name == name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("workflow {} not found", name))
    }

    async fn find_integration(&self, id: &str) -> anyhow::Result<Integration> {
        self.data
            .read()
            .integrations
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("integration {} not found", id))
    }

    async fn save_env(&self, env: Environment) -> anyhow::Result<()> {
        self.upsert_env(env);
        Ok(())
    }
}
