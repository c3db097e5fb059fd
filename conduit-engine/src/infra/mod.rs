//! External collaborators
//!
//! Every system the engine talks to sits behind a trait. `Infra` bundles
//! the configured implementations; a job that needs a collaborator nobody
//! configured fails with an infrastructure error.

pub mod helm;
pub mod jenkins;
pub mod kube;
pub mod services;
pub mod steps;
pub mod storage;

use std::sync::Arc;

use crate::error::{EngineError, Result};

pub use helm::{HelmClient, HelmUpgrade};
pub use jenkins::{HttpJenkinsClient, JenkinsBuild, JenkinsClient};
pub use kube::{ClusterAccess, KubeClient};
pub use services::{
    ApolloClient, IssueTracker, MonitorClient, NacosClient, SqlExecutor, WorkflowLauncher,
};
pub use steps::{LocalStepExecutor, StepEnv, StepExecutor, StepOutcome};
pub use storage::{FsObjectStorage, ObjectStorage};

#[derive(Clone, Default)]
pub struct Infra {
    pub clusters: Option<Arc<dyn ClusterAccess>>,
    pub helm: Option<Arc<dyn HelmClient>>,
    pub storage: Option<Arc<dyn ObjectStorage>>,
    pub jenkins: Option<Arc<dyn JenkinsClient>>,
    pub sql: Option<Arc<dyn SqlExecutor>>,
    pub nacos: Option<Arc<dyn NacosClient>>,
    pub apollo: Option<Arc<dyn ApolloClient>>,
    pub issues: Option<Arc<dyn IssueTracker>>,
    pub monitor: Option<Arc<dyn MonitorClient>>,
    pub steps: Option<Arc<dyn StepExecutor>>,
    pub launcher: Option<Arc<dyn WorkflowLauncher>>,
}

fn require<T: ?Sized>(slot: &Option<Arc<T>>, what: &str) -> Result<Arc<T>> {
    slot.clone()
        .ok_or_else(|| EngineError::infrastructure(format!("no {} is configured", what)))
}

impl Infra {
    /// Local step execution and the HTTP Jenkins client; everything else
    /// has to be supplied
    pub fn local() -> Self {
        Self {
            jenkins: Some(Arc::new(HttpJenkinsClient::new())),
            steps: Some(Arc::new(LocalStepExecutor::new())),
            ..Default::default()
        }
    }

    pub fn clusters(&self) -> Result<Arc<dyn ClusterAccess>> {
        require(&self.clusters, "cluster access")
    }

    /// Client for one cluster
    pub async fn kube(&self, cluster_id: &str) -> Result<Arc<dyn KubeClient>> {
        let clusters = self.clusters()?;
        clusters.client(cluster_id).await.map_err(|e| {
            EngineError::Infrastructure(e.context(format!("cluster {} is unreachable", cluster_id)))
        })
    }

    pub fn helm(&self) -> Result<Arc<dyn HelmClient>> {
        require(&self.helm, "helm client")
    }

    pub fn storage(&self) -> Result<Arc<dyn ObjectStorage>> {
        require(&self.storage, "object storage")
    }

    pub fn jenkins(&self) -> Result<Arc<dyn JenkinsClient>> {
        require(&self.jenkins, "jenkins client")
    }

    pub fn sql(&self) -> Result<Arc<dyn SqlExecutor>> {
        require(&self.sql, "sql executor")
    }

    pub fn nacos(&self) -> Result<Arc<dyn NacosClient>> {
        require(&self.nacos, "nacos client")
    }

    pub fn apollo(&self) -> Result<Arc<dyn ApolloClient>> {
        require(&self.apollo, "apollo client")
    }

    pub fn issues(&self) -> Result<Arc<dyn IssueTracker>> {
        require(&self.issues, "issue tracker")
    }

    pub fn monitor(&self) -> Result<Arc<dyn MonitorClient>> {
        require(&self.monitor, "monitor client")
    }

    pub fn steps(&self) -> Result<Arc<dyn StepExecutor>> {
        require(&self.steps, "step executor")
    }

    pub fn launcher(&self) -> Result<Arc<dyn WorkflowLauncher>> {
        require(&self.launcher, "workflow launcher")
    }
}
