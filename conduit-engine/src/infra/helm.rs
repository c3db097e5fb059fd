//! Helm release operations

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// One `helm upgrade --install` invocation
#[derive(Debug, Clone, PartialEq)]
pub struct HelmUpgrade {
    pub cluster_id: String,
    pub namespace: String,
    pub release_name: String,
    /// Chart archive or directory
    pub chart_dir: PathBuf,
    /// Complete values document for the release
    pub values_yaml: String,
    /// Block until the release's resources are ready
    pub wait: bool,
    pub timeout: Duration,
}

#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Values the release is currently deployed with, `None` when the
    /// release does not exist yet
    async fn release_values(
        &self,
        cluster_id: &str,
        namespace: &str,
        release_name: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn upgrade(&self, upgrade: &HelmUpgrade) -> anyhow::Result<()>;
}
