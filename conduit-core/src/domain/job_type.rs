//! Job kind discriminator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind tag selecting the configurator for a job definition and the
/// runtime controller for a job task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    ZadigBuild,
    ZadigDistributeImage,
    ZadigDeploy,
    ZadigHelmDeploy,
    CustomDeploy,
    Freestyle,
    Plugin,
    #[serde(rename = "k8s-blue-green-deploy")]
    BlueGreenDeploy,
    #[serde(rename = "k8s-blue-green-release")]
    BlueGreenRelease,
    #[serde(rename = "k8s-blue-green-deploy-v2")]
    BlueGreenDeployV2,
    #[serde(rename = "k8s-blue-green-release-v2")]
    BlueGreenReleaseV2,
    #[serde(rename = "k8s-canary-deploy")]
    CanaryDeploy,
    #[serde(rename = "k8s-canary-release")]
    CanaryRelease,
    #[serde(rename = "k8s-gray-release")]
    GrayRelease,
    #[serde(rename = "k8s-gray-rollback")]
    GrayRollback,
    IstioRelease,
    IstioRollback,
    #[serde(rename = "k8s-resource-patch")]
    K8sPatch,
    Jenkins,
    Sql,
    Nacos,
    Apollo,
    Jira,
    WorkflowTrigger,
    OfflineService,
    GuanceyunCheck,
    MseGrayRelease,
    MseGrayOffline,
}

impl JobType {
    pub const ALL: [JobType; 28] = [
        JobType::ZadigBuild,
        JobType::ZadigDistributeImage,
        JobType::ZadigDeploy,
        JobType::ZadigHelmDeploy,
        JobType::CustomDeploy,
        JobType::Freestyle,
        JobType::Plugin,
        JobType::BlueGreenDeploy,
        JobType::BlueGreenRelease,
        JobType::BlueGreenDeployV2,
        JobType::BlueGreenReleaseV2,
        JobType::CanaryDeploy,
        JobType::CanaryRelease,
        JobType::GrayRelease,
        JobType::GrayRollback,
        JobType::IstioRelease,
        JobType::IstioRollback,
        JobType::K8sPatch,
        JobType::Jenkins,
        JobType::Sql,
        JobType::Nacos,
        JobType::Apollo,
        JobType::Jira,
        JobType::WorkflowTrigger,
        JobType::OfflineService,
        JobType::GuanceyunCheck,
        JobType::MseGrayRelease,
        JobType::MseGrayOffline,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ZadigBuild => "zadig-build",
            JobType::ZadigDistributeImage => "zadig-distribute-image",
            JobType::ZadigDeploy => "zadig-deploy",
            JobType::ZadigHelmDeploy => "zadig-helm-deploy",
            JobType::CustomDeploy => "custom-deploy",
            JobType::Freestyle => "freestyle",
            JobType::Plugin => "plugin",
            JobType::BlueGreenDeploy => "k8s-blue-green-deploy",
            JobType::BlueGreenRelease => "k8s-blue-green-release",
            JobType::BlueGreenDeployV2 => "k8s-blue-green-deploy-v2",
            JobType::BlueGreenReleaseV2 => "k8s-blue-green-release-v2",
            JobType::CanaryDeploy => "k8s-canary-deploy",
            JobType::CanaryRelease => "k8s-canary-release",
            JobType::GrayRelease => "k8s-gray-release",
            JobType::GrayRollback => "k8s-gray-rollback",
            JobType::IstioRelease => "istio-release",
            JobType::IstioRollback => "istio-rollback",
            JobType::K8sPatch => "k8s-resource-patch",
            JobType::Jenkins => "jenkins",
            JobType::Sql => "sql",
            JobType::Nacos => "nacos",
            JobType::Apollo => "apollo",
            JobType::Jira => "jira",
            JobType::WorkflowTrigger => "workflow-trigger",
            JobType::OfflineService => "offline-service",
            JobType::GuanceyunCheck => "guanceyun-check",
            JobType::MseGrayRelease => "mse-gray-release",
            JobType::MseGrayOffline => "mse-gray-offline",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
