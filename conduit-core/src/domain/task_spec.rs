//! Per-kind job task specs
//!
//! A task spec is the snapshot a runtime controller needs to execute one
//! job task. Timeouts inside task specs are seconds; 0 means the engine
//! default applies.

use serde::{Deserialize, Serialize};

use super::environment::{ImagePathSpec, RenderVariableKV};
use super::job_spec::{
    ApolloNamespace, CheckMode, DeployContent, DeployModuleInfo, DeployVariableConfig,
    GuanceyunMonitor, IssueID, IstioJobTarget, JenkinsJobInfo, JobProperties, NacosConfig,
    PatchItem, PluginTemplate,
};
use super::job_type::JobType;
use super::status::Status;
use super::step::StepTask;
use super::task::{Events, Resource};
use super::workflow::Param;

/// Kind-specific payload of a job task; the tag is the job kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum JobTaskSpec {
    #[serde(rename = "zadig-deploy")]
    Deploy(DeployTaskSpec),
    #[serde(rename = "zadig-helm-deploy")]
    HelmDeploy(HelmDeployTaskSpec),
    CustomDeploy(CustomDeployTaskSpec),
    Freestyle(FreestyleTaskSpec),
    Plugin(PluginTaskSpec),
    #[serde(rename = "k8s-blue-green-deploy")]
    BlueGreenDeploy(BlueGreenTaskSpec),
    #[serde(rename = "k8s-blue-green-release")]
    BlueGreenRelease(BlueGreenTaskSpec),
    #[serde(rename = "k8s-blue-green-deploy-v2")]
    BlueGreenDeployV2(BlueGreenV2TaskSpec),
    #[serde(rename = "k8s-blue-green-release-v2")]
    BlueGreenReleaseV2(BlueGreenV2TaskSpec),
    #[serde(rename = "k8s-canary-deploy")]
    CanaryDeploy(CanaryTaskSpec),
    #[serde(rename = "k8s-canary-release")]
    CanaryRelease(CanaryTaskSpec),
    #[serde(rename = "k8s-gray-release")]
    GrayRelease(GrayReleaseTaskSpec),
    #[serde(rename = "k8s-gray-rollback")]
    GrayRollback(GrayRollbackTaskSpec),
    IstioRelease(IstioTaskSpec),
    IstioRollback(IstioTaskSpec),
    #[serde(rename = "k8s-resource-patch")]
    K8sPatch(K8sPatchTaskSpec),
    Jenkins(JenkinsTaskSpec),
    Sql(SqlTaskSpec),
    Nacos(NacosTaskSpec),
    Apollo(ApolloTaskSpec),
    Jira(JiraTaskSpec),
    WorkflowTrigger(WorkflowTriggerTaskSpec),
    OfflineService(OfflineServiceTaskSpec),
    GuanceyunCheck(GuanceyunCheckTaskSpec),
    MseGrayRelease(MseGrayReleaseTaskSpec),
    MseGrayOffline(MseGrayOfflineTaskSpec),
}

impl JobTaskSpec {
    pub fn job_type(&self) -> JobType {
        match self {
            JobTaskSpec::Deploy(_) => JobType::ZadigDeploy,
            JobTaskSpec::HelmDeploy(_) => JobType::ZadigHelmDeploy,
            JobTaskSpec::CustomDeploy(_) => JobType::CustomDeploy,
            JobTaskSpec::Freestyle(_) => JobType::Freestyle,
            JobTaskSpec::Plugin(_) => JobType::Plugin,
            JobTaskSpec::BlueGreenDeploy(_) => JobType::BlueGreenDeploy,
            JobTaskSpec::BlueGreenRelease(_) => JobType::BlueGreenRelease,
            JobTaskSpec::BlueGreenDeployV2(_) => JobType::BlueGreenDeployV2,
            JobTaskSpec::BlueGreenReleaseV2(_) => JobType::BlueGreenReleaseV2,
            JobTaskSpec::CanaryDeploy(_) => JobType::CanaryDeploy,
            JobTaskSpec::CanaryRelease(_) => JobType::CanaryRelease,
            JobTaskSpec::GrayRelease(_) => JobType::GrayRelease,
            JobTaskSpec::GrayRollback(_) => JobType::GrayRollback,
            JobTaskSpec::IstioRelease(_) => JobType::IstioRelease,
            JobTaskSpec::IstioRollback(_) => JobType::IstioRollback,
            JobTaskSpec::K8sPatch(_) => JobType::K8sPatch,
            JobTaskSpec::Jenkins(_) => JobType::Jenkins,
            JobTaskSpec::Sql(_) => JobType::Sql,
            JobTaskSpec::Nacos(_) => JobType::Nacos,
            JobTaskSpec::Apollo(_) => JobType::Apollo,
            JobTaskSpec::Jira(_) => JobType::Jira,
            JobTaskSpec::WorkflowTrigger(_) => JobType::WorkflowTrigger,
            JobTaskSpec::OfflineService(_) => JobType::OfflineService,
            JobTaskSpec::GuanceyunCheck(_) => JobType::GuanceyunCheck,
            JobTaskSpec::MseGrayRelease(_) => JobType::MseGrayRelease,
            JobTaskSpec::MseGrayOffline(_) => JobType::MseGrayOffline,
        }
    }

    /// Timeline of traffic-shifting kinds
    pub fn events_mut(&mut self) -> Option<&mut Events> {
        match self {
            JobTaskSpec::BlueGreenDeploy(s) | JobTaskSpec::BlueGreenRelease(s) => {
                Some(&mut s.events)
            }
            JobTaskSpec::BlueGreenDeployV2(s) | JobTaskSpec::BlueGreenReleaseV2(s) => {
                Some(&mut s.events)
            }
            JobTaskSpec::CanaryDeploy(s) | JobTaskSpec::CanaryRelease(s) => Some(&mut s.events),
            JobTaskSpec::GrayRelease(s) => Some(&mut s.events),
            JobTaskSpec::GrayRollback(s) => Some(&mut s.events),
            JobTaskSpec::IstioRelease(s) | JobTaskSpec::IstioRollback(s) => Some(&mut s.events),
            JobTaskSpec::MseGrayRelease(s) => Some(&mut s.events),
            JobTaskSpec::MseGrayOffline(s) => Some(&mut s.events),
            _ => None,
        }
    }
}

/// Outcome of one item of a multi-item job (a statement, a config key, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemResult {
    pub name: String,
    pub status: Status,
    pub error: String,
}

impl ItemResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Status::Passed,
            error: String::new(),
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Status::Failed,
            error: error.into(),
        }
    }
}

// =============================================================================
// Deploy family
// =============================================================================

/// Image assignment for one module of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployServiceModule {
    pub service_module: String,
    pub image: String,
    pub image_name: String,
    /// Where the image lives inside helm values
    pub image_path: Option<ImagePathSpec>,
}

impl From<&DeployModuleInfo> for DeployServiceModule {
    fn from(module: &DeployModuleInfo) -> Self {
        Self {
            service_module: module.service_module.clone(),
            image: module.image.clone(),
            image_name: module.image_name.clone(),
            image_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployTaskSpec {
    pub project: String,
    pub env: String,
    pub service_name: String,
    pub production: bool,
    pub skip_check_run_status: bool,
    pub cluster_id: String,
    pub namespace: String,
    /// Environment was created by the platform and gets rendered manifests
    pub system_env: bool,
    pub deploy_contents: Vec<DeployContent>,
    pub update_config: bool,
    pub variable_configs: Vec<DeployVariableConfig>,
    pub variable_kvs: Vec<RenderVariableKV>,
    pub service_and_images: Vec<DeployServiceModule>,
    /// Rendered manifest; images from quoted jobs are substituted at run time
    pub yaml: String,
    pub replace_resources: Vec<Resource>,
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmDeployTaskSpec {
    pub project: String,
    pub env: String,
    pub service_name: String,
    pub service_revision: i64,
    pub release_name: String,
    pub cluster_id: String,
    pub namespace: String,
    pub production: bool,
    pub skip_check_run_status: bool,
    pub deploy_contents: Vec<DeployContent>,
    pub update_config: bool,
    pub variable_yaml: String,
    pub variable_kvs: Vec<RenderVariableKV>,
    pub image_and_modules: Vec<DeployServiceModule>,
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomDeployTaskSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub workload_type: String,
    pub workload_name: String,
    pub container_name: String,
    pub image: String,
    pub skip_check_run_status: bool,
    pub replace_resources: Vec<Resource>,
    pub timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreestyleTaskSpec {
    pub properties: JobProperties,
    pub steps: Vec<StepTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginTaskSpec {
    pub properties: JobProperties,
    pub plugin: PluginTemplate,
}

// =============================================================================
// Traffic shifting
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryTaskSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub k8s_service_name: String,
    pub workload_type: String,
    pub workload_name: String,
    pub container_name: String,
    pub canary_workload_name: String,
    pub canary_percentage: u32,
    pub canary_replica: i32,
    pub image: String,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenTaskSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub k8s_service_name: String,
    pub blue_k8s_service_name: String,
    pub workload_type: String,
    pub workload_name: String,
    pub blue_workload_name: String,
    pub container_name: String,
    pub image: String,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenV2TaskSpec {
    pub project: String,
    pub env: String,
    pub production: bool,
    pub cluster_id: String,
    pub namespace: String,
    pub service_name: String,
    pub modules: Vec<DeployServiceModule>,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayReleaseTaskSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub first_job: bool,
    pub workload_type: String,
    pub workload_name: String,
    pub gray_workload_name: String,
    pub container_name: String,
    pub image: String,
    pub gray_scale: u32,
    pub total_replica: i32,
    pub gray_replica: i32,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayRollbackTaskSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub workload_type: String,
    pub workload_name: String,
    pub gray_workload_name: String,
    /// Restored values, read from the primary workload's annotations
    pub origin_image: String,
    pub origin_replica: i32,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IstioTaskSpec {
    pub first: bool,
    pub cluster_id: String,
    pub namespace: String,
    pub weight: u32,
    pub replica_percentage: u32,
    pub replicas: i32,
    pub target: IstioJobTarget,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MseGrayReleaseTaskSpec {
    pub project: String,
    pub production: bool,
    pub gray_tag: String,
    pub base_env: String,
    pub gray_env: String,
    pub cluster_id: String,
    pub namespace: String,
    pub skip_check_run_status: bool,
    pub service_name: String,
    pub replicas: i32,
    pub modules: Vec<DeployServiceModule>,
    pub timeout: i64,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MseGrayOfflineTaskSpec {
    pub project: String,
    pub env: String,
    pub cluster_id: String,
    pub namespace: String,
    pub gray_tag: String,
    pub services: Vec<String>,
    pub events: Events,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sPatchTaskSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub patch_items: Vec<PatchItem>,
}

// =============================================================================
// Integrations
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsTaskSpec {
    pub id: String,
    pub job: JenkinsJobInfo,
    pub build_number: Option<i64>,
    pub build_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlTaskSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub sql: String,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NacosTaskSpec {
    pub nacos_id: String,
    pub namespace_id: String,
    pub nacos_datas: Vec<NacosConfig>,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApolloTaskSpec {
    pub apollo_id: String,
    pub namespace_list: Vec<ApolloNamespace>,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraTaskSpec {
    pub jira_id: String,
    pub issues: Vec<IssueID>,
    pub target_status: String,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggeredWorkflow {
    pub workflow_name: String,
    pub params: Vec<Param>,
    pub task_id: i64,
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowTriggerTaskSpec {
    pub is_enable_check: bool,
    pub workflows: Vec<TriggeredWorkflow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineServiceTaskSpec {
    pub project: String,
    pub env: String,
    pub cluster_id: String,
    pub namespace: String,
    pub services: Vec<String>,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuanceyunCheckTaskSpec {
    pub id: String,
    pub name: String,
    /// Minutes
    pub check_time: i64,
    pub check_mode: CheckMode,
    pub monitors: Vec<GuanceyunMonitor>,
}
