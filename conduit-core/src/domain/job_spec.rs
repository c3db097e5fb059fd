//! Typed job definition specs
//!
//! Each job kind decodes the raw `Job::spec` document into one of these.
//! Several nested records are shared with the task specs they expand into.

use serde::{Deserialize, Serialize};

use super::environment::{DeployType, RenderVariableKV};
use super::step::StepTask;
use super::workflow::{KeyVal, Output, Param};

/// Prefix marking an environment value the workflow user cannot change
pub const FIXED_VALUE_MARK: &str = "<+fixed>";

/// Strips the fixed-value marker from an environment name
pub fn strip_fixed_mark(env: &str) -> &str {
    env.strip_prefix(FIXED_VALUE_MARK).unwrap_or(env)
}

// =============================================================================
// Deploy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployContent {
    Image,
    Vars,
    Config,
}

/// Where a deploy-style job takes its targets from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploySource {
    #[default]
    Runtime,
    #[serde(rename = "fromjob")]
    FromJob,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployJobSpec {
    pub env: String,
    pub production: bool,
    pub deploy_type: DeployType,
    pub skip_check_run_status: bool,
    pub source: DeploySource,
    /// Quoted upstream job when `source` is `fromjob`
    pub job_name: String,
    pub origin_job_name: String,
    pub deploy_contents: Vec<DeployContent>,
    pub services: Vec<DeployServiceInfo>,
    /// Modules configured by the workflow author
    pub service_and_images: Vec<ServiceAndImage>,
    pub env_options: Vec<DeployEnvInformation>,
}

impl DeployJobSpec {
    pub fn deploys(&self, content: DeployContent) -> bool {
        self.deploy_contents.contains(&content)
    }

    /// Only images are deployed, configuration state is left untouched
    pub fn only_deploys_image(&self) -> bool {
        only_deploys_image(&self.deploy_contents)
    }
}

pub fn only_deploys_image(contents: &[DeployContent]) -> bool {
    contents.len() == 1 && contents[0] == DeployContent::Image
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployServiceInfo {
    pub service_name: String,
    pub variable_configs: Vec<DeployVariableConfig>,
    pub variable_kvs: Vec<RenderVariableKV>,
    pub latest_variable_kvs: Vec<RenderVariableKV>,
    pub variable_yaml: String,
    pub update_config: bool,
    pub updatable: bool,
    pub deployed: bool,
    pub modules: Vec<DeployModuleInfo>,
}

/// Variable a workflow author exposes to the workflow user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployVariableConfig {
    pub variable_key: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployModuleInfo {
    pub service_module: String,
    pub image: String,
    pub image_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAndImage {
    pub service_name: String,
    pub service_module: String,
    pub image: String,
    pub image_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployEnvInformation {
    pub env: String,
    pub registry_id: String,
    pub services: Vec<DeployServiceInfo>,
}

/// Modules of one service produced by a quoted job, in declared order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceWithModuleAndImage {
    pub service_name: String,
    pub service_modules: Vec<DeployModuleInfo>,
}

// =============================================================================
// Build / Distribute
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildJobSpec {
    pub docker_registry_id: String,
    pub service_and_builds: Vec<ServiceAndBuild>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAndBuild {
    pub service_name: String,
    pub service_module: String,
    pub build_name: String,
    pub image: String,
    pub image_name: String,
    pub script: String,
    pub envs: Vec<KeyVal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributeImageJobSpec {
    pub source_registry_id: String,
    pub target_registry_id: String,
    pub targets: Vec<DistributeTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributeTarget {
    pub service_name: String,
    pub service_module: String,
    pub source_image: String,
    pub target_image: String,
    pub image_name: String,
}

// =============================================================================
// Freestyle / Plugin
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobProperties {
    /// Minutes, 0 uses the engine default
    pub timeout: i64,
    pub retry: u32,
    pub envs: Vec<KeyVal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreestyleJobSpec {
    pub properties: JobProperties,
    pub steps: Vec<StepTask>,
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginJobSpec {
    pub properties: JobProperties,
    pub plugin: PluginTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginTemplate {
    pub name: String,
    pub version: String,
    pub image: String,
    pub args: Vec<String>,
    pub cmds: Vec<String>,
    pub envs: Vec<KeyVal>,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Output>,
}

// =============================================================================
// Workload-level deploys
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomDeployJobSpec {
    pub namespace: String,
    pub cluster_id: String,
    pub docker_registry_id: String,
    pub skip_check_run_status: bool,
    /// Minutes
    pub timeout: i64,
    pub targets: Vec<CustomDeployTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomDeployTarget {
    /// `<workloadType>/<workloadName>/<containerName>`
    pub target: String,
    pub image_name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryDeployJobSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub docker_registry_id: String,
    /// Minutes
    pub deploy_timeout: i64,
    pub targets: Vec<CanaryTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryTarget {
    pub k8s_service_name: String,
    pub workload_type: String,
    pub workload_name: String,
    pub container_name: String,
    pub canary_percentage: u32,
    pub image: String,
}

/// Release side of a two-phase rollout; targets come from `from_job`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseJobSpec {
    pub from_job: String,
    /// Minutes
    pub release_timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenDeployJobSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub docker_registry_id: String,
    /// Minutes
    pub deploy_timeout: i64,
    pub targets: Vec<BlueGreenTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenTarget {
    pub k8s_service_name: String,
    pub blue_k8s_service_name: String,
    pub workload_type: String,
    pub workload_name: String,
    pub blue_workload_name: String,
    pub container_name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenDeployV2JobSpec {
    pub env: String,
    pub production: bool,
    /// Minutes
    pub deploy_timeout: i64,
    pub services: Vec<BlueGreenV2Service>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenV2Service {
    pub service_name: String,
    pub service_and_images: Vec<DeployModuleInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayReleaseJobSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub docker_registry_id: String,
    /// Empty for the first gray job; later jobs quote the first one
    pub from_job: String,
    /// Minutes
    pub deploy_timeout: i64,
    pub gray_scale: u32,
    pub targets: Vec<GrayReleaseTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayReleaseTarget {
    pub workload_type: String,
    pub workload_name: String,
    pub container_name: String,
    pub image: String,
    pub replica: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayRollbackJobSpec {
    pub cluster_id: String,
    pub namespace: String,
    /// Minutes
    pub rollback_timeout: i64,
    pub targets: Vec<GrayRollbackTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayRollbackTarget {
    pub workload_type: String,
    pub workload_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IstioReleaseJobSpec {
    pub first: bool,
    pub cluster_id: String,
    pub namespace: String,
    pub from_job: String,
    /// Minutes
    pub timeout: i64,
    pub replica_percentage: u32,
    pub weight: u32,
    pub targets: Vec<IstioJobTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IstioJobTarget {
    pub workload_name: String,
    pub container_name: String,
    pub virtual_service_name: String,
    pub host: String,
    pub image: String,
    pub target_replica: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IstioRollbackJobSpec {
    pub cluster_id: String,
    pub namespace: String,
    /// Minutes
    pub timeout: i64,
    pub targets: Vec<IstioJobTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sPatchJobSpec {
    pub cluster_id: String,
    pub namespace: String,
    pub patch_items: Vec<PatchItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchStrategy {
    #[default]
    StrategicMerge,
    Merge,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchItem {
    pub resource_name: String,
    pub resource_kind: String,
    pub resource_group: String,
    pub resource_version: String,
    pub patch_content: String,
    pub params: Vec<Param>,
    pub patch_strategy: PatchStrategy,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MseGrayReleaseJobSpec {
    pub production: bool,
    pub gray_tag: String,
    pub base_env: String,
    pub gray_env: String,
    pub skip_check_run_status: bool,
    /// Minutes
    pub deploy_timeout: i64,
    pub gray_services: Vec<MseGrayReleaseService>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MseGrayReleaseService {
    pub service_name: String,
    pub replicas: i32,
    pub service_and_images: Vec<DeployModuleInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MseGrayOfflineJobSpec {
    pub env: String,
    pub production: bool,
    pub gray_tag: String,
    pub services: Vec<String>,
}

// =============================================================================
// Integrations
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsJobSpec {
    pub id: String,
    pub jobs: Vec<JenkinsJobInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsJobInfo {
    pub job_name: String,
    pub parameters: Vec<JenkinsJobParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsJobParameter {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlJobSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NacosJobSpec {
    pub nacos_id: String,
    pub namespace_id: String,
    pub namespace_name: String,
    pub nacos_datas: Vec<NacosConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NacosConfig {
    pub data_id: String,
    pub group: String,
    pub format: String,
    pub content: String,
    pub original_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApolloJobSpec {
    pub apollo_id: String,
    pub namespace_list: Vec<ApolloNamespace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApolloNamespace {
    pub app_id: String,
    pub env: String,
    pub cluster_id: String,
    pub namespace: String,
    pub kv: Vec<ApolloKV>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApolloKV {
    pub key: String,
    pub val: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraJobSpec {
    pub jira_id: String,
    pub project_id: String,
    pub issue_type: String,
    pub issues: Vec<IssueID>,
    pub target_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueID {
    pub key: String,
    pub name: String,
    pub status: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowTriggerJobSpec {
    pub is_enable_check: bool,
    pub workflows: Vec<TriggerWorkflow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerWorkflow {
    pub workflow_name: String,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineServiceJobSpec {
    pub env: String,
    pub production: bool,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Fail on the first triggered monitor
    #[default]
    Trigger,
    /// Fail once every monitor has triggered
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorLevel {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuanceyunCheckJobSpec {
    pub id: String,
    pub name: String,
    /// Minutes
    pub check_time: i64,
    pub check_mode: CheckMode,
    pub monitors: Vec<GuanceyunMonitor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuanceyunMonitor {
    pub id: String,
    pub name: String,
    pub level: MonitorLevel,
    pub status: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_deploys_image() {
        assert!(only_deploys_image(&[DeployContent::Image]));
        assert!(!only_deploys_image(&[DeployContent::Image, DeployContent::Vars]));
        assert!(!only_deploys_image(&[]));
    }

    #[test]
    fn test_strip_fixed_mark() {
        assert_eq!(strip_fixed_mark("<+fixed>prod"), "prod");
        assert_eq!(strip_fixed_mark("dev"), "dev");
    }

    #[test]
    fn test_deploy_source_tags() {
        let spec: DeployJobSpec =
            serde_json::from_value(serde_json::json!({"source": "fromjob", "job_name": "build"}))
                .unwrap();
        assert_eq!(spec.source, DeploySource::FromJob);
        assert!(spec.deploy_contents.is_empty());
    }

    #[test]
    fn test_monitor_level_ordering() {
        assert!(MonitorLevel::Critical > MonitorLevel::Error);
        assert!(MonitorLevel::Warning > MonitorLevel::Info);
    }
}
