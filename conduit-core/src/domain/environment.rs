//! Projects, environments and service templates
//!
//! These records are read from the environment catalog when jobs are
//! configured and expanded. The engine never writes them.

use serde::{Deserialize, Serialize};

/// How the services of a project are deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    #[default]
    #[serde(rename = "k8s")]
    Kubernetes,
    Helm,
}

/// Whether environments were created by the platform or imported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateEnvType {
    #[default]
    System,
    External,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub name: String,
    pub deploy_type: DeployType,
    pub create_env_type: CreateEnvType,
    /// Deploy timeout in minutes
    pub timeout: i64,
}

impl Project {
    /// Host projects manage externally created environments
    pub fn is_host_project(&self) -> bool {
        self.create_env_type == CreateEnvType::External
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub project: String,
    pub env_name: String,
    pub namespace: String,
    pub cluster_id: String,
    pub production: bool,
    pub is_sleeping: bool,
    pub registry_id: String,
    pub services: Vec<EnvService>,
}

impl Environment {
    pub fn service(&self, name: &str) -> Option<&EnvService> {
        self.services.iter().find(|s| s.service_name == name)
    }
}

/// A service as currently deployed into an environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvService {
    pub service_name: String,
    pub revision: i64,
    pub containers: Vec<Container>,
    pub variable_yaml: String,
    pub variable_kvs: Vec<RenderVariableKV>,
    pub release_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_name: String,
    pub image_path: Option<ImagePathSpec>,
}

/// Locations of an image's components inside helm values, as dotted paths
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePathSpec {
    pub repo: String,
    pub image: String,
    pub tag: String,
}

/// A versioned service definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTemplate {
    pub service_name: String,
    pub project: String,
    pub revision: i64,
    pub production: bool,
    pub containers: Vec<Container>,
    /// Kubernetes manifest template with `{{.key}}` placeholders
    pub yaml: String,
    pub variable_yaml: String,
    pub variable_kvs: Vec<ServiceVariableKV>,
    /// Helm release naming pattern, e.g. `$Namespace$-$Service$`
    pub release_naming: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceVariableKV {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Vec<String>,
    pub desc: String,
}

/// Variable value as rendered into one environment's service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderVariableKV {
    pub key: String,
    pub value: serde_json::Value,
    pub use_global_variable: bool,
}

impl RenderVariableKV {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            use_global_variable: false,
        }
    }
}

impl From<&ServiceVariableKV> for RenderVariableKV {
    fn from(kv: &ServiceVariableKV) -> Self {
        Self::new(kv.key.clone(), kv.value.clone())
    }
}

/// Image name without registry and tag, e.g. `repo/app:v1` gives `app`
pub fn extract_image_name(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last.split(':').next().unwrap_or(last).to_string()
}
