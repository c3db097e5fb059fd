//! Cluster access
//!
//! The subset of Kubernetes (and Istio) operations runtime controllers
//! need, modelled as plain records. Concrete clients live outside the
//! engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    /// Accepts `Deployment`, `deployment` and `deployments` style names
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "deployment" => Some(Self::Deployment),
            "statefulset" => Some(Self::StatefulSet),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => f.write_str("Deployment"),
            WorkloadKind::StatefulSet => f.write_str("StatefulSet"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
}

/// Deployment or StatefulSet with the status fields readiness depends on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
    /// Pod template labels, also used as the pod selector
    pub selector: Labels,
    pub replicas: i32,
    pub containers: Vec<ContainerSpec>,
    pub init_containers: Vec<ContainerSpec>,
    pub generation: i64,
    pub observed_generation: i64,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
}

impl Workload {
    pub fn new(kind: WorkloadKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: Labels::new(),
            annotations: Labels::new(),
            selector: Labels::new(),
            replicas: 1,
            containers: Vec::new(),
            init_containers: Vec::new(),
            generation: 1,
            observed_generation: 0,
            ready_replicas: 0,
            updated_replicas: 0,
            available_replicas: 0,
        }
    }

    /// Rollout has converged on the latest spec
    pub fn ready(&self) -> bool {
        if self.observed_generation < self.generation {
            return false;
        }
        match self.kind {
            WorkloadKind::Deployment => {
                self.updated_replicas >= self.replicas
                    && self.available_replicas >= self.replicas
                    && self.ready_replicas >= self.replicas
            }
            WorkloadKind::StatefulSet => {
                self.ready_replicas >= self.replicas && self.updated_replicas >= self.replicas
            }
        }
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers
            .iter()
            .chain(self.init_containers.iter())
            .find(|c| c.name == name)
    }

    /// Sets a container image; returns false when no container matches
    pub fn set_image(&mut self, container: &str, image: &str) -> bool {
        let found = self
            .containers
            .iter_mut()
            .chain(self.init_containers.iter_mut())
            .find(|c| c.name == container);
        match found {
            Some(c) => {
                c.image = image.to_string();
                true
            }
            None => false,
        }
    }

    /// Copy under a new name with a fresh status
    pub fn clone_as(&self, name: &str) -> Self {
        let mut copy = Self::new(self.kind, &self.namespace, name);
        copy.labels = self.labels.clone();
        copy.selector = self.selector.clone();
        copy.replicas = self.replicas;
        copy.containers = self.containers.clone();
        copy.init_containers = self.init_containers.clone();
        copy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub image: String,
    /// `waiting`, `running` or `terminated`
    pub state: String,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub labels: Labels,
    pub phase: String,
    pub containers: Vec<ContainerStatus>,
}

impl Pod {
    pub fn ready(&self) -> bool {
        self.phase == "Running" && self.containers.iter().all(|c| c.ready)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct K8sService {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub selector: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDestination {
    pub host: String,
    pub subset: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualService {
    pub name: String,
    pub namespace: String,
    pub hosts: Vec<String>,
    pub routes: Vec<RouteDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subset {
    pub name: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationRule {
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub subsets: Vec<Subset>,
}

/// Arbitrary resource addressed by a patch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
}

#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn server_version(&self) -> anyhow::Result<String>;

    async fn get_workload(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> anyhow::Result<Option<Workload>>;

    async fn list_workloads(&self, namespace: &str, selector: &Labels)
    -> anyhow::Result<Vec<Workload>>;

    /// Creates the workload or replaces its spec
    async fn apply_workload(&self, workload: &Workload) -> anyhow::Result<()>;

    async fn set_image(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        container: &str,
        image: &str,
    ) -> anyhow::Result<()>;

    async fn scale(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        replicas: i32,
    ) -> anyhow::Result<()>;

    async fn delete_workload(&self, namespace: &str, kind: WorkloadKind, name: &str)
    -> anyhow::Result<()>;

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> anyhow::Result<Vec<Pod>>;

    async fn get_service(&self, namespace: &str, name: &str) -> anyhow::Result<Option<K8sService>>;

    async fn apply_service(&self, service: &K8sService) -> anyhow::Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str) -> anyhow::Result<()>;

    /// Applies a multi-document manifest and returns the workloads it holds
    async fn apply_manifest(
        &self,
        namespace: &str,
        manifest: &str,
    ) -> anyhow::Result<Vec<(WorkloadKind, String)>>;

    /// Deletes every resource carrying the labels
    async fn delete_labelled(&self, namespace: &str, selector: &Labels) -> anyhow::Result<()>;

    async fn patch(
        &self,
        namespace: &str,
        resource: &ResourceRef,
        patch_type: &str,
        content: &str,
    ) -> anyhow::Result<()>;

    async fn get_virtual_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<VirtualService>>;

    async fn apply_virtual_service(&self, service: &VirtualService) -> anyhow::Result<()>;

    async fn apply_destination_rule(&self, rule: &DestinationRule) -> anyhow::Result<()>;

    async fn delete_destination_rule(&self, namespace: &str, name: &str) -> anyhow::Result<()>;
}

/// Resolves cluster identifiers to clients
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    async fn client(&self, cluster_id: &str) -> anyhow::Result<Arc<dyn KubeClient>>;
}
