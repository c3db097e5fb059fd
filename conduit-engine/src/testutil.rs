//! Test fixtures
//!
//! A small catalog with three projects and in-memory stand-ins for every
//! collaborator the engine talks to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::integration::Integration;
use conduit_core::domain::job_spec::{JenkinsJobParameter, MonitorLevel};
use conduit_core::domain::status::Status;
use conduit_core::domain::step::StepTask;
use conduit_core::domain::task::{Creator, JobTask, StageTask, WorkflowTask};
use conduit_core::domain::workflow::{Param, Workflow};
use parking_lot::Mutex;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ack::{AckSink, TaskRecorder};
use crate::catalog::FileCatalog;
use crate::config::{EngineConfig, License};
use crate::context::WorkflowTaskCtx;
use crate::control::TaskControl;
use crate::controller::RunContext;
use crate::infra::helm::{HelmClient, HelmUpgrade};
use crate::infra::jenkins::{JenkinsBuild, JenkinsClient};
use crate::infra::kube::{
    ClusterAccess, ContainerSpec, DestinationRule, K8sService, KubeClient, Labels, Pod,
    ResourceRef, VirtualService, Workload, WorkloadKind,
};
use crate::infra::services::{
    ApolloClient, ApolloTarget, IssueTracker, MonitorClient, MonitorEvent, NacosClient,
    SqlExecutor, WorkflowLauncher,
};
use crate::infra::steps::{StepEnv, StepExecutor, StepOutcome};
use crate::infra::Infra;
use crate::job::JobContext;
use crate::render::split_documents;

// =============================================================================
// Catalog
// =============================================================================

pub const CATALOG_YAML: &str = r#"
projects:
  - name: shop
    deploy_type: k8s
    create_env_type: system
    timeout: 10
  - name: charts
    deploy_type: helm
    create_env_type: system
    timeout: 5
  - name: legacy
    deploy_type: k8s
    create_env_type: external
    timeout: 10
environments:
  - project: shop
    env_name: dev
    namespace: shop-dev
    cluster_id: c1
    services:
      - service_name: a
        revision: 1
        containers:
          - name: web
            image: repo/a:v1
            image_name: a
        variable_kvs:
          - key: replicas
            value: 1
          - key: domain
            value: dev.example.com
            use_global_variable: true
      - service_name: b
        revision: 1
        containers:
          - name: api
            image: repo/b:v1
            image_name: b
  - project: shop
    env_name: prod
    namespace: shop-prod
    cluster_id: c1
    production: true
  - project: charts
    env_name: dev
    namespace: charts-dev
    cluster_id: c1
    services:
      - service_name: chart-a
        revision: 2
        containers:
          - name: web
            image: repo/ca:v1
            image_path:
              repo: image.repository
              tag: image.tag
  - project: legacy
    env_name: prod
    namespace: legacy
    cluster_id: c1
    services:
      - service_name: a
        revision: 1
        containers:
          - name: web
            image: repo/legacy-a:v1
services:
  - service_name: a
    project: shop
    revision: 1
    containers:
      - name: web
        image: repo/a:v1
    variable_kvs:
      - key: replicas
        value: 1
      - key: domain
        value: example.com
    yaml: |
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: a
        labels:
          s-product: shop
          s-service: a
      spec:
        replicas: {{.replicas}}
        template:
          metadata:
            labels:
              app: a
          spec:
            containers:
              - name: web
                image: repo/a:v1
  - service_name: a
    project: shop
    revision: 2
    containers:
      - name: web
        image: repo/a:v1
    variable_kvs:
      - key: replicas
        value: 2
      - key: domain
        value: example.com
    yaml: |
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: a
        labels:
          s-product: shop
          s-service: a
      spec:
        replicas: {{.replicas}}
        template:
          metadata:
            labels:
              app: a
          spec:
            containers:
              - name: web
                image: repo/a:v1
  - service_name: b
    project: shop
    revision: 1
    containers:
      - name: api
        image: repo/b:v1
    yaml: |
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: b
        labels:
          s-product: shop
          s-service: b
      spec:
        replicas: 1
        template:
          metadata:
            labels:
              app: b
          spec:
            containers:
              - name: api
                image: repo/b:v1
  - service_name: c
    project: shop
    revision: 1
    containers:
      - name: worker
        image: repo/c:v1
    yaml: |
      apiVersion: apps/v1
      kind: StatefulSet
      metadata:
        name: c
      spec:
        replicas: 1
        template:
          spec:
            containers:
              - name: worker
                image: repo/c:v1
  - service_name: chart-a
    project: charts
    revision: 2
    containers:
      - name: web
        image: repo/ca:v1
        image_path:
          repo: image.repository
          tag: image.tag
  - service_name: chart-b
    project: charts
    revision: 1
    release_naming: $EnvName$-$Service$
    containers:
      - name: api
        image: repo/cb:v1
        image_path:
          repo: api.image
integrations:
  - id: ci
    kind: jenkins
    address: http://jenkins.local
  - id: mysql
    kind: database
    address: mysql.local:3306
    db_type: mysql
  - id: nacos
    kind: nacos
    address: http://nacos.local
  - id: apollo
    kind: apollo
    address: http://apollo.local
  - id: jira
    kind: jira
    address: http://jira.local
  - id: guance
    kind: guanceyun
    address: http://guance.local
"#;

pub fn catalog() -> Arc<FileCatalog> {
    Arc::new(FileCatalog::from_yaml(CATALOG_YAML).expect("fixture catalog parses"))
}

pub fn job_context(workflow: Workflow) -> JobContext {
    job_context_with_license(workflow, License::Professional)
}

pub fn job_context_with_license(workflow: Workflow, license: License) -> JobContext {
    let catalog = catalog();
    catalog.upsert_workflow(workflow.clone());
    JobContext::new(workflow, catalog, Infra::default(), license)
}

pub fn sample_task(workflow_name: &str, task_id: i64) -> WorkflowTask {
    let workflow = Workflow {
        name: workflow_name.to_string(),
        project: "shop".to_string(),
        ..Default::default()
    };
    WorkflowTask {
        id: Uuid::new_v4(),
        task_id,
        workflow_name: workflow_name.to_string(),
        workflow_hash: String::new(),
        workflow_display_name: workflow_name.to_string(),
        project_name: "shop".to_string(),
        params: Vec::new(),
        workflow_args: workflow.clone(),
        origin_workflow_args: workflow,
        key_vals: Vec::new(),
        global_context: BTreeMap::new(),
        cluster_id_map: Default::default(),
        status: Status::Created,
        creator: Creator::named("tester"),
        revoker: String::new(),
        create_time: Utc::now(),
        start_time: None,
        end_time: None,
        stages: Vec::new(),
        is_archived: false,
        is_restart: false,
        is_debug: false,
        error: String::new(),
    }
}

/// A task with one stage per entry, ready to be driven by a scheduler test
pub fn task_with_stages(stages: Vec<StageTask>) -> WorkflowTask {
    let mut task = sample_task("wf", 1);
    task.stages = stages;
    task
}

pub fn test_config() -> EngineConfig {
    EngineConfig::new()
        .with_poll_interval(Duration::from_secs(1))
        .with_workspace(std::env::temp_dir().join(format!("conduit-test-{}", Uuid::new_v4())))
}

/// Run context around a task document
pub fn run_context_for(task: WorkflowTask, infra: Infra) -> (RunContext, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let config = test_config();
    let (workspace, dist_dir) = config.task_dirs(&task.workflow_name, task.task_id);
    let (recorder, _handle) = TaskRecorder::start(task, sink.clone());
    let ctx = RunContext {
        task: WorkflowTaskCtx::new(recorder, workspace, dist_dir, None),
        infra,
        catalog: catalog(),
        control: Arc::new(TaskControl::new()),
        config: Arc::new(config),
        job_deadline: None,
    };
    (ctx, sink)
}

/// Run context whose task holds the job in a single stage
pub fn run_context(job: JobTask, infra: Infra) -> (RunContext, Arc<RecordingSink>) {
    let mut stage = StageTask::new("stage", false);
    stage.jobs.push(job);
    run_context_for(task_with_stages(vec![stage]), infra)
}

// =============================================================================
// Ack sink
// =============================================================================

#[derive(Default)]
pub struct RecordingSink {
    tasks: Mutex<Vec<WorkflowTask>>,
}

impl RecordingSink {
    pub fn last(&self) -> Option<WorkflowTask> {
        self.tasks.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[async_trait]
impl AckSink for RecordingSink {
    async fn ack(&self, task: &WorkflowTask) -> anyhow::Result<()> {
        self.tasks.lock().push(task.clone());
        Ok(())
    }
}

// =============================================================================
// Cluster
// =============================================================================

type WorkloadId = (String, WorkloadKind, String);

#[derive(Default)]
struct KubeState {
    workloads: BTreeMap<WorkloadId, Workload>,
    pods: Vec<(String, Pod)>,
    services: BTreeMap<(String, String), K8sService>,
    virtual_services: BTreeMap<(String, String), VirtualService>,
    destination_rules: BTreeMap<(String, String), DestinationRule>,
    patches: Vec<(String, ResourceRef, String, String)>,
    manifests: Vec<(String, String)>,
}

/// In-memory cluster
///
/// With `auto_ready` every change converges immediately; otherwise
/// workloads stay unready until [`FakeKube::mark_ready`].
pub struct FakeKube {
    state: Mutex<KubeState>,
    auto_ready: AtomicBool,
}

impl Default for FakeKube {
    fn default() -> Self {
        Self {
            state: Mutex::new(KubeState::default()),
            auto_ready: AtomicBool::new(true),
        }
    }
}

fn converge(workload: &mut Workload) {
    workload.observed_generation = workload.generation;
    workload.ready_replicas = workload.replicas;
    workload.updated_replicas = workload.replicas;
    workload.available_replicas = workload.replicas;
}

fn matches_labels(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

impl FakeKube {
    pub fn stalled() -> Self {
        let kube = Self::default();
        kube.auto_ready.store(false, Ordering::SeqCst);
        kube
    }

    pub fn set_auto_ready(&self, ready: bool) {
        self.auto_ready.store(ready, Ordering::SeqCst);
    }

    fn settle(&self, workload: &mut Workload) {
        workload.generation += 1;
        if self.auto_ready.load(Ordering::SeqCst) {
            converge(workload);
        }
    }

    /// Adds a converged workload
    pub fn add_workload(&self, mut workload: Workload) {
        converge(&mut workload);
        let id = (workload.namespace.clone(), workload.kind, workload.name.clone());
        self.state.lock().workloads.insert(id, workload);
    }

    pub fn workload(&self, namespace: &str, kind: WorkloadKind, name: &str) -> Option<Workload> {
        self.state
            .lock()
            .workloads
            .get(&(namespace.to_string(), kind, name.to_string()))
            .cloned()
    }

    pub fn workload_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .workloads
            .keys()
            .filter(|(ns, _, _)| ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn mark_ready(&self, namespace: &str, kind: WorkloadKind, name: &str) {
        if let Some(workload) = self
            .state
            .lock()
            .workloads
            .get_mut(&(namespace.to_string(), kind, name.to_string()))
        {
            converge(workload);
        }
    }

    pub fn add_pod(&self, namespace: &str, pod: Pod) {
        self.state.lock().pods.push((namespace.to_string(), pod));
    }

    pub fn add_service(&self, service: K8sService) {
        let id = (service.namespace.clone(), service.name.clone());
        self.state.lock().services.insert(id, service);
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<K8sService> {
        self.state
            .lock()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn add_virtual_service(&self, service: VirtualService) {
        let id = (service.namespace.clone(), service.name.clone());
        self.state.lock().virtual_services.insert(id, service);
    }

    pub fn virtual_service(&self, namespace: &str, name: &str) -> Option<VirtualService> {
        self.state
            .lock()
            .virtual_services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn destination_rule(&self, namespace: &str, name: &str) -> Option<DestinationRule> {
        self.state
            .lock()
            .destination_rules
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn patches(&self) -> Vec<(String, ResourceRef, String, String)> {
        self.state.lock().patches.clone()
    }

    pub fn manifests(&self) -> Vec<(String, String)> {
        self.state.lock().manifests.clone()
    }
}

fn workload_from_document(namespace: &str, document: &Value) -> Option<Workload> {
    let kind = WorkloadKind::parse(document.get("kind")?.as_str()?)?;
    let metadata = document.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let mut workload = Workload::new(kind, namespace, name);

    let string_map = |value: Option<&Value>| -> Labels {
        value
            .and_then(Value::as_mapping)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };
    workload.labels = string_map(metadata.get("labels"));

    let spec = document.get("spec")?;
    if let Some(replicas) = spec.get("replicas").and_then(Value::as_i64) {
        workload.replicas = replicas as i32;
    }
    let template = spec.get("template");
    workload.selector = string_map(template.and_then(|t| t.get("metadata")).and_then(|m| m.get("labels")));
    if let Some(Value::Sequence(containers)) = template
        .and_then(|t| t.get("spec"))
        .and_then(|s| s.get("containers"))
    {
        workload.containers = containers
            .iter()
            .filter_map(|c| {
                Some(ContainerSpec {
                    name: c.get("name")?.as_str()?.to_string(),
                    image: c.get("image")?.as_str()?.to_string(),
                })
            })
            .collect();
    }
    Some(workload)
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn server_version(&self) -> anyhow::Result<String> {
        Ok("v1.28.0".to_string())
    }

    async fn get_workload(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> anyhow::Result<Option<Workload>> {
        Ok(self.workload(namespace, kind, name))
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> anyhow::Result<Vec<Workload>> {
        Ok(self
            .state
            .lock()
            .workloads
            .values()
            .filter(|w| w.namespace == namespace && matches_labels(&w.labels, selector))
            .cloned()
            .collect())
    }

    async fn apply_workload(&self, workload: &Workload) -> anyhow::Result<()> {
        let mut workload = workload.clone();
        let id = (workload.namespace.clone(), workload.kind, workload.name.clone());
        let mut state = self.state.lock();
        if let Some(existing) = state.workloads.get(&id) {
            workload.generation = existing.generation;
            workload.observed_generation = existing.observed_generation;
        }
        self.settle(&mut workload);
        state.workloads.insert(id, workload);
        Ok(())
    }

    async fn set_image(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        container: &str,
        image: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let workload = state
            .workloads
            .get_mut(&(namespace.to_string(), kind, name.to_string()))
            .ok_or_else(|| anyhow::anyhow!("{} {}/{} not found", kind, namespace, name))?;
        if !workload.set_image(container, image) {
            anyhow::bail!("container {} not found in {}", container, name);
        }
        self.settle(workload);
        Ok(())
    }

    async fn scale(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        replicas: i32,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let workload = state
            .workloads
            .get_mut(&(namespace.to_string(), kind, name.to_string()))
            .ok_or_else(|| anyhow::anyhow!("{} {}/{} not found", kind, namespace, name))?;
        workload.replicas = replicas;
        self.settle(workload);
        Ok(())
    }

    async fn delete_workload(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> anyhow::Result<()> {
        self.state
            .lock()
            .workloads
            .remove(&(namespace.to_string(), kind, name.to_string()));
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> anyhow::Result<Vec<Pod>> {
        Ok(self
            .state
            .lock()
            .pods
            .iter()
            .filter(|(ns, pod)| ns == namespace && matches_labels(&pod.labels, selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> anyhow::Result<Option<K8sService>> {
        Ok(self.service(namespace, name))
    }

    async fn apply_service(&self, service: &K8sService) -> anyhow::Result<()> {
        self.add_service(service.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .services
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn apply_manifest(
        &self,
        namespace: &str,
        manifest: &str,
    ) -> anyhow::Result<Vec<(WorkloadKind, String)>> {
        let documents = split_documents(manifest)?;
        let mut applied = Vec::new();
        for document in &documents {
            if let Some(workload) = workload_from_document(namespace, document) {
                applied.push((workload.kind, workload.name.clone()));
                self.apply_workload(&workload).await?;
            }
        }
        self.state
            .lock()
            .manifests
            .push((namespace.to_string(), manifest.to_string()));
        Ok(applied)
    }

    async fn delete_labelled(&self, namespace: &str, selector: &Labels) -> anyhow::Result<()> {
        self.state
            .lock()
            .workloads
            .retain(|(ns, _, _), w| !(ns == namespace && matches_labels(&w.labels, selector)));
        Ok(())
    }

    async fn patch(
        &self,
        namespace: &str,
        resource: &ResourceRef,
        patch_type: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        serde_json::from_str::<serde_json::Value>(content)
            .map_err(|e| anyhow::anyhow!("invalid patch for {}: {}", resource.name, e))?;
        self.state.lock().patches.push((
            namespace.to_string(),
            resource.clone(),
            patch_type.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn get_virtual_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<VirtualService>> {
        Ok(self.virtual_service(namespace, name))
    }

    async fn apply_virtual_service(&self, service: &VirtualService) -> anyhow::Result<()> {
        self.add_virtual_service(service.clone());
        Ok(())
    }

    async fn apply_destination_rule(&self, rule: &DestinationRule) -> anyhow::Result<()> {
        let id = (rule.namespace.clone(), rule.name.clone());
        self.state.lock().destination_rules.insert(id, rule.clone());
        Ok(())
    }

    async fn delete_destination_rule(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .destination_rules
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// Serves the same fake cluster for every cluster id
pub struct FakeCluster(pub Arc<FakeKube>);

#[async_trait]
impl ClusterAccess for FakeCluster {
    async fn client(&self, cluster_id: &str) -> anyhow::Result<Arc<dyn KubeClient>> {
        if cluster_id.is_empty() {
            anyhow::bail!("empty cluster id");
        }
        Ok(self.0.clone())
    }
}

pub fn infra_with_kube(kube: Arc<FakeKube>) -> Infra {
    Infra {
        clusters: Some(Arc::new(FakeCluster(kube))),
        ..Default::default()
    }
}

/// Deployment carrying the service labels deploy jobs look up
pub fn service_deployment(
    namespace: &str,
    project: &str,
    service: &str,
    name: &str,
    containers: &[(&str, &str)],
) -> Workload {
    let mut workload = Workload::new(WorkloadKind::Deployment, namespace, name);
    workload.labels.insert("s-product".to_string(), project.to_string());
    workload.labels.insert("s-service".to_string(), service.to_string());
    workload.selector.insert("app".to_string(), name.to_string());
    workload.containers = containers
        .iter()
        .map(|(name, image)| ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
        })
        .collect();
    workload
}

// =============================================================================
// Helm
// =============================================================================

#[derive(Default)]
pub struct FakeHelm {
    values: Mutex<HashMap<String, String>>,
    upgrades: Mutex<Vec<HelmUpgrade>>,
}

impl FakeHelm {
    pub fn set_values(&self, release: &str, yaml: &str) {
        self.values.lock().insert(release.to_string(), yaml.to_string());
    }

    pub fn upgrades(&self) -> Vec<HelmUpgrade> {
        self.upgrades.lock().clone()
    }
}

#[async_trait]
impl HelmClient for FakeHelm {
    async fn release_values(
        &self,
        _cluster_id: &str,
        _namespace: &str,
        release_name: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self.values.lock().get(release_name).cloned())
    }

    async fn upgrade(&self, upgrade: &HelmUpgrade) -> anyhow::Result<()> {
        self.values
            .lock()
            .insert(upgrade.release_name.clone(), upgrade.values_yaml.clone());
        self.upgrades.lock().push(upgrade.clone());
        Ok(())
    }
}

// =============================================================================
// Jenkins
// =============================================================================

/// Jenkins whose builds finish on the first status poll
#[derive(Default)]
pub struct FakeJenkins {
    parameters: Mutex<HashMap<String, Vec<JenkinsJobParameter>>>,
    results: Mutex<HashMap<String, String>>,
    hanging: Mutex<HashSet<String>>,
    triggered: Mutex<Vec<(String, Vec<JenkinsJobParameter>)>>,
    stopped: Mutex<Vec<(String, i64)>>,
}

impl FakeJenkins {
    pub fn define(&self, job: &str, parameters: Vec<JenkinsJobParameter>) {
        self.parameters.lock().insert(job.to_string(), parameters);
    }

    pub fn set_result(&self, job: &str, result: &str) {
        self.results.lock().insert(job.to_string(), result.to_string());
    }

    /// Builds of the job never finish
    pub fn hang(&self, job: &str) {
        self.hanging.lock().insert(job.to_string());
    }

    pub fn triggered(&self) -> Vec<(String, Vec<JenkinsJobParameter>)> {
        self.triggered.lock().clone()
    }

    pub fn stopped(&self) -> Vec<(String, i64)> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl JenkinsClient for FakeJenkins {
    async fn job_parameters(
        &self,
        _server: &Integration,
        job_name: &str,
    ) -> anyhow::Result<Vec<JenkinsJobParameter>> {
        self.parameters
            .lock()
            .get(job_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("jenkins job {} not found", job_name))
    }

    async fn trigger(
        &self,
        _server: &Integration,
        job_name: &str,
        parameters: &[JenkinsJobParameter],
    ) -> anyhow::Result<String> {
        let mut triggered = self.triggered.lock();
        triggered.push((job_name.to_string(), parameters.to_vec()));
        Ok(format!("queue/{}", triggered.len()))
    }

    async fn queued_build(
        &self,
        _server: &Integration,
        queue_url: &str,
    ) -> anyhow::Result<Option<i64>> {
        Ok(queue_url.trim_start_matches("queue/").parse().ok())
    }

    async fn build(
        &self,
        _server: &Integration,
        job_name: &str,
        number: i64,
    ) -> anyhow::Result<JenkinsBuild> {
        let building = self.hanging.lock().contains(job_name);
        let result = if building {
            None
        } else {
            Some(
                self.results
                    .lock()
                    .get(job_name)
                    .cloned()
                    .unwrap_or_else(|| "SUCCESS".to_string()),
            )
        };
        Ok(JenkinsBuild {
            building,
            result,
            url: format!("http://jenkins.local/job/{}/{}/", job_name, number),
        })
    }

    async fn stop(&self, _server: &Integration, job_name: &str, number: i64) -> anyhow::Result<()> {
        self.stopped.lock().push((job_name.to_string(), number));
        Ok(())
    }
}

// =============================================================================
// Integrations
// =============================================================================

#[derive(Default)]
pub struct FakeNacos {
    configs: Mutex<HashMap<(String, String, String), String>>,
}

impl FakeNacos {
    pub fn put(&self, namespace_id: &str, group: &str, data_id: &str, content: &str) {
        self.configs.lock().insert(
            (namespace_id.to_string(), group.to_string(), data_id.to_string()),
            content.to_string(),
        );
    }

    pub fn get(&self, namespace_id: &str, group: &str, data_id: &str) -> Option<String> {
        self.configs
            .lock()
            .get(&(namespace_id.to_string(), group.to_string(), data_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl NacosClient for FakeNacos {
    async fn get_config(
        &self,
        _server: &Integration,
        namespace_id: &str,
        group: &str,
        data_id: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self.get(namespace_id, group, data_id))
    }

    async fn publish_config(
        &self,
        _server: &Integration,
        namespace_id: &str,
        group: &str,
        data_id: &str,
        _format: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        if data_id.is_empty() {
            anyhow::bail!("data id is required");
        }
        self.put(namespace_id, group, data_id, content);
        Ok(())
    }
}

/// Database that rejects statements containing a marker
#[derive(Default)]
pub struct FakeSql {
    executed: Mutex<Vec<String>>,
}

impl FakeSql {
    pub const FAILING: &'static str = "BROKEN";

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl SqlExecutor for FakeSql {
    async fn execute(&self, _database: &Integration, statement: &str) -> anyhow::Result<u64> {
        if statement.contains(Self::FAILING) {
            anyhow::bail!("syntax error near {}", Self::FAILING);
        }
        self.executed.lock().push(statement.to_string());
        Ok(1)
    }
}

#[derive(Default)]
pub struct FakeApollo {
    updates: Mutex<Vec<(String, String, String)>>,
    releases: Mutex<Vec<(String, String)>>,
}

impl FakeApollo {
    /// `(namespace, key, value)` per update
    pub fn updates(&self) -> Vec<(String, String, String)> {
        self.updates.lock().clone()
    }

    /// `(namespace, title)` per release
    pub fn releases(&self) -> Vec<(String, String)> {
        self.releases.lock().clone()
    }
}

#[async_trait]
impl ApolloClient for FakeApollo {
    async fn update_kv(
        &self,
        _server: &Integration,
        target: &ApolloTarget<'_>,
        key: &str,
        value: &str,
        _operator: &str,
    ) -> anyhow::Result<()> {
        self.updates
            .lock()
            .push((target.namespace.to_string(), key.to_string(), value.to_string()));
        Ok(())
    }

    async fn release(
        &self,
        _server: &Integration,
        target: &ApolloTarget<'_>,
        title: &str,
        _operator: &str,
    ) -> anyhow::Result<()> {
        self.releases
            .lock()
            .push((target.namespace.to_string(), title.to_string()));
        Ok(())
    }
}

/// Issue tracker that knows only the issues it was given
#[derive(Default)]
pub struct FakeIssues {
    issues: Mutex<HashMap<String, String>>,
}

impl FakeIssues {
    pub fn add(&self, key: &str, status: &str) {
        self.issues.lock().insert(key.to_string(), status.to_string());
    }

    pub fn status(&self, key: &str) -> Option<String> {
        self.issues.lock().get(key).cloned()
    }
}

#[async_trait]
impl IssueTracker for FakeIssues {
    async fn transition(
        &self,
        _server: &Integration,
        issue_key: &str,
        target_status: &str,
    ) -> anyhow::Result<()> {
        let mut issues = self.issues.lock();
        let status = issues
            .get_mut(issue_key)
            .ok_or_else(|| anyhow::anyhow!("issue {} does not exist", issue_key))?;
        *status = target_status.to_string();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl FakeMonitor {
    pub fn fire(&self, monitor_id: &str, level: MonitorLevel) {
        self.events.lock().push(MonitorEvent {
            monitor_id: monitor_id.to_string(),
            level,
        });
    }
}

#[async_trait]
impl MonitorClient for FakeMonitor {
    async fn list_events(
        &self,
        _server: &Integration,
        monitor_ids: &[String],
        _since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MonitorEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| monitor_ids.contains(&e.monitor_id))
            .cloned()
            .collect())
    }
}

/// Launcher whose child tasks finish with a preset status
#[derive(Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<(String, Vec<Param>)>>,
    statuses: Mutex<HashMap<String, Status>>,
}

impl FakeLauncher {
    pub fn set_status(&self, workflow_name: &str, status: Status) {
        self.statuses
            .lock()
            .insert(workflow_name.to_string(), status);
    }

    pub fn launched(&self) -> Vec<(String, Vec<Param>)> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl WorkflowLauncher for FakeLauncher {
    async fn launch(
        &self,
        workflow_name: &str,
        params: &[Param],
        _creator: &str,
    ) -> anyhow::Result<i64> {
        let mut launched = self.launched.lock();
        launched.push((workflow_name.to_string(), params.to_vec()));
        Ok(launched.len() as i64)
    }

    async fn task_status(&self, workflow_name: &str, _task_id: i64) -> anyhow::Result<Status> {
        Ok(self
            .statuses
            .lock()
            .get(workflow_name)
            .copied()
            .unwrap_or(Status::Passed))
    }
}

// =============================================================================
// Steps
// =============================================================================

/// Step executor that records steps instead of running them
///
/// A step named `hang` runs until cancelled.
#[derive(Default)]
pub struct FakeSteps {
    runs: Mutex<Vec<StepTask>>,
    failing: Mutex<HashSet<String>>,
    outputs: Mutex<BTreeMap<String, String>>,
}

impl FakeSteps {
    pub fn fail(&self, step_name: &str) {
        self.failing.lock().insert(step_name.to_string());
    }

    /// Value every step reports for a declared output
    pub fn output(&self, name: &str, value: &str) {
        self.outputs.lock().insert(name.to_string(), value.to_string());
    }

    pub fn runs(&self) -> Vec<StepTask> {
        self.runs.lock().clone()
    }

    pub fn ran(&self) -> Vec<String> {
        self.runs.lock().iter().map(|s| s.name.clone()).collect()
    }
}

#[async_trait]
impl StepExecutor for FakeSteps {
    async fn run(
        &self,
        step: &StepTask,
        env: &StepEnv,
        cancel: CancellationToken,
    ) -> anyhow::Result<StepOutcome> {
        self.runs.lock().push(step.clone());
        if step.name == "hang" {
            cancel.cancelled().await;
            anyhow::bail!("step {} cancelled", step.name);
        }
        let failed = self.failing.lock().contains(&step.name);
        let outputs = self.outputs.lock();
        Ok(StepOutcome {
            exit_code: if failed { 2 } else { 0 },
            stdout: format!("ran {}", step.name),
            stderr: if failed {
                format!("{} failed", step.name)
            } else {
                String::new()
            },
            outputs: env
                .outputs
                .iter()
                .filter_map(|name| outputs.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
        })
    }
}

pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("conduit-scratch-{}", Uuid::new_v4()))
}
