//! Engine facade
//!
//! The submission surface of the engine. Creates tasks from workflow
//! arguments, runs them in the background under a concurrency limit, and
//! relays control commands (cancel, approve, breakpoints, debug) to the
//! tasks that are running.

use async_trait::async_trait;
use chrono::Utc;
use conduit_core::domain::environment::Environment;
use conduit_core::domain::status::Status;
use conduit_core::domain::task::{Creator, StageTask, WorkflowTask};
use conduit_core::domain::workflow::{ApprovalRecord, Param, Workflow};
use conduit_core::dto::task::{
    ApproveRequest, BreakpointPosition, CreateTask, CreateTaskResponse, ListTasksQuery,
    TaskPreview,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ack::{StoreAckSink, TaskRecorder};
use crate::catalog::EnvironmentCatalog;
use crate::config::EngineConfig;
use crate::context::{WorkflowTaskCtx, param_key};
use crate::control::TaskControl;
use crate::controller::RunContext;
use crate::error::{EngineError, Result};
use crate::infra::{Infra, WorkflowLauncher};
use crate::job::{JobContext, configurator_for, expand_workflow};
use crate::migrate;
use crate::scheduler::run_workflow;
use crate::store::TaskStore;

const APPROVAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type TaskKey = (String, i64);

/// Handles of a task between start and finish
#[derive(Clone)]
struct RunningTask {
    recorder: TaskRecorder,
    control: Arc<TaskControl>,
}

/// Configurator pass applied to every job of a workflow
#[derive(Debug, Clone, Copy)]
enum Pass {
    Preset,
    Options,
    LatestSetting,
}

pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<dyn TaskStore>,
    catalog: Arc<dyn EnvironmentCatalog>,
    infra: Infra,
    slots: Arc<Semaphore>,
    running: Mutex<HashMap<TaskKey, RunningTask>>,
}

impl Engine {
    /// Creates an engine
    ///
    /// Without a configured launcher, workflow-trigger jobs launch tasks
    /// on this engine.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        catalog: Arc<dyn EnvironmentCatalog>,
        mut infra: Infra,
    ) -> Arc<Self> {
        Arc::new_cyclic(|engine: &Weak<Engine>| {
            if infra.launcher.is_none() {
                infra.launcher = Some(Arc::new(EngineLauncher(engine.clone())));
            }
            Self {
                slots: Arc::new(Semaphore::new(config.max_running_tasks)),
                config: Arc::new(config),
                store,
                catalog,
                infra,
                running: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Tasks started and not yet finished, queued ones included
    pub fn running_tasks(&self) -> usize {
        self.running.lock().len()
    }

    fn job_context(&self, workflow: Workflow) -> JobContext {
        JobContext::new(workflow, self.catalog.clone(), self.infra.clone(), self.config.license)
    }

    fn running_task(&self, workflow_name: &str, task_id: i64) -> Option<RunningTask> {
        self.running
            .lock()
            .get(&(workflow_name.to_string(), task_id))
            .cloned()
    }

    fn require_running(&self, workflow_name: &str, task_id: i64) -> Result<RunningTask> {
        self.running_task(workflow_name, task_id).ok_or_else(|| {
            EngineError::invalid_state(format!("task {}#{} is not running", workflow_name, task_id))
        })
    }

    async fn find_stored(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask> {
        self.store
            .find(workflow_name, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("task {}#{}", workflow_name, task_id)))
    }

    // =========================================================================
    // Task creation
    // =========================================================================

    /// Expands a workflow into a new task and starts it
    ///
    /// The submitted arguments are merged into the stored definition of the
    /// same name when one exists. Expansion fails as a whole; nothing is
    /// stored for an invalid workflow.
    pub async fn create_task(self: &Arc<Self>, request: CreateTask) -> Result<CreateTaskResponse> {
        let args = request.workflow;
        if args.name.is_empty() {
            return Err(EngineError::validation("workflow name is required"));
        }

        let workflow = match self.catalog.find_workflow(&args.name).await {
            Ok(stored) => merge_workflow(&stored, &args)?,
            Err(e) => {
                debug!("Workflow {} is not stored, running as submitted: {:#}", args.name, e);
                args.clone()
            }
        };

        let ctx = self.job_context(workflow.clone());
        let task_id = self.store.get_next_seq(&workflow.name).await?;
        let expanded = expand_workflow(&ctx, task_id).await?;

        let stages = expanded
            .into_iter()
            .zip(workflow.stages.iter())
            .map(|((name, parallel, jobs), stage)| {
                let mut task_stage = StageTask::new(name, parallel);
                task_stage.approval = stage.approval.clone();
                task_stage.jobs = jobs;
                task_stage
            })
            .collect();

        let display_name = if workflow.display_name.is_empty() {
            workflow.name.clone()
        } else {
            workflow.display_name.clone()
        };
        let mut task = WorkflowTask {
            id: Uuid::new_v4(),
            task_id,
            workflow_name: workflow.name.clone(),
            workflow_hash: workflow.hash.clone(),
            workflow_display_name: display_name,
            project_name: workflow.project.clone(),
            params: workflow.params.clone(),
            workflow_args: workflow,
            origin_workflow_args: args,
            key_vals: Vec::new(),
            global_context: BTreeMap::new(),
            cluster_id_map: Default::default(),
            status: Status::Created,
            creator: request.creator,
            revoker: String::new(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            stages,
            is_archived: false,
            is_restart: false,
            is_debug: false,
            error: String::new(),
        };
        task.global_context = seed_globals(&task);

        self.store.create(&task).await?;
        info!(
            "Created task {}#{} for {} ({} stage(s))",
            task.workflow_name,
            task.task_id,
            task.creator.username,
            task.stages.len()
        );

        let response = CreateTaskResponse {
            project_name: task.project_name.clone(),
            workflow_name: task.workflow_name.clone(),
            task_id,
        };
        self.start(task);
        Ok(response)
    }

    /// Registers a task as running and schedules it
    ///
    /// The task waits for a free slot in the background; control commands
    /// already reach it while it waits.
    fn start(self: &Arc<Self>, task: WorkflowTask) {
        let key = (task.workflow_name.clone(), task.task_id);
        let (workspace, dist_dir) = self.config.task_dirs(&key.0, key.1);
        let sink = Arc::new(StoreAckSink::new(self.store.clone()));
        let (recorder, persister) = TaskRecorder::start(task, sink);
        let control = Arc::new(TaskControl::new());

        self.running.lock().insert(
            key.clone(),
            RunningTask {
                recorder: recorder.clone(),
                control: control.clone(),
            },
        );

        let ctx = RunContext {
            task: WorkflowTaskCtx::new(
                recorder,
                workspace,
                dist_dir,
                self.config.docker_host.clone(),
            ),
            infra: self.infra.clone(),
            catalog: self.catalog.clone(),
            control,
            config: self.config.clone(),
            job_deadline: None,
        };
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let permit = match engine.slots.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    error!("Task slots are unavailable: {}", e);
                    None
                }
            };
            debug!("Task {}#{} acquired a slot", key.0, key.1);

            if let Err(e) = tokio::fs::create_dir_all(&ctx.task.workspace).await {
                warn!("Failed to create workspace {}: {}", ctx.task.workspace.display(), e);
            }
            run_workflow(&ctx).await;

            engine.running.lock().remove(&key);
            drop(permit);
            drop(ctx);
            if let Err(e) = persister.await {
                warn!("Persister of task {}#{} panicked: {}", key.0, key.1, e);
            }
        });
    }

    // =========================================================================
    // Control commands
    // =========================================================================

    /// Cancels a task; running jobs stop and clean up
    pub async fn cancel_task(&self, workflow_name: &str, task_id: i64, user: &str) -> Result<()> {
        if let Some(running) = self.running_task(workflow_name, task_id) {
            running.recorder.update(|task| task.revoker = user.to_string());
            running.control.cancel();
            info!("Task {}#{} cancelled by {}", workflow_name, task_id, user);
            return Ok(());
        }

        let mut task = self.find_stored(workflow_name, task_id).await?;
        if task.is_finished() {
            return Err(EngineError::invalid_state(format!(
                "task {}#{} already finished with {}",
                workflow_name, task_id, task.status
            )));
        }
        task.status = Status::Cancelled;
        task.revoker = user.to_string();
        task.end_time = Some(Utc::now());
        self.store.update_by_id(&task).await?;
        info!("Stored task {}#{} cancelled by {}", workflow_name, task_id, user);
        Ok(())
    }

    /// Records an approval decision on a stage waiting for one
    pub async fn approve(&self, request: ApproveRequest) -> Result<()> {
        let running = self.require_running(&request.workflow_name, request.task_id)?;
        let user = request.user.clone();

        running.recorder.update(|task| -> Result<()> {
            let stage = task
                .stages
                .iter_mut()
                .find(|s| s.name == request.stage_name)
                .ok_or_else(|| EngineError::not_found(format!("stage {}", request.stage_name)))?;
            if stage.status != Status::WaitingApprove {
                return Err(EngineError::invalid_state(format!(
                    "stage {} is not waiting for approval",
                    stage.name
                )));
            }
            let approval = stage
                .approval
                .as_mut()
                .filter(|a| a.enabled)
                .ok_or_else(|| {
                    EngineError::invalid_state(format!("stage {} has no approval", request.stage_name))
                })?;
            if !approval.approve_users.is_empty() && !approval.approve_users.contains(&user) {
                return Err(EngineError::validation(format!(
                    "{} may not approve stage {}",
                    user, request.stage_name
                )));
            }
            if approval.records.iter().any(|r| r.user == user) {
                return Err(EngineError::invalid_state(format!(
                    "{} already decided on stage {}",
                    user, request.stage_name
                )));
            }
            approval.records.push(ApprovalRecord {
                user: user.clone(),
                approve: request.approve,
                comment: request.comment.clone(),
                time: Utc::now().format(APPROVAL_TIME_FORMAT).to_string(),
            });
            Ok(())
        })?;

        running.control.notify();
        info!(
            "{} {} stage {} of task {}#{}",
            user,
            if request.approve { "approved" } else { "rejected" },
            request.stage_name,
            request.workflow_name,
            request.task_id
        );
        Ok(())
    }

    /// Sets or unsets a breakpoint on a job of a running task
    pub async fn set_breakpoint(
        &self,
        workflow_name: &str,
        job_key: &str,
        task_id: i64,
        position: BreakpointPosition,
        set: bool,
    ) -> Result<()> {
        let running = self.require_running(workflow_name, task_id)?;
        running
            .recorder
            .update_job(job_key, |job| match position {
                BreakpointPosition::Before => job.breakpoint_before = set,
                BreakpointPosition::After => job.breakpoint_after = set,
            })
            .ok_or_else(|| EngineError::not_found(format!("job {}", job_key)))?;
        running.control.notify();
        debug!(
            "Breakpoint {:?} on job {} of task {}#{} set to {}",
            position, job_key, workflow_name, task_id, set
        );
        Ok(())
    }

    /// Lets a job paused at a breakpoint continue
    pub async fn release_breakpoint(
        &self,
        workflow_name: &str,
        job_key: &str,
        task_id: i64,
        position: BreakpointPosition,
    ) -> Result<()> {
        let running = self.require_running(workflow_name, task_id)?;
        if running.recorder.job(job_key).is_none() {
            return Err(EngineError::not_found(format!("job {}", job_key)));
        }
        running.control.release_breakpoint(job_key, position);
        info!("Released breakpoint {:?} of job {}", position, job_key);
        Ok(())
    }

    pub async fn enable_debug(&self, workflow_name: &str, task_id: i64) -> Result<()> {
        let running = self.require_running(workflow_name, task_id)?;
        running.recorder.update(|task| task.is_debug = true);
        info!("Debug enabled on task {}#{}", workflow_name, task_id);
        Ok(())
    }

    /// Leaves debug mode and releases every pending breakpoint
    pub async fn stop_debug(&self, workflow_name: &str, task_id: i64) -> Result<()> {
        let running = self.require_running(workflow_name, task_id)?;
        running.recorder.update(|task| task.is_debug = false);
        running.control.release_all();
        info!("Debug stopped on task {}#{}", workflow_name, task_id);
        Ok(())
    }

    // =========================================================================
    // Queries and task lifecycle
    // =========================================================================

    /// Current document of a task; live state for running tasks
    pub async fn get_task(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask> {
        if let Some(running) = self.running_task(workflow_name, task_id) {
            return Ok(running.recorder.snapshot());
        }
        self.find_stored(workflow_name, task_id).await
    }

    pub async fn list_tasks(&self, query: &ListTasksQuery) -> Result<Vec<TaskPreview>> {
        let tasks = self
            .store
            .list(&query.workflow_name, query.limit(), query.offset())
            .await?;
        Ok(tasks
            .iter()
            .map(|stored| match self.running_task(&stored.workflow_name, stored.task_id) {
                Some(running) => TaskPreview::from(&running.recorder.snapshot()),
                None => TaskPreview::from(stored),
            })
            .collect())
    }

    /// Submission arguments of a task, reconciled with the latest definition
    pub async fn clone_task(&self, workflow_name: &str, task_id: i64) -> Result<Workflow> {
        let task = self.get_task(workflow_name, task_id).await?;
        self.reconfigure(task.origin_workflow_args, Pass::LatestSetting)
            .await
    }

    /// Re-runs a finished task that did not pass
    ///
    /// Passed stages and jobs are kept; everything else starts over.
    pub async fn restart_task(self: &Arc<Self>, workflow_name: &str, task_id: i64) -> Result<()> {
        if self.running_task(workflow_name, task_id).is_some() {
            return Err(EngineError::invalid_state(format!(
                "task {}#{} is still running",
                workflow_name, task_id
            )));
        }
        let mut task = self.find_stored(workflow_name, task_id).await?;
        if !task.is_finished() || task.status == Status::Passed {
            return Err(EngineError::invalid_state(format!(
                "task {}#{} cannot be restarted from {}",
                workflow_name, task_id, task.status
            )));
        }

        for stage in task.stages.iter_mut().filter(|s| s.status != Status::Passed) {
            stage.status = Status::Created;
            stage.error.clear();
            stage.start_time = None;
            stage.end_time = None;
            if let Some(approval) = stage.approval.as_mut() {
                approval.records.clear();
            }
            for job in stage.jobs.iter_mut().filter(|j| j.status != Status::Passed) {
                job.reset();
            }
        }
        task.status = Status::Created;
        task.is_restart = true;
        task.revoker.clear();
        task.error.clear();
        task.end_time = None;

        self.store.update_by_id(&task).await?;
        info!("Restarting task {}#{}", workflow_name, task_id);
        self.start(task);
        Ok(())
    }

    /// Picks up the tasks a previous process left unfinished
    ///
    /// Passed stages and jobs are kept. Jobs caught mid-run start over, and
    /// stages waiting for approval wait again with the decisions recorded so
    /// far. Returns the number of resumed tasks.
    pub async fn resume_unfinished(self: &Arc<Self>) -> Result<usize> {
        let tasks = self.store.list_unfinished().await?;
        let mut resumed = 0;
        for mut task in tasks {
            if self.running_task(&task.workflow_name, task.task_id).is_some() {
                continue;
            }
            for stage in task.stages.iter_mut().filter(|s| !s.status.is_terminal()) {
                for job in stage.jobs.iter_mut() {
                    if matches!(job.status, Status::Running | Status::Pause) {
                        job.reset();
                    }
                }
            }
            info!(
                "Resuming task {}#{} from {}",
                task.workflow_name, task.task_id, task.status
            );
            self.start(task);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Rebuilds the service records of a host environment from its cluster
    /// and stores them in the catalog
    pub async fn migrate_host_env(&self, project: &str, env_name: &str) -> Result<Environment> {
        let record = self
            .catalog
            .find_project(project)
            .await
            .map_err(|e| EngineError::not_found(format!("{:#}", e)))?;
        if !record.is_host_project() {
            return Err(EngineError::validation(format!(
                "project {} does not manage external environments",
                project
            )));
        }
        let env = self
            .catalog
            .find_env(project, env_name)
            .await
            .map_err(|e| EngineError::not_found(format!("{:#}", e)))?;

        let kube = self.infra.kube(&env.cluster_id).await?;
        let migrated = migrate::migrate_host_env(self.catalog.as_ref(), kube.as_ref(), &env).await?;
        self.catalog.save_env(migrated.clone()).await?;
        Ok(migrated)
    }

    /// Hides a finished task from listings
    pub async fn archive_task(&self, workflow_name: &str, task_id: i64) -> Result<()> {
        if self.running_task(workflow_name, task_id).is_some() {
            return Err(EngineError::invalid_state(format!(
                "task {}#{} is still running",
                workflow_name, task_id
            )));
        }
        let mut task = self.find_stored(workflow_name, task_id).await?;
        task.is_archived = true;
        self.store.update_by_id(&task).await?;
        info!("Archived task {}#{}", workflow_name, task_id);
        Ok(())
    }

    // =========================================================================
    // Definition passes
    // =========================================================================

    /// Stored workflow with every job's preset filled in
    pub async fn preset(&self, workflow_name: &str) -> Result<Workflow> {
        let workflow = self.find_workflow(workflow_name).await?;
        self.reconfigure(workflow, Pass::Preset).await
    }

    /// Stored workflow with every job's selectable options filled in
    pub async fn options(&self, workflow_name: &str) -> Result<Workflow> {
        let workflow = self.find_workflow(workflow_name).await?;
        self.reconfigure(workflow, Pass::Options).await
    }

    async fn find_workflow(&self, workflow_name: &str) -> Result<Workflow> {
        self.catalog
            .find_workflow(workflow_name)
            .await
            .map_err(|e| EngineError::not_found(format!("workflow {}: {:#}", workflow_name, e)))
    }

    async fn reconfigure(&self, mut workflow: Workflow, pass: Pass) -> Result<Workflow> {
        let ctx = self.job_context(workflow.clone());
        for job in workflow.stages.iter_mut().flat_map(|s| s.jobs.iter_mut()) {
            let mut configurator = configurator_for(job)?;
            match pass {
                Pass::Preset => configurator.set_preset(&ctx).await?,
                Pass::Options => configurator.set_options(&ctx).await?,
                Pass::LatestSetting => configurator.update_with_latest_setting(&ctx).await?,
            }
            *job = configurator.to_job()?;
        }
        Ok(workflow)
    }
}

/// Folds submitted arguments into the stored definition
///
/// Jobs are matched by name; stored jobs the submission does not mention
/// keep their stored spec.
fn merge_workflow(stored: &Workflow, args: &Workflow) -> Result<Workflow> {
    let mut merged = stored.clone();
    merged.params = merge_params(&stored.params, &args.params);
    for job in merged.stages.iter_mut().flat_map(|s| s.jobs.iter_mut()) {
        let Some(submitted) = args.jobs().find(|a| a.name == job.name) else {
            continue;
        };
        let mut configurator = configurator_for(job)?;
        configurator.merge_args(submitted)?;
        *job = configurator.to_job()?;
    }
    Ok(merged)
}

fn merge_params(stored: &[Param], submitted: &[Param]) -> Vec<Param> {
    stored
        .iter()
        .map(|param| {
            let mut param = param.clone();
            if let Some(value) = submitted.iter().find(|p| p.name == param.name) {
                param.value = value.value.clone();
            }
            param
        })
        .collect()
}

fn seed_globals(task: &WorkflowTask) -> BTreeMap<String, String> {
    let mut globals = BTreeMap::from([
        ("{{.project}}".to_string(), task.project_name.clone()),
        ("{{.workflow.name}}".to_string(), task.workflow_name.clone()),
        ("{{.task.id}}".to_string(), task.task_id.to_string()),
        ("{{.task.creator}}".to_string(), task.creator.username.clone()),
    ]);
    for param in &task.params {
        globals.insert(param_key(&param.name), param.value.clone());
    }
    globals
}

// =============================================================================
// Workflow launcher
// =============================================================================

/// Lets workflow-trigger jobs start tasks on the engine that runs them
struct EngineLauncher(Weak<Engine>);

impl EngineLauncher {
    fn engine(&self) -> anyhow::Result<Arc<Engine>> {
        self.0
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("engine has shut down"))
    }
}

#[async_trait]
impl WorkflowLauncher for EngineLauncher {
    async fn launch(
        &self,
        workflow_name: &str,
        params: &[Param],
        creator: &str,
    ) -> anyhow::Result<i64> {
        let engine = self.engine()?;
        let mut workflow = engine.find_workflow(workflow_name).await?;
        workflow.params = merge_params(&workflow.params, params);
        let created = engine
            .create_task(CreateTask {
                workflow,
                creator: Creator::named(creator),
            })
            .await?;
        Ok(created.task_id)
    }

    async fn task_status(&self, workflow_name: &str, task_id: i64) -> anyhow::Result<Status> {
        let engine = self.engine()?;
        Ok(engine.get_task(workflow_name, task_id).await?.status)
    }
}
