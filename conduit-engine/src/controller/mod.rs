//! Runtime job controllers
//!
//! One controller per job kind drives the systems a job task targets.
//! [`run_job`] wraps every controller with the shared lifecycle:
//! breakpoints, timeouts, retries, cancellation and status bookkeeping.

/// Borrows the typed spec of a job task, failing on a kind mismatch
macro_rules! task_spec {
    ($job:expr, $variant:path) => {
        match &mut $job.spec {
            $variant(spec) => spec,
            other => {
                return Err($crate::error::EngineError::invalid_state(format!(
                    "job {} carries a {} spec",
                    $job.key,
                    other.job_type()
                )))
            }
        }
    };
}
pub(crate) use task_spec;

pub mod deploy;
pub mod freestyle;
pub mod gray;
pub mod helm;
pub mod integrations;
pub mod istio;
pub mod mse;
pub mod patch;
pub mod rollout;
pub mod trigger;
pub mod wait;

use async_trait::async_trait;
use chrono::Utc;
use conduit_core::domain::integration::{Integration, IntegrationKind};
use conduit_core::domain::status::Status;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use conduit_core::dto::task::BreakpointPosition;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::EnvironmentCatalog;
use crate::config::{self, EngineConfig, timeout_mins};
use crate::context::WorkflowTaskCtx;
use crate::control::{TaskControl, WaitOutcome};
use crate::error::{EngineError, Result};
use crate::infra::{Infra, KubeClient};

/// Everything a controller may touch while running one job task
#[derive(Clone)]
pub struct RunContext {
    pub task: WorkflowTaskCtx,
    pub infra: Infra,
    pub catalog: Arc<dyn EnvironmentCatalog>,
    pub control: Arc<TaskControl>,
    pub config: Arc<EngineConfig>,
    /// End of the running job's own budget; waits never outlast it
    pub job_deadline: Option<Instant>,
}

impl RunContext {
    /// Sleeps one poll interval; cancellation cuts the sleep short
    pub async fn sleep(&self) -> Result<()> {
        let token = self.control.token();
        tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(self.config.poll_interval) => Ok(()),
        }
    }

    /// Deadline for a task-spec timeout in seconds, 0 meaning the default
    pub fn deadline(&self, timeout_secs: i64) -> Instant {
        Instant::now() + self.budget(timeout_secs)
    }

    /// Task-spec timeout, capped by what is left of the job budget
    pub fn budget(&self, timeout_secs: i64) -> Duration {
        let budget = if timeout_secs > 0 {
            config::timeout_secs(timeout_secs)
        } else {
            self.config.default_timeout
        };
        match self.job_deadline {
            Some(deadline) => budget.min(deadline.saturating_duration_since(Instant::now())),
            None => budget,
        }
    }

    fn with_job_deadline(&self, deadline: Instant) -> Self {
        Self {
            job_deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Client for a cluster, remembered on the task
    pub async fn kube(&self, cluster_id: &str) -> Result<Arc<dyn KubeClient>> {
        self.task.add_cluster_id(cluster_id);
        self.infra.kube(cluster_id).await
    }

    /// Integration record of the expected kind
    pub async fn integration(&self, id: &str, kind: IntegrationKind) -> Result<Integration> {
        let integration = self
            .catalog
            .find_integration(id)
            .await
            .map_err(|e| EngineError::dependency(format!("{:#}", e)))?;
        if integration.kind != kind {
            return Err(EngineError::configuration(format!(
                "integration {} is a {} integration, expected {}",
                id, integration.kind, kind
            )));
        }
        Ok(integration)
    }

    /// Writes a job task back into the task document
    ///
    /// Breakpoint flags are owned by the document since operators change
    /// them while the job runs.
    pub fn sync_job(&self, job: &JobTask) {
        self.task.recorder().update_job(&job.key, |stored| {
            let (before, after) = (stored.breakpoint_before, stored.breakpoint_after);
            *stored = job.clone();
            stored.breakpoint_before = before;
            stored.breakpoint_after = after;
        });
    }
}

#[async_trait]
pub trait JobController: Send {
    /// Applies the job's side effects
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()>;

    /// Blocks until what `run` started has converged
    async fn wait(&mut self, _ctx: &RunContext, _job: &mut JobTask) -> Result<()> {
        Ok(())
    }

    /// Undoes partial work after a failure or cancellation
    async fn clean(&mut self, _ctx: &RunContext, _job: &mut JobTask) {}
}

pub fn controller_for(spec: &JobTaskSpec) -> Box<dyn JobController> {
    match spec {
        JobTaskSpec::Deploy(_) => Box::new(deploy::DeployController::default()),
        JobTaskSpec::HelmDeploy(_) => Box::new(helm::HelmDeployController),
        JobTaskSpec::CustomDeploy(_) => Box::new(deploy::CustomDeployController::default()),
        JobTaskSpec::Freestyle(_) => Box::new(freestyle::FreestyleController),
        JobTaskSpec::Plugin(_) => Box::new(freestyle::PluginController),
        JobTaskSpec::BlueGreenDeploy(_) => Box::new(rollout::BlueGreenDeployController),
        JobTaskSpec::BlueGreenRelease(_) => Box::new(rollout::BlueGreenReleaseController),
        JobTaskSpec::BlueGreenDeployV2(_) => {
            Box::new(rollout::BlueGreenDeployV2Controller::default())
        }
        JobTaskSpec::BlueGreenReleaseV2(_) => {
            Box::new(rollout::BlueGreenReleaseV2Controller::default())
        }
        JobTaskSpec::CanaryDeploy(_) => Box::new(rollout::CanaryDeployController),
        JobTaskSpec::CanaryRelease(_) => Box::new(rollout::CanaryReleaseController),
        JobTaskSpec::GrayRelease(_) => Box::new(gray::GrayReleaseController),
        JobTaskSpec::GrayRollback(_) => Box::new(gray::GrayRollbackController),
        JobTaskSpec::IstioRelease(_) => Box::new(istio::IstioReleaseController),
        JobTaskSpec::IstioRollback(_) => Box::new(istio::IstioRollbackController),
        JobTaskSpec::K8sPatch(_) => Box::new(patch::K8sPatchController),
        JobTaskSpec::Jenkins(_) => Box::new(integrations::JenkinsController::default()),
        JobTaskSpec::Sql(_) => Box::new(integrations::SqlController),
        JobTaskSpec::Nacos(_) => Box::new(integrations::NacosController),
        JobTaskSpec::Apollo(_) => Box::new(integrations::ApolloController),
        JobTaskSpec::Jira(_) => Box::new(integrations::JiraController),
        JobTaskSpec::WorkflowTrigger(_) => Box::new(trigger::WorkflowTriggerController),
        JobTaskSpec::OfflineService(_) => Box::new(trigger::OfflineServiceController),
        JobTaskSpec::GuanceyunCheck(_) => Box::new(integrations::GuanceyunCheckController),
        JobTaskSpec::MseGrayRelease(_) => Box::new(mse::MseGrayReleaseController::default()),
        JobTaskSpec::MseGrayOffline(_) => Box::new(mse::MseGrayOfflineController),
    }
}

// =============================================================================
// Job lifecycle
// =============================================================================

/// Slack past the job budget for a readiness wait to report its own timeout
const READINESS_GRACE: Duration = Duration::from_secs(30);

/// Overall budget of one attempt, when the job has one
fn job_budget(ctx: &RunContext, job: &JobTask) -> Option<Duration> {
    if job.timeout > 0 {
        return Some(timeout_mins(job.timeout));
    }
    match job.spec {
        JobTaskSpec::Freestyle(_) | JobTaskSpec::Plugin(_) => Some(ctx.config.default_timeout),
        _ => None,
    }
}

async fn attempt(
    ctx: &RunContext,
    controller: &mut dyn JobController,
    job: &mut JobTask,
) -> Result<()> {
    let token = ctx.control.token();
    let budget = job_budget(ctx, job);
    let key = job.key.clone();

    // Waits inside the budget time out first and attach pod diagnostics
    let bounded_ctx;
    let ctx = match budget {
        Some(budget) => {
            bounded_ctx = ctx.with_job_deadline(Instant::now() + budget);
            &bounded_ctx
        }
        None => ctx,
    };
    let hard_limit = budget.map(|b| b + ctx.config.poll_interval * 2 + READINESS_GRACE);

    let work = async {
        controller.run(ctx, job).await?;
        controller.wait(ctx, job).await
    };
    let bounded = async {
        match (budget, hard_limit) {
            (Some(budget), Some(limit)) => tokio::time::timeout(limit, work).await.map_err(|_| {
                EngineError::Timeout(format!(
                    "job {} timed out after {} seconds",
                    key,
                    budget.as_secs()
                ))
            })?,
            _ => work.await,
        }
    };

    tokio::select! {
        _ = token.cancelled() => Err(EngineError::Cancelled),
        result = bounded => result,
    }
}

/// Pauses at a breakpoint; false when the task was cancelled meanwhile
async fn hold_at_breakpoint(
    ctx: &RunContext,
    job: &mut JobTask,
    position: BreakpointPosition,
) -> bool {
    let key = job.key.clone();
    let flagged = || {
        ctx.task.recorder().read(|task| {
            task.find_job(&key).is_some_and(|j| match position {
                BreakpointPosition::Before => j.breakpoint_before,
                BreakpointPosition::After => j.breakpoint_after,
            })
        })
    };
    if !flagged() || ctx.control.take_release(&key, position) {
        return true;
    }

    info!("Job {} paused at breakpoint {:?}", key, position);
    let previous = job.status;
    job.status = Status::Pause;
    ctx.sync_job(job);
    ctx.task.set_status(Status::Pause);

    let outcome = ctx
        .control
        .wait_until(None, || {
            (!flagged() || ctx.control.take_release(&key, position)).then_some(())
        })
        .await;

    job.status = previous;
    ctx.sync_job(job);
    // Sibling jobs of a parallel stage may still be paused
    ctx.task.recorder().update(|task| {
        let paused = task.jobs().any(|j| j.status == Status::Pause);
        task.status = if paused { Status::Pause } else { Status::Running };
    });
    let released = matches!(outcome, WaitOutcome::Done(()));
    if released {
        info!("Job {} released from breakpoint {:?}", key, position);
    }
    released
}

fn finish(ctx: &RunContext, job: &mut JobTask, status: Status) -> Status {
    job.status = status;
    job.end_time = Some(Utc::now());
    ctx.sync_job(job);
    status
}

/// Runs one job task to a terminal status
///
/// The job is read from the task document and written back after every
/// transition. Jobs that already passed, e.g. on restart, are left alone.
pub async fn run_job(ctx: &RunContext, key: &str) -> Status {
    let Some(mut job) = ctx.task.recorder().job(key) else {
        warn!("Job {} is not part of task {}", key, ctx.task.task_id);
        return Status::Failed;
    };
    if job.status == Status::Passed {
        debug!("Job {} already passed, skipping", key);
        return Status::Passed;
    }
    if ctx.control.is_cancelled() {
        return finish(ctx, &mut job, Status::Cancelled);
    }

    if !hold_at_breakpoint(ctx, &mut job, BreakpointPosition::Before).await {
        return finish(ctx, &mut job, Status::Cancelled);
    }

    job.status = Status::Running;
    job.start_time = Some(Utc::now());
    job.error.clear();
    ctx.sync_job(&job);
    info!("Job {} ({}) started", key, job.job_type());

    let mut controller = controller_for(&job.spec);
    let status = loop {
        match attempt(ctx, controller.as_mut(), &mut job).await {
            Ok(()) => break Status::Passed,
            Err(EngineError::Cancelled) => {
                controller.clean(ctx, &mut job).await;
                break Status::Cancelled;
            }
            Err(EngineError::Timeout(message)) => {
                controller.clean(ctx, &mut job).await;
                job.error = message;
                break Status::Timeout;
            }
            Err(e) => {
                controller.clean(ctx, &mut job).await;
                job.error = e.to_string();
                if job.retry_count < job.retry && !ctx.control.is_cancelled() {
                    job.retry_count += 1;
                    warn!(
                        "Job {} failed, retrying ({}/{}): {}",
                        key, job.retry_count, job.retry, job.error
                    );
                    ctx.sync_job(&job);
                    controller = controller_for(&job.spec);
                    continue;
                }
                break Status::Failed;
            }
        }
    };

    if status == Status::Passed {
        job.error.clear();
        ctx.sync_job(&job);
        hold_at_breakpoint(ctx, &mut job, BreakpointPosition::After).await;
    }

    let status = finish(ctx, &mut job, status);
    if status == Status::Passed {
        info!("Job {} passed", key);
    } else {
        warn!("Job {} ended {}: {}", key, status, job.error);
    }
    status
}
