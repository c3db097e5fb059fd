//! Stage execution
//!
//! A stage optionally waits for an approval decision, then runs its jobs
//! either all at once or one after another. The stage status is derived
//! from the job statuses only.

use chrono::Utc;
use conduit_core::domain::status::Status;
use conduit_core::domain::workflow::Approval;
use futures::future::join_all;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::timeout_mins;
use crate::control::WaitOutcome;
use crate::controller::{RunContext, run_job};

/// Outcome of an approval gate, once decided
///
/// A single rejection decides the gate; otherwise it passes once enough
/// distinct eligible users approved. Zero needed approvers counts as one.
pub fn approval_decision(approval: &Approval) -> Option<bool> {
    let eligible = |user: &str| {
        approval.approve_users.is_empty() || approval.approve_users.iter().any(|u| u == user)
    };
    let records = approval.records.iter().filter(|r| eligible(&r.user));

    let mut approvers = HashSet::new();
    for record in records {
        if !record.approve {
            return Some(false);
        }
        approvers.insert(record.user.as_str());
    }
    (approvers.len() >= approval.needed_approvers.max(1) as usize).then_some(true)
}

/// Aggregates job results into a stage status
///
/// Each entry is a job status and whether the job is best effort. A failed
/// best-effort job counts as passed.
pub fn stage_status(jobs: &[(Status, bool)]) -> Status {
    let effective = |&(status, best_effort): &(Status, bool)| {
        if best_effort && status.is_failure() {
            Status::Passed
        } else {
            status
        }
    };
    let statuses: Vec<Status> = jobs.iter().map(effective).collect();

    if statuses.iter().any(|s| s.is_failure()) {
        Status::Failed
    } else if statuses.contains(&Status::Cancelled) {
        Status::Cancelled
    } else if statuses.contains(&Status::Reject) {
        Status::Reject
    } else if statuses.iter().all(|s| *s == Status::Passed) {
        Status::Passed
    } else {
        Status::Failed
    }
}

/// Suspends the stage until its approval is decided
async fn wait_for_approval(ctx: &RunContext, index: usize, approval: &Approval) -> (Status, String) {
    let recorder = ctx.task.recorder();
    let name = recorder.update(|task| {
        let stage = &mut task.stages[index];
        stage.status = Status::WaitingApprove;
        task.status = Status::WaitingApprove;
        task.stages[index].name.clone()
    });
    info!("Stage {} is waiting for approval", name);

    let deadline = (approval.timeout > 0)
        .then(|| Instant::now() + timeout_mins(approval.timeout));
    let outcome = ctx
        .control
        .wait_until(deadline, || {
            recorder.read(|task| task.stages[index].approval.as_ref().and_then(approval_decision))
        })
        .await;

    let result = match outcome {
        WaitOutcome::Done(true) => {
            info!("Stage {} approved", name);
            (Status::Passed, String::new())
        }
        WaitOutcome::Done(false) => {
            info!("Stage {} rejected", name);
            (Status::Reject, format!("stage {} was rejected", name))
        }
        WaitOutcome::TimedOut => {
            warn!("Approval of stage {} timed out", name);
            (Status::Timeout, format!("approval of stage {} timed out", name))
        }
        WaitOutcome::Cancelled => (Status::Cancelled, String::new()),
    };
    if result.0 == Status::Passed {
        ctx.task.set_status(Status::Running);
    }
    result
}

/// Marks a job left behind by a halted sequential stage
fn skip_job(ctx: &RunContext, key: &str) -> Status {
    let status = if ctx.control.is_cancelled() {
        Status::Cancelled
    } else {
        Status::Skipped
    };
    ctx.task.recorder().update_job(key, |job| {
        if !job.status.is_terminal() {
            job.status = status;
        }
    });
    status
}

fn job_halts(status: Status, best_effort: bool) -> bool {
    match status {
        Status::Passed | Status::Skipped => false,
        s if s.is_failure() => !best_effort,
        _ => true,
    }
}

/// Runs one stage to a terminal status
pub async fn run_stage(ctx: &RunContext, index: usize) -> Status {
    let recorder = ctx.task.recorder();
    let (name, parallel, approval, jobs) = recorder.update(|task| {
        let stage = &mut task.stages[index];
        stage.status = Status::Running;
        stage.start_time.get_or_insert_with(Utc::now);
        stage.end_time = None;
        stage.error.clear();
        let jobs: Vec<(String, bool)> = stage
            .jobs
            .iter()
            .map(|j| (j.key.clone(), j.best_effort))
            .collect();
        (stage.name.clone(), stage.parallel, stage.approval.clone(), jobs)
    });
    info!("Stage {} started with {} job(s)", name, jobs.len());

    if let Some(approval) = approval.filter(|a| a.enabled) {
        let (status, error) = wait_for_approval(ctx, index, &approval).await;
        if status != Status::Passed {
            return finish_stage(ctx, index, status, error);
        }
    }

    let statuses: Vec<Status> = if parallel {
        join_all(jobs.iter().map(|(key, _)| run_job(ctx, key))).await
    } else {
        let mut statuses = Vec::with_capacity(jobs.len());
        let mut halted = false;
        for (key, best_effort) in &jobs {
            let status = if halted {
                skip_job(ctx, key)
            } else {
                run_job(ctx, key).await
            };
            halted = halted || job_halts(status, *best_effort);
            statuses.push(status);
        }
        statuses
    };

    let results: Vec<(Status, bool)> = statuses
        .iter()
        .zip(jobs.iter())
        .map(|(status, (_, best_effort))| (*status, *best_effort))
        .collect();
    let status = stage_status(&results);
    let error = if status == Status::Passed {
        String::new()
    } else {
        first_job_error(ctx, &jobs)
    };
    finish_stage(ctx, index, status, error)
}

fn first_job_error(ctx: &RunContext, jobs: &[(String, bool)]) -> String {
    ctx.task.recorder().read(|task| {
        jobs.iter()
            .filter_map(|(key, _)| task.find_job(key))
            .find(|job| !job.error.is_empty() && !job.best_effort)
            .map(|job| format!("job {}: {}", job.key, job.error))
            .unwrap_or_default()
    })
}

fn finish_stage(ctx: &RunContext, index: usize, status: Status, error: String) -> Status {
    let name = ctx.task.recorder().update(|task| {
        let stage = &mut task.stages[index];
        stage.status = status;
        stage.end_time = Some(Utc::now());
        stage.error = error;
        stage.name.clone()
    });
    if status == Status::Passed {
        info!("Stage {} passed", name);
    } else {
        warn!("Stage {} ended {}", name, status);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Infra;
    use crate::testutil::{FakeSql, run_context_for, task_with_stages};
    use conduit_core::domain::task::{JobTask, StageTask};
    use conduit_core::domain::task_spec::{JobTaskSpec, SqlTaskSpec};
    use conduit_core::domain::workflow::ApprovalRecord;
    use std::sync::Arc;

    fn sql_job(key: &str, sql: &str) -> JobTask {
        JobTask::new(
            key,
            key,
            key,
            JobTaskSpec::Sql(SqlTaskSpec {
                id: "mysql".to_string(),
                sql: sql.to_string(),
                ..Default::default()
            }),
        )
    }

    fn stage(parallel: bool, jobs: Vec<JobTask>) -> StageTask {
        let mut stage = StageTask::new("stage", parallel);
        stage.jobs = jobs;
        stage
    }

    fn sql_infra(sql: &Arc<FakeSql>) -> Infra {
        Infra {
            sql: Some(sql.clone()),
            ..Default::default()
        }
    }

    fn record(user: &str, approve: bool) -> ApprovalRecord {
        ApprovalRecord {
            user: user.to_string(),
            approve,
            ..Default::default()
        }
    }

    #[test]
    fn test_approval_decision() {
        let mut approval = Approval {
            enabled: true,
            approve_users: vec!["ann".to_string(), "bob".to_string()],
            needed_approvers: 2,
            ..Default::default()
        };
        assert_eq!(approval_decision(&approval), None);

        approval.records = vec![record("ann", true), record("ann", true), record("eve", true)];
        assert_eq!(approval_decision(&approval), None);

        approval.records.push(record("bob", true));
        assert_eq!(approval_decision(&approval), Some(true));

        approval.records = vec![record("ann", true), record("bob", false)];
        assert_eq!(approval_decision(&approval), Some(false));
    }

    #[test]
    fn test_stage_status_is_order_independent() {
        use Status::*;
        assert_eq!(stage_status(&[(Passed, false), (Passed, false)]), Passed);
        assert_eq!(stage_status(&[(Passed, false), (Timeout, false)]), Failed);
        assert_eq!(stage_status(&[(Timeout, false), (Passed, false)]), Failed);
        assert_eq!(stage_status(&[(Cancelled, false), (Failed, false)]), Failed);
        assert_eq!(stage_status(&[(Failed, true), (Passed, false)]), Passed);
        assert_eq!(stage_status(&[(Passed, false), (Cancelled, false)]), Cancelled);
        assert_eq!(stage_status(&[]), Passed);
    }

    #[tokio::test]
    async fn test_sequential_stage_skips_after_failure() {
        let sql = Arc::new(FakeSql::default());
        let task = task_with_stages(vec![stage(
            false,
            vec![sql_job("a", "select 1"), sql_job("b", "BROKEN"), sql_job("c", "select 3")],
        )]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        assert_eq!(run_stage(&ctx, 0).await, Status::Failed);
        let task = ctx.task.recorder().snapshot();
        let statuses: Vec<Status> = task.stages[0].jobs.iter().map(|j| j.status).collect();
        assert_eq!(statuses, vec![Status::Passed, Status::Failed, Status::Skipped]);
        assert!(task.stages[0].error.starts_with("job b:"));
        assert_eq!(sql.executed(), vec!["select 1".to_string()]);
    }

    #[tokio::test]
    async fn test_best_effort_failure_keeps_stage_green() {
        let sql = Arc::new(FakeSql::default());
        let mut flaky = sql_job("a", "BROKEN");
        flaky.best_effort = true;
        let task = task_with_stages(vec![stage(false, vec![flaky, sql_job("b", "select 2")])]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        assert_eq!(run_stage(&ctx, 0).await, Status::Passed);
        assert_eq!(sql.executed(), vec!["select 2".to_string()]);
    }

    #[tokio::test]
    async fn test_parallel_stage_runs_every_job() {
        let sql = Arc::new(FakeSql::default());
        let task = task_with_stages(vec![stage(
            true,
            vec![sql_job("a", "BROKEN"), sql_job("b", "select 2"), sql_job("c", "select 3")],
        )]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        assert_eq!(run_stage(&ctx, 0).await, Status::Failed);
        let mut executed = sql.executed();
        executed.sort();
        assert_eq!(executed, vec!["select 2".to_string(), "select 3".to_string()]);
    }

    fn gated(jobs: Vec<JobTask>, timeout: i64) -> StageTask {
        let mut stage = stage(false, jobs);
        stage.approval = Some(Approval {
            enabled: true,
            timeout,
            ..Default::default()
        });
        stage
    }

    #[tokio::test]
    async fn test_rejected_approval_runs_no_job() {
        let sql = Arc::new(FakeSql::default());
        let task = task_with_stages(vec![gated(vec![sql_job("a", "select 1")], 0)]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run_stage(&ctx, 0).await })
        };
        while ctx.task.recorder().read(|t| t.stages[0].status) != Status::WaitingApprove {
            tokio::task::yield_now().await;
        }
        assert_eq!(ctx.task.recorder().read(|t| t.status), Status::WaitingApprove);
        ctx.task.recorder().update(|t| {
            if let Some(approval) = t.stages[0].approval.as_mut() {
                approval.records.push(record("ann", false));
            }
        });
        ctx.control.notify();

        assert_eq!(handle.await.unwrap(), Status::Reject);
        let job = ctx.task.recorder().job("a").unwrap();
        assert_eq!(job.status, Status::Created);
        assert!(sql.executed().is_empty());
    }

    #[tokio::test]
    async fn test_approved_stage_runs_jobs() {
        let sql = Arc::new(FakeSql::default());
        let task = task_with_stages(vec![gated(vec![sql_job("a", "select 1")], 0)]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run_stage(&ctx, 0).await })
        };
        while ctx.task.recorder().read(|t| t.stages[0].status) != Status::WaitingApprove {
            tokio::task::yield_now().await;
        }
        ctx.task.recorder().update(|t| {
            if let Some(approval) = t.stages[0].approval.as_mut() {
                approval.records.push(record("ann", true));
            }
        });
        ctx.control.notify();

        assert_eq!(handle.await.unwrap(), Status::Passed);
        assert_eq!(sql.executed(), vec!["select 1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_timeout_ends_stage() {
        let sql = Arc::new(FakeSql::default());
        let task = task_with_stages(vec![gated(vec![sql_job("a", "select 1")], 5)]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        assert_eq!(run_stage(&ctx, 0).await, Status::Timeout);
        let stage = ctx.task.recorder().read(|t| t.stages[0].clone());
        assert!(stage.error.contains("timed out"));
        assert_eq!(stage.jobs[0].status, Status::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_approval_timeout_waits_for_decision() {
        let sql = Arc::new(FakeSql::default());
        let task = task_with_stages(vec![gated(vec![sql_job("a", "select 1")], i64::MAX / 2)]);
        let (ctx, _) = run_context_for(task, sql_infra(&sql));

        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run_stage(&ctx, 0).await })
        };
        while ctx.task.recorder().read(|t| t.stages[0].status) != Status::WaitingApprove {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_secs(24 * 60 * 60)).await;
        ctx.task.recorder().update(|t| {
            if let Some(approval) = t.stages[0].approval.as_mut() {
                approval.records.push(record("ann", true));
            }
        });
        ctx.control.notify();

        assert_eq!(handle.await.unwrap(), Status::Passed);
        assert_eq!(sql.executed(), vec!["select 1".to_string()]);
    }
}
