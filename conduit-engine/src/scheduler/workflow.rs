//! Workflow execution
//!
//! Stages run strictly in order. The first stage that does not pass halts
//! the task; the stages after it never start.

use chrono::Utc;
use conduit_core::domain::status::Status;
use tracing::{info, warn};

use super::stage::run_stage;
use crate::controller::RunContext;

fn halt_stage(ctx: &RunContext, index: usize, status: Status) {
    ctx.task.recorder().update(|task| {
        let stage = &mut task.stages[index];
        if !stage.status.is_terminal() {
            stage.status = status;
        }
    });
}

/// Runs a task's stages and records the task's final status
///
/// Stages that already passed are kept as they are, which is how a
/// restarted task resumes.
pub async fn run_workflow(ctx: &RunContext) -> Status {
    let recorder = ctx.task.recorder();
    let stage_count = recorder.update(|task| {
        task.status = Status::Running;
        task.start_time.get_or_insert_with(Utc::now);
        task.end_time = None;
        task.error.clear();
        task.stages.len()
    });
    info!(
        "Task {}#{} started with {} stage(s)",
        ctx.task.workflow_name, ctx.task.task_id, stage_count
    );

    let mut outcome: Option<(Status, String)> = None;
    for index in 0..stage_count {
        if let Some((status, _)) = &outcome {
            let halted = if *status == Status::Cancelled {
                Status::Cancelled
            } else {
                Status::Skipped
            };
            halt_stage(ctx, index, halted);
            continue;
        }
        if recorder.read(|task| task.stages[index].status == Status::Passed) {
            continue;
        }
        if ctx.control.is_cancelled() {
            outcome = Some((Status::Cancelled, String::new()));
            halt_stage(ctx, index, Status::Cancelled);
            continue;
        }

        let status = run_stage(ctx, index).await;
        if status != Status::Passed {
            let error = recorder.read(|task| task.stages[index].error.clone());
            let status = if ctx.control.is_cancelled() {
                Status::Cancelled
            } else {
                status
            };
            outcome = Some((status, error));
        }
    }

    let (status, error) = outcome.unwrap_or((Status::Passed, String::new()));
    recorder.update(|task| {
        task.status = status;
        task.error = error.clone();
        task.end_time = Some(Utc::now());
    });
    recorder.flush().await;

    if status == Status::Passed {
        info!("Task {}#{} passed", ctx.task.workflow_name, ctx.task.task_id);
    } else {
        warn!(
            "Task {}#{} ended {}: {}",
            ctx.task.workflow_name, ctx.task.task_id, status, error
        );
    }
    status
}
