//! Step controllers
//!
//! A step controller prepares a script step before the executor runs it and
//! interprets the outcome afterwards. Spawning processes is the executor's
//! business.

use conduit_core::domain::step::{StepSpec, StepTask};
use serde_json::json;

use crate::context::WorkflowTaskCtx;
use crate::infra::StepOutcome;

pub trait StepController: Send + Sync {
    /// Normalizes and renders the step in place
    fn pre_run(&self, ctx: &WorkflowTaskCtx, step: &mut StepTask);

    /// Records what the executor reported
    fn after_run(&self, ctx: &WorkflowTaskCtx, step: &mut StepTask, outcome: &StepOutcome);
}

/// Shell, PowerShell and batch steps
pub struct ScriptStepController;

/// Script body as command lines with unix line endings
pub fn split_script(script: &str) -> Vec<String> {
    script
        .replace("\r\n", "\n")
        .split('\n')
        .map(str::to_string)
        .collect()
}

impl StepController for ScriptStepController {
    fn pre_run(&self, ctx: &WorkflowTaskCtx, step: &mut StepTask) {
        let script = step.spec.script_mut();
        if script.scripts.is_empty() && !script.script.is_empty() {
            script.scripts = split_script(&script.script);
        }
        for line in script.scripts.iter_mut() {
            *line = ctx.render(line);
        }
    }

    fn after_run(&self, _ctx: &WorkflowTaskCtx, step: &mut StepTask, outcome: &StepOutcome) {
        step.result = json!({
            "exit_code": outcome.exit_code,
            "outputs": outcome.outputs,
        });
        if outcome.success() {
            step.error.clear();
        } else {
            let reason = outcome
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or_default();
            step.error = format!("exit code {}: {}", outcome.exit_code, reason.trim());
        }
    }
}

pub fn step_controller(spec: &StepSpec) -> &'static dyn StepController {
    match spec {
        StepSpec::Shell(_) | StepSpec::Powershell(_) | StepSpec::BatchFile(_) => &ScriptStepController,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RecordingSink, test_config, sample_task};
    use crate::ack::TaskRecorder;
    use std::sync::Arc;

    fn context() -> WorkflowTaskCtx {
        let (recorder, _) = TaskRecorder::start(sample_task("wf", 1), Arc::new(RecordingSink::default()));
        let (workspace, dist) = test_config().task_dirs("wf", 1);
        WorkflowTaskCtx::new(recorder, workspace, dist, None)
    }

    #[tokio::test]
    async fn test_pre_run_splits_crlf_script_once() {
        let ctx = context();
        ctx.set_global("{{.job.build.IMAGE}}", "repo/a:v2");
        let mut step = StepTask::shell("s", "echo one\r\ndocker push {{.job.build.IMAGE}}");

        let controller = step_controller(&step.spec);
        controller.pre_run(&ctx, &mut step);
        let first = step.spec.script().scripts.clone();
        assert_eq!(first, vec!["echo one".to_string(), "docker push repo/a:v2".to_string()]);

        controller.pre_run(&ctx, &mut step);
        assert_eq!(step.spec.script().scripts, first);
    }

    #[tokio::test]
    async fn test_after_run_records_failure_reason() {
        let ctx = context();
        let mut step = StepTask::shell("s", "false");
        let outcome = StepOutcome {
            exit_code: 3,
            stderr: "warming up\nno such file\n".to_string(),
            ..Default::default()
        };
        ScriptStepController.after_run(&ctx, &mut step, &outcome);
        assert_eq!(step.error, "exit code 3: no such file");
        assert_eq!(step.result["exit_code"], 3);
    }
}
