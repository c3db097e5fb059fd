//! Freestyle and plugin controllers

use async_trait::async_trait;
use conduit_core::domain::job_spec::PluginTemplate;
use conduit_core::domain::step::StepTask;
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::JobTaskSpec;
use conduit_core::domain::workflow::KeyVal;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{JobController, RunContext, task_spec};
use crate::context::output_key;
use crate::error::{EngineError, Result};
use crate::infra::StepEnv;
use crate::infra::steps::OUTPUTS_DIR_ENV;
use crate::step::step_controller;

/// Mount point of the job workspace inside plugin containers
const PLUGIN_WORKSPACE: &str = "/workspace";

fn step_env(ctx: &RunContext, job_key: &str, outputs: &[String], envs: &[KeyVal]) -> StepEnv {
    let task = &ctx.task;
    let mut vars = vec![
        ("WORKFLOW".to_string(), task.workflow_name.clone()),
        ("PROJECT".to_string(), task.project_name.clone()),
        ("TASK_ID".to_string(), task.task_id.to_string()),
        ("JOB".to_string(), job_key.to_string()),
        ("DIST_DIR".to_string(), task.dist_dir.display().to_string()),
    ];
    vars.extend(envs.iter().map(|kv| (kv.key.clone(), task.render(&kv.value))));
    StepEnv {
        workspace: task.workspace.join(job_key),
        envs: vars,
        docker_host: task.docker_host.clone(),
        outputs: outputs.to_vec(),
    }
}

/// Runs steps in order and returns the outputs they reported
///
/// After a failure only `onfailure` steps still run; the first failure is
/// the job's error.
async fn run_steps(
    ctx: &RunContext,
    steps: &mut [StepTask],
    env: &StepEnv,
) -> Result<BTreeMap<String, String>> {
    let executor = ctx.infra.steps()?;
    let mut outputs = BTreeMap::new();
    let mut failure: Option<String> = None;

    for step in steps.iter_mut() {
        if failure.is_some() && !step.onfailure {
            continue;
        }
        let controller = step_controller(&step.spec);
        controller.pre_run(&ctx.task, step);
        info!("Running step {} ({})", step.name, step.spec.step_type());

        match executor.run(step, env, ctx.control.token()).await {
            Ok(outcome) => {
                controller.after_run(&ctx.task, step, &outcome);
                outputs.extend(outcome.outputs.clone());
                if !outcome.success() {
                    warn!("Step {} failed: {}", step.name, step.error);
                    failure.get_or_insert_with(|| format!("step {} failed: {}", step.name, step.error));
                }
            }
            Err(_) if ctx.control.is_cancelled() => return Err(EngineError::Cancelled),
            Err(e) => {
                step.error = format!("{:#}", e);
                warn!("Step {} could not run: {}", step.name, step.error);
                failure.get_or_insert_with(|| format!("step {} could not run: {}", step.name, step.error));
            }
        }
    }

    match failure {
        Some(message) => Err(EngineError::infrastructure(message)),
        None => Ok(outputs),
    }
}

fn publish_outputs(ctx: &RunContext, job_key: &str, outputs: &BTreeMap<String, String>) {
    for (name, value) in outputs {
        ctx.task.set_global(output_key(job_key, name), value.clone());
    }
}

pub struct FreestyleController;

#[async_trait]
impl JobController for FreestyleController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let (key, declared) = (job.key.clone(), job.outputs.clone());
        let spec = task_spec!(job, JobTaskSpec::Freestyle);
        let env = step_env(ctx, &key, &declared, &spec.properties.envs);

        let outputs = run_steps(ctx, &mut spec.steps, &env).await?;
        publish_outputs(ctx, &key, &outputs);
        Ok(())
    }
}

/// Single-quotes a word for `sh`
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// `docker run` line executing a plugin against the job workspace
pub fn plugin_command(ctx: &RunContext, plugin: &PluginTemplate, env: &StepEnv) -> String {
    let mut words = vec![
        "docker".to_string(),
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        shell_quote(&format!("{}:{}", env.workspace.display(), PLUGIN_WORKSPACE)),
        "-w".to_string(),
        PLUGIN_WORKSPACE.to_string(),
        "-e".to_string(),
        shell_quote(&format!("{}={}/.outputs", OUTPUTS_DIR_ENV, PLUGIN_WORKSPACE)),
    ];
    let inputs = plugin
        .inputs
        .iter()
        .map(|p| (p.name.as_str(), if p.value.is_empty() { &p.default } else { &p.value }));
    let envs = plugin.envs.iter().map(|kv| (kv.key.as_str(), &kv.value));
    for (name, value) in inputs.chain(envs) {
        words.push("-e".to_string());
        words.push(shell_quote(&format!("{}={}", name, ctx.task.render(value))));
    }
    words.push(shell_quote(&plugin.image));
    words.extend(plugin.cmds.iter().chain(plugin.args.iter()).map(|w| shell_quote(&ctx.task.render(w))));
    words.join(" ")
}

pub struct PluginController;

#[async_trait]
impl JobController for PluginController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let (key, declared) = (job.key.clone(), job.outputs.clone());
        let spec = task_spec!(job, JobTaskSpec::Plugin);
        let env = step_env(ctx, &key, &declared, &spec.properties.envs);
        if spec.plugin.image.is_empty() {
            return Err(EngineError::validation(format!("plugin {} has no image", spec.plugin.name)));
        }

        let mut steps = vec![StepTask::shell(
            format!("{}-{}", spec.plugin.name, spec.plugin.version),
            plugin_command(ctx, &spec.plugin, &env),
        )];
        let outputs = run_steps(ctx, &mut steps, &env).await?;
        publish_outputs(ctx, &key, &outputs);
        Ok(())
    }
}
