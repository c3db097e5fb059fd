//! Script step execution
//!
//! Steps arrive already prepared by their step controller. The executor only
//! spawns the interpreter and collects declared outputs, which a script
//! publishes by writing `$CONDUIT_OUTPUTS_DIR/<NAME>`.

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::domain::step::{StepSpec, StepTask};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Environment variable pointing at the outputs directory
pub const OUTPUTS_DIR_ENV: &str = "CONDUIT_OUTPUTS_DIR";

/// Where and with what a step runs
#[derive(Debug, Clone, Default)]
pub struct StepEnv {
    pub workspace: PathBuf,
    pub envs: Vec<(String, String)>,
    pub docker_host: Option<String>,
    /// Output names to collect after the step
    pub outputs: Vec<String>,
}

impl StepEnv {
    pub fn outputs_dir(&self) -> PathBuf {
        self.workspace.join(".outputs")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub outputs: BTreeMap<String, String>,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Runs one step to completion; cancelling kills it
    async fn run(
        &self,
        step: &StepTask,
        env: &StepEnv,
        cancel: CancellationToken,
    ) -> anyhow::Result<StepOutcome>;
}

/// Runs steps as local processes
#[derive(Debug, Clone, Default)]
pub struct LocalStepExecutor;

impl LocalStepExecutor {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &StepSpec) -> Command {
        let script = spec.script();
        let body = if script.scripts.is_empty() {
            script.script.clone()
        } else {
            script.scripts.join("\n")
        };

        match spec {
            StepSpec::Shell(s) => {
                let body = if s.skip_prepare {
                    body
                } else {
                    format!("set -e\n{}", body)
                };
                let mut command = Command::new("sh");
                command.arg("-c").arg(body);
                command
            }
            StepSpec::Powershell(_) => {
                let mut command = Command::new("pwsh");
                command.arg("-NoProfile").arg("-Command").arg(body);
                command
            }
            StepSpec::BatchFile(_) => {
                let mut command = Command::new("cmd");
                command.arg("/C").arg(body);
                command
            }
        }
    }
}

async fn collect_outputs(dir: &Path, names: &[String]) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    for name in names {
        if let Ok(value) = tokio::fs::read_to_string(dir.join(name)).await {
            outputs.insert(name.clone(), value.trim().to_string());
        }
    }
    outputs
}

#[async_trait]
impl StepExecutor for LocalStepExecutor {
    async fn run(
        &self,
        step: &StepTask,
        env: &StepEnv,
        cancel: CancellationToken,
    ) -> anyhow::Result<StepOutcome> {
        let outputs_dir = env.outputs_dir();
        tokio::fs::create_dir_all(&outputs_dir)
            .await
            .with_context(|| format!("Failed to create {}", outputs_dir.display()))?;

        let mut command = Self::command(&step.spec);
        command
            .current_dir(&env.workspace)
            .envs(env.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(OUTPUTS_DIR_ENV, &outputs_dir)
            .kill_on_drop(true);
        if let Some(host) = &env.docker_host {
            command.env("DOCKER_HOST", host);
        }

        debug!("Running {} step {}", step.spec.step_type(), step.name);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("step {} cancelled", step.name),
            output = command.output() => output
                .with_context(|| format!("Failed to spawn step {}", step.name))?,
        };

        let exit_code = output.status.code().unwrap_or(1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(
            "Step {} finished: exit_code={}, stdout_len={}, stderr_len={}",
            step.name,
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(StepOutcome {
            exit_code,
            stdout,
            stderr,
            outputs: collect_outputs(&outputs_dir, &env.outputs).await,
        })
    }
}
