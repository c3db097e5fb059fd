//! Script steps of freestyle-style jobs

use serde::{Deserialize, Serialize};

/// One step of a freestyle job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTask {
    pub name: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub error: String,
    /// Run this step even when an earlier step failed
    #[serde(default)]
    pub onfailure: bool,
    #[serde(flatten)]
    pub spec: StepSpec,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl StepTask {
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_name: String::new(),
            error: String::new(),
            onfailure: false,
            spec: StepSpec::Shell(ScriptSpec::new(script)),
            result: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "kebab-case")]
pub enum StepSpec {
    Shell(ScriptSpec),
    Powershell(ScriptSpec),
    BatchFile(ScriptSpec),
}

impl StepSpec {
    pub fn script(&self) -> &ScriptSpec {
        match self {
            StepSpec::Shell(s) | StepSpec::Powershell(s) | StepSpec::BatchFile(s) => s,
        }
    }

    pub fn script_mut(&mut self) -> &mut ScriptSpec {
        match self {
            StepSpec::Shell(s) | StepSpec::Powershell(s) | StepSpec::BatchFile(s) => s,
        }
    }

    pub fn step_type(&self) -> &'static str {
        match self {
            StepSpec::Shell(_) => "shell",
            StepSpec::Powershell(_) => "powershell",
            StepSpec::BatchFile(_) => "batch-file",
        }
    }
}

/// Script body, either as one text block or pre-split lines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSpec {
    pub script: String,
    pub scripts: Vec<String>,
    pub skip_prepare: bool,
}

impl ScriptSpec {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }
}
