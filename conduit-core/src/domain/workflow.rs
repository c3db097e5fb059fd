//! Workflow definition types
//!
//! A workflow is the declarative template a task is created from. Job specs
//! are kept as raw JSON documents here; each job kind decodes its own typed
//! spec when it is instantiated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::job_type::JobType;

/// Named, versioned template of ordered stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub name: String,
    pub display_name: String,
    pub project: String,
    pub hash: String,
    pub params: Vec<Param>,
    pub stages: Vec<Stage>,
}

/// Ordered group of jobs executed as a unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage {
    pub name: String,
    pub parallel: bool,
    pub approval: Option<Approval>,
    pub jobs: Vec<Job>,
}

/// A job definition inside a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub spec: serde_json::Value,
    /// Failures of tasks expanded from this job do not fail the stage
    #[serde(default)]
    pub best_effort: bool,
}

impl Job {
    pub fn new(name: impl Into<String>, job_type: JobType, spec: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            job_type,
            spec,
            best_effort: false,
        }
    }

    /// Decodes the raw spec into a kind-specific structure
    pub fn decode_spec<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.spec.is_null() {
            return serde_json::from_value(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_value(self.spec.clone())
    }

    /// Stores a kind-specific structure back as the raw spec
    pub fn encode_spec<T: Serialize>(&mut self, spec: &T) -> serde_json::Result<()> {
        self.spec = serde_json::to_value(spec)?;
        Ok(())
    }
}

/// Workflow or step parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub value: String,
    pub default: String,
    pub choice_option: Vec<String>,
    pub is_credential: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: "string".to_string(),
            value: value.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
    pub is_credential: bool,
}

impl KeyVal {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_credential: false,
        }
    }
}

/// Named value a finished job publishes for downstream jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub name: String,
    pub description: String,
}

/// Stage-level human approval gate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Approval {
    pub enabled: bool,
    /// Users allowed to decide; empty means anyone
    pub approve_users: Vec<String>,
    /// Approvals required before the stage proceeds (0 is treated as 1)
    pub needed_approvers: u32,
    /// Minutes to wait for a decision; 0 waits indefinitely
    pub timeout: i64,
    pub description: String,
    pub records: Vec<ApprovalRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalRecord {
    pub user: String,
    pub approve: bool,
    pub comment: String,
    pub time: String,
}

impl Workflow {
    /// Finds a job definition by name together with its stage index
    pub fn find_job(&self, name: &str) -> Option<(usize, &Job)> {
        self.stages.iter().enumerate().find_map(|(idx, stage)| {
            stage
                .jobs
                .iter()
                .find(|job| job.name == name)
                .map(|job| (idx, job))
        })
    }

    /// Execution rank of every job
    ///
    /// Jobs of a parallel stage share one rank; jobs of a sequential stage
    /// each get their own, so a job may only depend on a job whose rank is
    /// strictly lower.
    pub fn job_rank_map(&self) -> HashMap<String, usize> {
        let mut ranks = HashMap::new();
        let mut index = 0;
        for stage in &self.stages {
            for job in &stage.jobs {
                if !stage.parallel {
                    index += 1;
                }
                ranks.insert(job.name.clone(), index);
            }
            index += 1;
        }
        ranks
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|stage| stage.jobs.iter())
    }
}
