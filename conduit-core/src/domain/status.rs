//! Execution status shared by tasks, stages and jobs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow task, stage, or job task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Created,
    Running,
    Passed,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
    Reject,
    #[serde(rename = "waitforapprove")]
    WaitingApprove,
    Pause,
}

impl Status {
    /// Statuses after which no further transition happens
    pub const TERMINAL: [Status; 6] = [
        Status::Passed,
        Status::Failed,
        Status::Timeout,
        Status::Cancelled,
        Status::Skipped,
        Status::Reject,
    ];

    /// Whether no further transition will happen
    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Whether the status counts as a failure for stage aggregation
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failed | Status::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Timeout => "timeout",
            Status::Cancelled => "cancelled",
            Status::Skipped => "skipped",
            Status::Reject => "reject",
            Status::WaitingApprove => "waitforapprove",
            Status::Pause => "pause",
        }
    }

    /// Parses the persisted string form, falling back to `Created`
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Status::Running,
            "passed" => Status::Passed,
            "failed" => Status::Failed,
            "timeout" => Status::Timeout,
            "cancelled" => Status::Cancelled,
            "skipped" => Status::Skipped,
            "reject" => Status::Reject,
            "waitforapprove" => Status::WaitingApprove,
            "pause" => Status::Pause,
            _ => Status::Created,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
