//! Integration collaborators
//!
//! Thin interfaces over the external systems integration jobs drive. Each
//! receives the integration record so one client can serve several servers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::integration::Integration;
use conduit_core::domain::job_spec::MonitorLevel;
use conduit_core::domain::status::Status;
use conduit_core::domain::workflow::Param;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs one statement and returns the affected row count
    async fn execute(&self, database: &Integration, statement: &str) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait NacosClient: Send + Sync {
    async fn get_config(
        &self,
        server: &Integration,
        namespace_id: &str,
        group: &str,
        data_id: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn publish_config(
        &self,
        server: &Integration,
        namespace_id: &str,
        group: &str,
        data_id: &str,
        format: &str,
        content: &str,
    ) -> anyhow::Result<()>;
}

/// Address of one Apollo namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApolloTarget<'a> {
    pub app_id: &'a str,
    pub env: &'a str,
    pub cluster_id: &'a str,
    pub namespace: &'a str,
}

#[async_trait]
pub trait ApolloClient: Send + Sync {
    async fn update_kv(
        &self,
        server: &Integration,
        target: &ApolloTarget<'_>,
        key: &str,
        value: &str,
        operator: &str,
    ) -> anyhow::Result<()>;

    async fn release(
        &self,
        server: &Integration,
        target: &ApolloTarget<'_>,
        title: &str,
        operator: &str,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Moves an issue into the named status
    async fn transition(
        &self,
        server: &Integration,
        issue_key: &str,
        target_status: &str,
    ) -> anyhow::Result<()>;
}

/// A monitor that fired since the check began
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorEvent {
    pub monitor_id: String,
    pub level: MonitorLevel,
}

#[async_trait]
pub trait MonitorClient: Send + Sync {
    async fn list_events(
        &self,
        server: &Integration,
        monitor_ids: &[String],
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MonitorEvent>>;
}

/// Starts workflows on behalf of a workflow-trigger job
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    /// Submits a run and returns its task id
    async fn launch(&self, workflow_name: &str, params: &[Param], creator: &str)
    -> anyhow::Result<i64>;

    async fn task_status(&self, workflow_name: &str, task_id: i64) -> anyhow::Result<Status>;
}
