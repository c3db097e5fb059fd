//! Configurators for jobs driving external systems
//!
//! SQL, Nacos, Apollo, Jira and Guanceyun jobs all expand into a single task
//! keyed by the job name. Lint makes sure the referenced integration exists
//! and has the right kind.

use async_trait::async_trait;
use conduit_core::domain::integration::{Integration, IntegrationKind};
use conduit_core::domain::job_spec::{
    ApolloJobSpec, GuanceyunCheckJobSpec, JiraJobSpec, NacosJobSpec, SqlJobSpec,
};
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{
    ApolloTaskSpec, GuanceyunCheckTaskSpec, JiraTaskSpec, JobTaskSpec, NacosTaskSpec, SqlTaskSpec,
};
use conduit_core::domain::workflow::Job;
use tracing::debug;

use super::{JobConfigurator, JobContext, SpecJob};
use crate::error::{EngineError, Result};

/// Looks up an integration a job refers to
pub async fn require_integration(
    ctx: &JobContext,
    job_name: &str,
    id: &str,
    kind: IntegrationKind,
) -> Result<Integration> {
    if id.is_empty() {
        return Err(EngineError::validation(format!(
            "job {} does not name a {} integration",
            job_name, kind
        )));
    }
    let integration = ctx.catalog.find_integration(id).await.map_err(|e| {
        EngineError::validation(format!("job {} uses an unknown integration: {}", job_name, e))
    })?;
    if integration.kind != kind {
        return Err(EngineError::validation(format!(
            "job {} needs a {} integration, {} is {}",
            job_name, kind, id, integration.kind
        )));
    }
    Ok(integration)
}

// =============================================================================
// SQL
// =============================================================================

pub struct SqlJob {
    inner: SpecJob<SqlJobSpec>,
}

impl SqlJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for SqlJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        require_integration(ctx, self.inner.name(), &self.inner.spec.id, IntegrationKind::Database)
            .await?;
        if self.inner.spec.sql.trim().is_empty() {
            return Err(EngineError::validation(format!(
                "sql job {} has no statements",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(vec![self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::Sql(SqlTaskSpec {
                id: spec.id.clone(),
                db_type: spec.db_type.clone(),
                sql: spec.sql.clone(),
                results: Vec::new(),
            }),
        )])
    }
}

// =============================================================================
// Nacos
// =============================================================================

pub struct NacosJob {
    inner: SpecJob<NacosJobSpec>,
}

impl NacosJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for NacosJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    /// Fills in the content each config currently has on the server
    async fn set_preset(&mut self, ctx: &JobContext) -> Result<()> {
        let spec = &mut self.inner.spec;
        let server =
            require_integration(ctx, &self.inner.job.name, &spec.nacos_id, IntegrationKind::Nacos)
                .await?;
        let client = ctx.infra.nacos()?;
        for data in spec.nacos_datas.iter_mut() {
            let current = client
                .get_config(&server, &spec.namespace_id, &data.group, &data.data_id)
                .await?
                .unwrap_or_default();
            debug!("Nacos config {}/{} preset from server", data.group, data.data_id);
            data.original_content = current;
        }
        Ok(())
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        require_integration(ctx, self.inner.name(), &self.inner.spec.nacos_id, IntegrationKind::Nacos)
            .await?;
        if let Some(data) = self
            .inner
            .spec
            .nacos_datas
            .iter()
            .find(|d| d.data_id.is_empty() || d.group.is_empty())
        {
            return Err(EngineError::validation(format!(
                "nacos job {} has a config without data id or group ({:?})",
                self.inner.name(),
                data.data_id
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let mut task = self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::Nacos(NacosTaskSpec {
                nacos_id: spec.nacos_id.clone(),
                namespace_id: spec.namespace_id.clone(),
                nacos_datas: spec.nacos_datas.clone(),
                results: Vec::new(),
            }),
        );
        task.job_info
            .insert("namespace".to_string(), spec.namespace_name.clone());
        Ok(vec![task])
    }
}

// =============================================================================
// Apollo
// =============================================================================

pub struct ApolloJob {
    inner: SpecJob<ApolloJobSpec>,
}

impl ApolloJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for ApolloJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        require_integration(ctx, self.inner.name(), &self.inner.spec.apollo_id, IntegrationKind::Apollo)
            .await?;
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(vec![self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::Apollo(ApolloTaskSpec {
                apollo_id: spec.apollo_id.clone(),
                namespace_list: spec.namespace_list.clone(),
                results: Vec::new(),
            }),
        )])
    }
}

// =============================================================================
// Jira
// =============================================================================

pub struct JiraJob {
    inner: SpecJob<JiraJobSpec>,
}

impl JiraJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for JiraJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    /// Only the selected issues are user-editable
    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: JiraJobSpec = args.decode_spec()?;
        self.inner.spec.issues = args.issues;
        Ok(())
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        require_integration(ctx, self.inner.name(), &self.inner.spec.jira_id, IntegrationKind::Jira)
            .await?;
        if self.inner.spec.target_status.is_empty() {
            return Err(EngineError::validation(format!(
                "jira job {} has no target status",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(vec![self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::Jira(JiraTaskSpec {
                jira_id: spec.jira_id.clone(),
                issues: spec.issues.clone(),
                target_status: spec.target_status.clone(),
                results: Vec::new(),
            }),
        )])
    }
}

// =============================================================================
// Guanceyun check
// =============================================================================

pub struct GuanceyunCheckJob {
    inner: SpecJob<GuanceyunCheckJobSpec>,
}

impl GuanceyunCheckJob {
    pub fn new(job: &Job) -> Result<Self> {
        Ok(Self {
            inner: SpecJob::decode(job)?,
        })
    }
}

#[async_trait]
impl JobConfigurator for GuanceyunCheckJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        self.inner.replace_from(args)
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        require_integration(ctx, self.inner.name(), &spec.id, IntegrationKind::Guanceyun).await?;
        if spec.check_time <= 0 {
            return Err(EngineError::validation(format!(
                "check job {} needs a positive check time",
                self.inner.name()
            )));
        }
        if spec.monitors.is_empty() {
            return Err(EngineError::validation(format!(
                "check job {} watches no monitors",
                self.inner.name()
            )));
        }
        Ok(())
    }

    async fn to_jobs(&self, _ctx: &JobContext, _task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        Ok(vec![self.inner.task(
            self.inner.name(),
            self.inner.name(),
            JobTaskSpec::GuanceyunCheck(GuanceyunCheckTaskSpec {
                id: spec.id.clone(),
                name: spec.name.clone(),
                check_time: spec.check_time,
                check_mode: spec.check_mode,
                monitors: spec.monitors.clone(),
            }),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeNacos, job_context};
    use conduit_core::domain::job_type::JobType;
    use conduit_core::domain::workflow::Workflow;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_integration_kind_must_match() {
        let ctx = job_context(Workflow::default());
        let job = Job::new("sql", JobType::Sql, json!({"id": "ci", "sql": "select 1;"}));
        let err = SqlJob::new(&job).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let job = Job::new("sql", JobType::Sql, json!({"id": "mysql", "sql": "select 1;"}));
        SqlJob::new(&job).unwrap().lint(&ctx).await.unwrap();

        let job = Job::new("sql", JobType::Sql, json!({"id": "missing", "sql": "select 1;"}));
        assert!(SqlJob::new(&job).unwrap().lint(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_nacos_preset_reads_current_content() {
        let mut ctx = job_context(Workflow::default());
        let nacos = FakeNacos::default();
        nacos.put("ns", "DEFAULT_GROUP", "app.yaml", "port: 80");
        ctx.infra.nacos = Some(Arc::new(nacos));

        let job = Job::new(
            "nacos",
            JobType::Nacos,
            json!({
                "nacos_id": "nacos",
                "namespace_id": "ns",
                "nacos_datas": [
                    {"data_id": "app.yaml", "group": "DEFAULT_GROUP", "content": "port: 81"},
                    {"data_id": "new.yaml", "group": "DEFAULT_GROUP", "content": "a: 1"}
                ]
            }),
        );
        let mut configurator = NacosJob::new(&job).unwrap();
        configurator.set_preset(&ctx).await.unwrap();

        let spec: NacosJobSpec = configurator.to_job().unwrap().decode_spec().unwrap();
        assert_eq!(spec.nacos_datas[0].original_content, "port: 80");
        assert_eq!(spec.nacos_datas[0].content, "port: 81");
        assert!(spec.nacos_datas[1].original_content.is_empty());
    }

    #[tokio::test]
    async fn test_guanceyun_check_requires_monitors() {
        let ctx = job_context(Workflow::default());
        let job = Job::new(
            "check",
            JobType::GuanceyunCheck,
            json!({"id": "guance", "check_time": 5, "monitors": []}),
        );
        let err = GuanceyunCheckJob::new(&job).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_jira_merge_takes_issues_only() {
        let job = Job::new("jira", JobType::Jira, json!({"jira_id": "jira", "target_status": "Done"}));
        let mut configurator = JiraJob::new(&job).unwrap();
        let args = Job::new(
            "jira",
            JobType::Jira,
            json!({"jira_id": "other", "target_status": "Open", "issues": [{"key": "OPS-1"}]}),
        );
        configurator.merge_args(&args).unwrap();
        let spec: JiraJobSpec = configurator.to_job().unwrap().decode_spec().unwrap();
        assert_eq!(spec.jira_id, "jira");
        assert_eq!(spec.target_status, "Done");
        assert_eq!(spec.issues[0].key, "OPS-1");
    }
}
