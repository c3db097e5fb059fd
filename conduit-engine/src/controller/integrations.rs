//! Controllers for jobs that drive external systems
//!
//! Item-oriented jobs (Nacos, Apollo, Jira) attempt every item and record a
//! result per item before failing. SQL stops at the first failing statement.

use async_trait::async_trait;
use chrono::Utc;
use conduit_core::domain::integration::{Integration, IntegrationKind};
use conduit_core::domain::job_spec::{CheckMode, GuanceyunMonitor};
use conduit_core::domain::task::JobTask;
use conduit_core::domain::task_spec::{ItemResult, JobTaskSpec};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{JobController, RunContext, task_spec};
use crate::config::timeout_mins;
use crate::error::{EngineError, Result};
use crate::infra::services::{ApolloTarget, MonitorEvent};

/// Fails with a summary when any item result failed
fn check_results(what: &str, results: &[ItemResult]) -> Result<()> {
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| r.status.is_failure())
        .map(|r| r.name.as_str())
        .collect();
    if failed.is_empty() {
        return Ok(());
    }
    Err(EngineError::infrastructure(format!(
        "{} of {} {} failed: {}",
        failed.len(),
        results.len(),
        what,
        failed.join(", ")
    )))
}

// =============================================================================
// Jenkins
// =============================================================================

/// Triggers a Jenkins build and follows it to completion
#[derive(Default)]
pub struct JenkinsController {
    server: Option<Integration>,
    build: Option<(String, i64)>,
}

#[async_trait]
impl JobController for JenkinsController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let jenkins = ctx.infra.jenkins()?;
        let spec = task_spec!(job, JobTaskSpec::Jenkins);
        let server = ctx.integration(&spec.id, IntegrationKind::Jenkins).await?;

        for parameter in spec.job.parameters.iter_mut() {
            parameter.value = ctx.task.render(&parameter.value);
        }
        let job_name = spec.job.job_name.clone();
        let queue_url = jenkins
            .trigger(&server, &job_name, &spec.job.parameters)
            .await
            .map_err(|e| EngineError::infrastructure(format!("failed to trigger {}: {:#}", job_name, e)))?;
        debug!("Jenkins job {} queued at {}", job_name, queue_url);

        let number = loop {
            let queued = jenkins
                .queued_build(&server, &queue_url)
                .await
                .map_err(EngineError::infrastructure)?;
            if let Some(number) = queued {
                break number;
            }
            ctx.sleep().await?;
        };
        spec.build_number = Some(number);
        info!("Jenkins job {} started build #{}", job_name, number);

        self.server = Some(server);
        self.build = Some((job_name, number));
        ctx.sync_job(job);
        Ok(())
    }

    async fn wait(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let (Some(server), Some((job_name, number))) = (self.server.clone(), self.build.clone()) else {
            return Err(EngineError::invalid_state("jenkins build was never started"));
        };
        let jenkins = ctx.infra.jenkins()?;
        let build = loop {
            let build = jenkins
                .build(&server, &job_name, number)
                .await
                .map_err(EngineError::infrastructure)?;
            if !build.building && build.result.is_some() {
                break build;
            }
            ctx.sleep().await?;
        };

        let spec = task_spec!(job, JobTaskSpec::Jenkins);
        spec.build_url = build.url.clone();
        self.build = None;
        if !build.succeeded() {
            return Err(EngineError::infrastructure(format!(
                "jenkins build {} #{} finished {}",
                job_name,
                number,
                build.result.as_deref().unwrap_or("without a result")
            )));
        }
        info!("Jenkins build {} #{} succeeded", job_name, number);
        Ok(())
    }

    async fn clean(&mut self, ctx: &RunContext, _job: &mut JobTask) {
        let (Some(server), Some((job_name, number))) = (&self.server, self.build.take()) else {
            return;
        };
        let Ok(jenkins) = ctx.infra.jenkins() else {
            return;
        };
        if let Err(e) = jenkins.stop(server, &job_name, number).await {
            warn!("Failed to stop jenkins build {} #{}: {:#}", job_name, number, e);
        }
    }
}

// =============================================================================
// SQL
// =============================================================================

/// Statements of a script, in order, without empty ones
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct SqlController;

#[async_trait]
impl JobController for SqlController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let executor = ctx.infra.sql()?;
        let spec = task_spec!(job, JobTaskSpec::Sql);
        let database = ctx.integration(&spec.id, IntegrationKind::Database).await?;

        spec.results.clear();
        for statement in split_statements(&ctx.task.render(&spec.sql)) {
            match executor.execute(&database, &statement).await {
                Ok(rows) => {
                    debug!("Statement affected {} row(s): {}", rows, statement);
                    spec.results.push(ItemResult::passed(&statement));
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    spec.results.push(ItemResult::failed(&statement, &message));
                    return Err(EngineError::infrastructure(format!(
                        "statement `{}` failed: {}",
                        statement, message
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Nacos
// =============================================================================

pub struct NacosController;

#[async_trait]
impl JobController for NacosController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let nacos = ctx.infra.nacos()?;
        let spec = task_spec!(job, JobTaskSpec::Nacos);
        let server = ctx.integration(&spec.nacos_id, IntegrationKind::Nacos).await?;

        spec.results.clear();
        for data in spec.nacos_datas.iter_mut() {
            let name = format!("{}/{}", data.group, data.data_id);
            match nacos
                .get_config(&server, &spec.namespace_id, &data.group, &data.data_id)
                .await
            {
                Ok(current) => data.original_content = current.unwrap_or_default(),
                Err(e) => debug!("No current content for {}: {:#}", name, e),
            }

            let content = ctx.task.render(&data.content);
            let published = nacos
                .publish_config(
                    &server,
                    &spec.namespace_id,
                    &data.group,
                    &data.data_id,
                    &data.format,
                    &content,
                )
                .await;
            data.content = content;
            match published {
                Ok(()) => {
                    info!("Published nacos config {}", name);
                    spec.results.push(ItemResult::passed(name));
                }
                Err(e) => {
                    warn!("Failed to publish nacos config {}: {:#}", name, e);
                    spec.results.push(ItemResult::failed(name, format!("{:#}", e)));
                }
            }
        }
        check_results("config(s)", &spec.results)
    }
}

// =============================================================================
// Apollo
// =============================================================================

pub struct ApolloController;

#[async_trait]
impl JobController for ApolloController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let apollo = ctx.infra.apollo()?;
        let spec = task_spec!(job, JobTaskSpec::Apollo);
        let server = ctx.integration(&spec.apollo_id, IntegrationKind::Apollo).await?;
        let operator = ctx.task.creator.as_str();

        spec.results.clear();
        for namespace in spec.namespace_list.iter() {
            let target = ApolloTarget {
                app_id: &namespace.app_id,
                env: &namespace.env,
                cluster_id: &namespace.cluster_id,
                namespace: &namespace.namespace,
            };
            let name = format!("{}/{}/{}", namespace.app_id, namespace.env, namespace.namespace);

            let mut outcome = Ok(());
            for kv in namespace.kv.iter() {
                let value = ctx.task.render(&kv.val);
                outcome = apollo.update_kv(&server, &target, &kv.key, &value, operator).await;
                if outcome.is_err() {
                    break;
                }
            }
            if outcome.is_ok() {
                let title = format!("{}-{}", ctx.task.workflow_name, ctx.task.task_id);
                outcome = apollo.release(&server, &target, &title, operator).await;
            }

            match outcome {
                Ok(()) => {
                    info!("Released apollo namespace {}", name);
                    spec.results.push(ItemResult::passed(name));
                }
                Err(e) => {
                    warn!("Failed to release apollo namespace {}: {:#}", name, e);
                    spec.results.push(ItemResult::failed(name, format!("{:#}", e)));
                }
            }
        }
        check_results("namespace(s)", &spec.results)
    }
}

// =============================================================================
// Jira
// =============================================================================

pub struct JiraController;

#[async_trait]
impl JobController for JiraController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let tracker = ctx.infra.issues()?;
        let spec = task_spec!(job, JobTaskSpec::Jira);
        if spec.target_status.is_empty() {
            return Err(EngineError::validation("jira job has no target status"));
        }
        let server = ctx.integration(&spec.jira_id, IntegrationKind::Jira).await?;

        spec.results.clear();
        for issue in spec.issues.iter_mut() {
            match tracker.transition(&server, &issue.key, &spec.target_status).await {
                Ok(()) => {
                    issue.status = spec.target_status.clone();
                    spec.results.push(ItemResult::passed(&issue.key));
                }
                Err(e) => {
                    warn!("Failed to move {} to {}: {:#}", issue.key, spec.target_status, e);
                    spec.results.push(ItemResult::failed(&issue.key, format!("{:#}", e)));
                }
            }
        }
        check_results("issue(s)", &spec.results)
    }
}

// =============================================================================
// Guanceyun monitor check
// =============================================================================

pub const MONITOR_CHECKING: &str = "checking";
pub const MONITOR_PASSED: &str = "passed";
pub const MONITOR_FAILED: &str = "failed";
pub const MONITOR_UNFINISHED: &str = "unfinished";

fn monitor_link(server: &Integration, monitor: &GuanceyunMonitor) -> String {
    format!(
        "{}/keyevents/monitorChart?query=df_monitor_checker_name:{}",
        server.console_address.trim_end_matches('/'),
        monitor.name
    )
}

/// Marks monitors hit by an event at or above their level; true when any did
fn mark_triggered(
    server: &Integration,
    monitors: &mut [GuanceyunMonitor],
    events: &[MonitorEvent],
) -> bool {
    let mut triggered = false;
    for event in events {
        let Some(monitor) = monitors.iter_mut().find(|m| m.id == event.monitor_id) else {
            continue;
        };
        if monitor.status != MONITOR_FAILED && event.level >= monitor.level {
            monitor.status = MONITOR_FAILED.to_string();
            monitor.url = monitor_link(server, monitor);
            triggered = true;
        }
    }
    triggered
}

fn settle_monitors(monitors: &mut [GuanceyunMonitor], status: &str) {
    for monitor in monitors.iter_mut().filter(|m| m.status != MONITOR_FAILED) {
        monitor.status = status.to_string();
    }
}

/// Watches monitors for the configured window
pub struct GuanceyunCheckController;

#[async_trait]
impl JobController for GuanceyunCheckController {
    async fn run(&mut self, ctx: &RunContext, job: &mut JobTask) -> Result<()> {
        let client = ctx.infra.monitor()?;
        let spec = task_spec!(job, JobTaskSpec::GuanceyunCheck);
        let server = ctx.integration(&spec.id, IntegrationKind::Guanceyun).await?;
        if spec.monitors.is_empty() {
            return Err(EngineError::validation("monitor check has no monitors"));
        }

        let ids: Vec<String> = spec.monitors.iter().map(|m| m.id.clone()).collect();
        for monitor in spec.monitors.iter_mut() {
            monitor.status = MONITOR_CHECKING.to_string();
            monitor.url.clear();
        }
        let since = Utc::now();
        let deadline = Instant::now() + timeout_mins(spec.check_time);
        info!("Checking {} monitor(s) for {} minute(s)", ids.len(), spec.check_time);

        loop {
            let events = client
                .list_events(&server, &ids, since)
                .await
                .map_err(EngineError::infrastructure)?;
            let triggered = mark_triggered(&server, &mut spec.monitors, &events);

            let failed = match spec.check_mode {
                CheckMode::Trigger => triggered,
                CheckMode::Monitor => spec.monitors.iter().all(|m| m.status == MONITOR_FAILED),
            };
            if failed {
                settle_monitors(&mut spec.monitors, MONITOR_UNFINISHED);
                let names: Vec<&str> = spec
                    .monitors
                    .iter()
                    .filter(|m| m.status == MONITOR_FAILED)
                    .map(|m| m.name.as_str())
                    .collect();
                return Err(EngineError::infrastructure(format!(
                    "monitor(s) triggered: {}",
                    names.join(", ")
                )));
            }

            if Instant::now() >= deadline {
                settle_monitors(&mut spec.monitors, MONITOR_PASSED);
                return Ok(());
            }
            ctx.sleep().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::run_job;
    use crate::infra::Infra;
    use crate::testutil::{
        FakeApollo, FakeIssues, FakeJenkins, FakeMonitor, FakeNacos, FakeSql, run_context,
    };
    use conduit_core::domain::job_spec::{
        ApolloKV, ApolloNamespace, IssueID, JenkinsJobInfo, JenkinsJobParameter, MonitorLevel,
        NacosConfig,
    };
    use conduit_core::domain::status::Status;
    use conduit_core::domain::task_spec::{
        ApolloTaskSpec, GuanceyunCheckTaskSpec, JenkinsTaskSpec, JiraTaskSpec, NacosTaskSpec,
        SqlTaskSpec,
    };
    use std::sync::Arc;

    fn stored(ctx: &RunContext, key: &str) -> JobTask {
        ctx.task.recorder().job(key).unwrap()
    }

    fn jenkins_job(job_name: &str) -> JobTask {
        JobTask::new(
            "jenkins",
            "jenkins",
            "jenkins",
            JobTaskSpec::Jenkins(JenkinsTaskSpec {
                id: "ci".to_string(),
                job: JenkinsJobInfo {
                    job_name: job_name.to_string(),
                    parameters: vec![JenkinsJobParameter {
                        name: "TAG".to_string(),
                        value: "{{.workflow.params.tag}}".to_string(),
                        ..Default::default()
                    }],
                },
                ..Default::default()
            }),
        )
    }

    fn jenkins_infra(jenkins: &Arc<FakeJenkins>) -> Infra {
        Infra {
            jenkins: Some(jenkins.clone()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_jenkins_build_records_number_and_url() {
        let jenkins = Arc::new(FakeJenkins::default());
        let (ctx, _) = run_context(jenkins_job("backend"), jenkins_infra(&jenkins));
        ctx.task.set_global("{{.workflow.params.tag}}", "v3");

        assert_eq!(run_job(&ctx, "jenkins").await, Status::Passed);
        let triggered = jenkins.triggered();
        assert_eq!(triggered[0].0, "backend");
        assert_eq!(triggered[0].1[0].value, "v3");

        let JobTaskSpec::Jenkins(spec) = stored(&ctx, "jenkins").spec else {
            panic!("expected a jenkins task");
        };
        assert_eq!(spec.build_number, Some(1));
        assert_eq!(spec.build_url, "http://jenkins.local/job/backend/1/");
    }

    #[tokio::test]
    async fn test_jenkins_failed_build_fails_job() {
        let jenkins = Arc::new(FakeJenkins::default());
        jenkins.set_result("backend", "FAILURE");
        let (ctx, _) = run_context(jenkins_job("backend"), jenkins_infra(&jenkins));

        assert_eq!(run_job(&ctx, "jenkins").await, Status::Failed);
        assert!(stored(&ctx, "jenkins").error.contains("FAILURE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jenkins_cancel_stops_build() {
        let jenkins = Arc::new(FakeJenkins::default());
        jenkins.hang("backend");
        let (ctx, _) = run_context(jenkins_job("backend"), jenkins_infra(&jenkins));

        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run_job(&ctx, "jenkins").await })
        };
        while jenkins.triggered().is_empty() {
            tokio::task::yield_now().await;
        }
        ctx.control.cancel();

        assert_eq!(handle.await.unwrap(), Status::Cancelled);
        assert_eq!(jenkins.stopped(), vec![("backend".to_string(), 1)]);
    }

    #[test]
    fn test_split_statements_drops_empty() {
        assert_eq!(
            split_statements("create table t (a int);\n\n insert into t values (1); ;"),
            vec!["create table t (a int)".to_string(), "insert into t values (1)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sql_stops_at_first_failure() {
        let sql = Arc::new(FakeSql::default());
        let job = JobTask::new(
            "sql",
            "sql",
            "sql",
            JobTaskSpec::Sql(SqlTaskSpec {
                id: "mysql".to_string(),
                sql: "select 1; BROKEN; select 2".to_string(),
                ..Default::default()
            }),
        );
        let infra = Infra {
            sql: Some(sql.clone()),
            ..Default::default()
        };
        let (ctx, _) = run_context(job, infra);

        assert_eq!(run_job(&ctx, "sql").await, Status::Failed);
        assert_eq!(sql.executed(), vec!["select 1".to_string()]);
        let JobTaskSpec::Sql(spec) = stored(&ctx, "sql").spec else {
            panic!("expected a sql task");
        };
        assert_eq!(spec.results.len(), 2);
        assert_eq!(spec.results[1].status, Status::Failed);
    }

    #[tokio::test]
    async fn test_wrong_integration_kind_is_configuration_error() {
        let sql = Arc::new(FakeSql::default());
        let job = JobTask::new(
            "sql",
            "sql",
            "sql",
            JobTaskSpec::Sql(SqlTaskSpec {
                id: "nacos".to_string(),
                sql: "select 1".to_string(),
                ..Default::default()
            }),
        );
        let infra = Infra {
            sql: Some(sql.clone()),
            ..Default::default()
        };
        let (ctx, _) = run_context(job, infra);

        assert_eq!(run_job(&ctx, "sql").await, Status::Failed);
        assert!(stored(&ctx, "sql").error.contains("expected database"));
        assert!(sql.executed().is_empty());
    }

    #[tokio::test]
    async fn test_nacos_publishes_every_config() {
        let nacos = Arc::new(FakeNacos::default());
        nacos.put("prod", "DEFAULT", "app.yaml", "level: info");
        let config = |data_id: &str, content: &str| NacosConfig {
            data_id: data_id.to_string(),
            group: "DEFAULT".to_string(),
            format: "yaml".to_string(),
            content: content.to_string(),
            ..Default::default()
        };
        let job = JobTask::new(
            "nacos",
            "nacos",
            "nacos",
            JobTaskSpec::Nacos(NacosTaskSpec {
                nacos_id: "nacos".to_string(),
                namespace_id: "prod".to_string(),
                nacos_datas: vec![config("", "orphan"), config("app.yaml", "level: debug")],
                ..Default::default()
            }),
        );
        let infra = Infra {
            nacos: Some(nacos.clone()),
            ..Default::default()
        };
        let (ctx, _) = run_context(job, infra);

        assert_eq!(run_job(&ctx, "nacos").await, Status::Failed);
        assert_eq!(nacos.get("prod", "DEFAULT", "app.yaml").as_deref(), Some("level: debug"));
        let JobTaskSpec::Nacos(spec) = stored(&ctx, "nacos").spec else {
            panic!("expected a nacos task");
        };
        assert_eq!(spec.results[0].status, Status::Failed);
        assert_eq!(spec.results[1].status, Status::Passed);
        assert_eq!(spec.nacos_datas[1].original_content, "level: info");
    }

    #[tokio::test]
    async fn test_apollo_updates_then_releases() {
        let apollo = Arc::new(FakeApollo::default());
        let job = JobTask::new(
            "apollo",
            "apollo",
            "apollo",
            JobTaskSpec::Apollo(ApolloTaskSpec {
                apollo_id: "apollo".to_string(),
                namespace_list: vec![ApolloNamespace {
                    app_id: "shop".to_string(),
                    env: "PRO".to_string(),
                    cluster_id: "default".to_string(),
                    namespace: "application".to_string(),
                    kv: vec![ApolloKV {
                        key: "image".to_string(),
                        val: "{{.job.build.IMAGE}}".to_string(),
                    }],
                }],
                ..Default::default()
            }),
        );
        let infra = Infra {
            apollo: Some(apollo.clone()),
            ..Default::default()
        };
        let (ctx, _) = run_context(job, infra);
        ctx.task.set_global("{{.job.build.IMAGE}}", "repo/a:v2");

        assert_eq!(run_job(&ctx, "apollo").await, Status::Passed);
        assert_eq!(
            apollo.updates(),
            vec![("application".to_string(), "image".to_string(), "repo/a:v2".to_string())]
        );
        assert_eq!(apollo.releases(), vec![("application".to_string(), "wf-1".to_string())]);
    }

    #[tokio::test]
    async fn test_jira_attempts_every_issue() {
        let issues = Arc::new(FakeIssues::default());
        issues.add("SHOP-1", "Open");
        let issue = |key: &str| IssueID {
            key: key.to_string(),
            ..Default::default()
        };
        let job = JobTask::new(
            "jira",
            "jira",
            "jira",
            JobTaskSpec::Jira(JiraTaskSpec {
                jira_id: "jira".to_string(),
                issues: vec![issue("SHOP-404"), issue("SHOP-1")],
                target_status: "Done".to_string(),
                ..Default::default()
            }),
        );
        let infra = Infra {
            issues: Some(issues.clone()),
            ..Default::default()
        };
        let (ctx, _) = run_context(job, infra);

        assert_eq!(run_job(&ctx, "jira").await, Status::Failed);
        assert_eq!(issues.status("SHOP-1").as_deref(), Some("Done"));
        assert!(stored(&ctx, "jira").error.contains("SHOP-404"));
    }

    fn monitor(id: &str, level: MonitorLevel) -> GuanceyunMonitor {
        GuanceyunMonitor {
            id: id.to_string(),
            name: format!("{}-checker", id),
            level,
            ..Default::default()
        }
    }

    fn check_job(mode: CheckMode, monitors: Vec<GuanceyunMonitor>) -> JobTask {
        JobTask::new(
            "check",
            "check",
            "check",
            JobTaskSpec::GuanceyunCheck(GuanceyunCheckTaskSpec {
                id: "guance".to_string(),
                name: "guance".to_string(),
                check_time: 1,
                check_mode: mode,
                monitors,
            }),
        )
    }

    fn monitor_infra(client: &Arc<FakeMonitor>) -> Infra {
        Infra {
            monitor: Some(client.clone()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_monitors_pass_after_window() {
        let client = Arc::new(FakeMonitor::default());
        client.fire("cpu", MonitorLevel::Warning);
        let job = check_job(CheckMode::Trigger, vec![monitor("cpu", MonitorLevel::Critical)]);
        let (ctx, _) = run_context(job, monitor_infra(&client));

        assert_eq!(run_job(&ctx, "check").await, Status::Passed);
        let JobTaskSpec::GuanceyunCheck(spec) = stored(&ctx, "check").spec else {
            panic!("expected a check task");
        };
        assert_eq!(spec.monitors[0].status, MONITOR_PASSED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_mode_fails_on_first_event() {
        let client = Arc::new(FakeMonitor::default());
        client.fire("cpu", MonitorLevel::Critical);
        let job = check_job(
            CheckMode::Trigger,
            vec![monitor("cpu", MonitorLevel::Error), monitor("mem", MonitorLevel::Error)],
        );
        let (ctx, _) = run_context(job, monitor_infra(&client));

        assert_eq!(run_job(&ctx, "check").await, Status::Failed);
        let job = stored(&ctx, "check");
        assert!(job.error.contains("cpu-checker"));
        let JobTaskSpec::GuanceyunCheck(spec) = job.spec else {
            panic!("expected a check task");
        };
        assert_eq!(spec.monitors[0].status, MONITOR_FAILED);
        assert!(spec.monitors[0].url.starts_with("/keyevents"));
        assert_eq!(spec.monitors[1].status, MONITOR_UNFINISHED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_mode_needs_every_monitor() {
        let client = Arc::new(FakeMonitor::default());
        client.fire("cpu", MonitorLevel::Critical);
        let job = check_job(
            CheckMode::Monitor,
            vec![monitor("cpu", MonitorLevel::Error), monitor("mem", MonitorLevel::Error)],
        );
        let (ctx, _) = run_context(job, monitor_infra(&client));

        assert_eq!(run_job(&ctx, "check").await, Status::Passed);
    }
}
