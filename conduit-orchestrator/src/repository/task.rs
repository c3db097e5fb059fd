//! Task Repository
//!
//! Handles all database operations related to workflow tasks. The task
//! document is stored whole as JSONB; a few columns are lifted out of it
//! for lookups and listing.

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::domain::status::Status;
use conduit_core::domain::task::WorkflowTask;
use conduit_engine::store::TaskStore;
use sqlx::PgPool;
use sqlx::types::Json;

/// Insert a new task document
pub async fn create(pool: &PgPool, task: &WorkflowTask) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workflow_tasks (id, workflow_name, task_id, status, is_archived, create_time, document)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(task.id)
    .bind(&task.workflow_name)
    .bind(task.task_id)
    .bind(task.status.as_str())
    .bind(task.is_archived)
    .bind(task.create_time)
    .bind(Json(task))
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a task by workflow name and task id
pub async fn find(
    pool: &PgPool,
    workflow_name: &str,
    task_id: i64,
) -> Result<Option<WorkflowTask>, sqlx::Error> {
    let document = sqlx::query_scalar::<_, Json<WorkflowTask>>(
        r#"
        SELECT document
        FROM workflow_tasks
        WHERE workflow_name = $1 AND task_id = $2
        "#,
    )
    .bind(workflow_name)
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(document.map(|Json(task)| task))
}

/// Replace the document of an existing task
///
/// Returns the number of rows touched, 0 when the task does not exist.
pub async fn update_by_id(pool: &PgPool, task: &WorkflowTask) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_tasks
        SET status = $1, is_archived = $2, document = $3
        WHERE id = $4
        "#,
    )
    .bind(task.status.as_str())
    .bind(task.is_archived)
    .bind(Json(task))
    .bind(task.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// List non-archived tasks of a workflow, newest first
pub async fn list(
    pool: &PgPool,
    workflow_name: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<WorkflowTask>, sqlx::Error> {
    let documents = sqlx::query_scalar::<_, Json<WorkflowTask>>(
        r#"
        SELECT document
        FROM workflow_tasks
        WHERE workflow_name = $1 AND is_archived = FALSE
        ORDER BY task_id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(workflow_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(documents.into_iter().map(|Json(task)| task).collect())
}

/// List non-archived tasks of every workflow not yet in a terminal status,
/// oldest first
pub async fn list_unfinished(pool: &PgPool) -> Result<Vec<WorkflowTask>, sqlx::Error> {
    let terminal: Vec<String> = Status::TERMINAL
        .iter()
        .map(|status| status.as_str().to_string())
        .collect();

    let documents = sqlx::query_scalar::<_, Json<WorkflowTask>>(
        r#"
        SELECT document
        FROM workflow_tasks
        WHERE is_archived = FALSE AND status <> ALL($1)
        ORDER BY create_time ASC
        "#,
    )
    .bind(terminal)
    .fetch_all(pool)
    .await?;

    Ok(documents.into_iter().map(|Json(task)| task).collect())
}

/// Atomically allocate the next task id of a workflow, starting at 1
pub async fn next_seq(pool: &PgPool, workflow_name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO workflow_task_seqs (workflow_name, seq)
        VALUES ($1, 1)
        ON CONFLICT (workflow_name)
        DO UPDATE SET seq = workflow_task_seqs.seq + 1
        RETURNING seq
        "#,
    )
    .bind(workflow_name)
    .fetch_one(pool)
    .await
}

/// Task store backed by Postgres
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: &WorkflowTask) -> anyhow::Result<()> {
        create(&self.pool, task).await.with_context(|| {
            format!("Failed to insert task {}#{}", task.workflow_name, task.task_id)
        })
    }

    async fn find(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> anyhow::Result<Option<WorkflowTask>> {
        find(&self.pool, workflow_name, task_id)
            .await
            .with_context(|| format!("Failed to load task {}#{}", workflow_name, task_id))
    }

    async fn update_by_id(&self, task: &WorkflowTask) -> anyhow::Result<()> {
        let updated = update_by_id(&self.pool, task).await.with_context(|| {
            format!("Failed to update task {}#{}", task.workflow_name, task.task_id)
        })?;
        if updated == 0 {
            anyhow::bail!("task {}#{} does not exist", task.workflow_name, task.task_id);
        }
        Ok(())
    }

    async fn list(
        &self,
        workflow_name: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<WorkflowTask>> {
        list(&self.pool, workflow_name, limit, offset)
            .await
            .with_context(|| format!("Failed to list tasks of {}", workflow_name))
    }

    async fn list_unfinished(&self) -> anyhow::Result<Vec<WorkflowTask>> {
        list_unfinished(&self.pool)
            .await
            .context("Failed to list unfinished tasks")
    }

    async fn get_next_seq(&self, workflow_name: &str) -> anyhow::Result<i64> {
        next_seq(&self.pool, workflow_name)
            .await
            .with_context(|| format!("Failed to allocate a task id for {}", workflow_name))
    }
}
