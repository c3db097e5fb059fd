use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Task documents, one row per workflow task
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_tasks (
            id UUID PRIMARY KEY,
            workflow_name VARCHAR(255) NOT NULL,
            task_id BIGINT NOT NULL,
            status VARCHAR(50) NOT NULL,
            is_archived BOOLEAN NOT NULL DEFAULT FALSE,
            create_time TIMESTAMPTZ NOT NULL,
            document JSONB NOT NULL,
            UNIQUE (workflow_name, task_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-workflow task id sequence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_task_seqs (
            workflow_name VARCHAR(255) PRIMARY KEY,
            seq BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_tasks_status ON workflow_tasks(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workflow_tasks_listing ON workflow_tasks(workflow_name, is_archived, task_id DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
