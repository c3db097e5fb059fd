//! Environment Service
//!
//! Maintenance of environment records in the catalog.

use conduit_core::domain::environment::Environment;
use conduit_engine::Engine;

use crate::service::task_service::{Result, TaskError};

/// Rebuild the services of a host environment from its cluster
pub async fn migrate_host_env(engine: &Engine, project: &str, env_name: &str) -> Result<Environment> {
    if project.trim().is_empty() || env_name.trim().is_empty() {
        return Err(TaskError::ValidationError(
            "Project and environment names are required".to_string(),
        ));
    }

    let env = engine.migrate_host_env(project, env_name).await?;
    tracing::info!(
        "Host environment {}/{} now lists {} service(s)",
        project,
        env_name,
        env.services.len()
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_engine::EngineConfig;
    use conduit_engine::catalog::{CatalogData, FileCatalog};
    use conduit_engine::infra::Infra;
    use conduit_engine::store::InMemoryTaskStore;
    use std::sync::Arc;

    fn engine() -> Arc<Engine> {
        Engine::new(
            EngineConfig::new(),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(FileCatalog::new(CatalogData::default())),
            Infra::default(),
        )
    }

    #[tokio::test]
    async fn test_migrate_requires_names() {
        let result = migrate_host_env(&engine(), "legacy", " ").await;
        assert!(matches!(result, Err(TaskError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_migrate_unknown_project() {
        let result = migrate_host_env(&engine(), "legacy", "prod").await;
        assert!(matches!(result, Err(TaskError::NotFound(_))));
    }
}
