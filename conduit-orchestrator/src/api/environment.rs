//! Environment API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use conduit_core::domain::environment::Environment;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::environment_service;

/// POST /api/environment/{project}/{env}/migrate
/// Rebuild a host environment's services from the workloads in its namespace
pub async fn migrate_host_env(
    State(state): State<AppState>,
    Path((project, env)): Path<(String, String)>,
) -> ApiResult<Json<Environment>> {
    tracing::info!("Migrating host environment {}/{}", project, env);

    let migrated = environment_service::migrate_host_env(&state.engine, &project, &env).await?;
    Ok(Json(migrated))
}
