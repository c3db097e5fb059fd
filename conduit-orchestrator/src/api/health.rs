//! Health Check API Handler
//!
//! Liveness endpoint reporting how many tasks the engine is running.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "running_tasks": state.engine.running_tasks(),
    }))
}
