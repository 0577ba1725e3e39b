//! `GET /health`: no auth, answers even when the database is down.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database = match sqlx::query("select 1")
        .execute(state.executor.runtime_pool())
        .await
    {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "health check database probe failed");
            "unavailable"
        }
    };
    Json(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "database": database,
    }))
}
