//! Health check routes

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Basic health check with live connection stats
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.chat.stats().await;
    Json(json!({
        "status": "ok",
        "active_connections": stats.active_connections,
        "active_rooms": stats.active_rooms,
        "online_users": stats.online_users,
    }))
}

/// Liveness probe - process is up
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe - database is reachable
pub async fn readiness(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => Ok(StatusCode::OK),
        Err(e) => {
            tracing::error!(error = ?e, "Readiness check failed: database unreachable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
