use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::db;
use crate::state::AppState;

/// GET /health — Reports database reachability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let pool = state.db.clone();
    let probe = tokio::task::spawn_blocking(move || db::ping(&pool))
        .await
        .unwrap_or_else(|e| Err(format!("task join: {}", e)));

    match probe {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": Utc::now().to_rfc3339(),
                "database": "connected",
            })),
        ),
        Err(error) => {
            tracing::warn!(error = %error, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": Utc::now().to_rfc3339(),
                    "database": "disconnected",
                    "error": error,
                })),
            )
        }
    }
}

/// GET / — Plain-text banner.
pub async fn banner() -> &'static str {
    "Storefront API is running!"
}
