//! Dependency-checking health endpoint

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::warn;

use tasktrack_common::time;

use crate::AppState;

/// Body of a passing health check
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: String,
    pub db: &'static str,
    pub broker: &'static str,
    pub time: String,
}

/// Body of a failing health check
#[derive(Debug, Serialize)]
pub struct HealthFailure {
    pub status: &'static str,
    pub error: String,
}

async fn check(state: &AppState) -> Result<(), String> {
    tasktrack_common::db::ping(&state.db)
        .await
        .map_err(|e| format!("Database unreachable: {}", e))?;
    if !state.broker.is_connected().await {
        return Err("Message broker not connected".to_string());
    }
    Ok(())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match check(&state).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthReport {
                status: "OK",
                service: state.service_name.clone(),
                db: "connected",
                broker: "connected",
                time: time::now().to_rfc3339(),
            }),
        )
            .into_response(),
        Err(error) => {
            warn!(%error, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthFailure {
                    status: "FAIL",
                    error,
                }),
            )
                .into_response()
        }
    }
}
