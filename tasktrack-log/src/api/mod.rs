//! HTTP API for the log service

pub mod handlers;
pub mod health;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::AppState;

/// Admin routes over stored side-channel records
pub fn log_routes() -> Router<AppState> {
    Router::new()
        .route("/logs", get(handlers::list_logs))
        .route("/logs/:id", delete(handlers::delete_log))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health))
}
