//! tasktrack-log library
//!
//! Sink for the log side channel: every record published by the other
//! services is stored as-is and exposed to administrators over HTTP.

use std::sync::Arc;

use axum::{middleware, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use tasktrack_common::api::{metrics_routes, track_http_metrics};
use tasktrack_common::broker::Broker;

pub mod api;
pub mod db;
pub mod error;
pub mod sink;

pub use error::{ApiError, ApiResult};

/// Module name used in startup logs
pub const MODULE_NAME: &str = "tasktrack-log";

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub broker: Arc<dyn Broker>,
    /// Name reported by `/health`
    pub service_name: String,
}

impl AppState {
    pub fn new(db: SqlitePool, broker: Arc<dyn Broker>, service_name: impl Into<String>) -> Self {
        Self {
            db,
            broker,
            service_name: service_name.into(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::log_routes())
        .route_layer(middleware::from_fn(track_http_metrics))
        .merge(api::health_routes())
        .merge(metrics_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
