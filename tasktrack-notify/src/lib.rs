//! tasktrack-notify library
//!
//! Turns domain events into per-user notifications:
//! - fan-out consumer bound to the whole routing-key catalog
//! - per-user realtime rooms served over SSE
//! - REST surface under `/notifications`

use axum::{middleware, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use tasktrack_common::api::{metrics_routes, track_http_metrics};

pub mod api;
pub mod db;
pub mod error;
pub mod fanout;
pub mod realtime;

pub use error::{ApiError, ApiResult};
pub use realtime::RealtimeHub;

/// Module name reported by `/health`
pub const MODULE_NAME: &str = "tasktrack-notify";

/// Application state shared across HTTP handlers and the fan-out consumer
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub hub: RealtimeHub,
}

impl AppState {
    pub fn new(db: SqlitePool, hub: RealtimeHub) -> Self {
        Self { db, hub }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::notification_routes())
        .route_layer(middleware::from_fn(track_http_metrics))
        .merge(tasktrack_common::api::health_routes(
            MODULE_NAME,
            env!("CARGO_PKG_VERSION"),
        ))
        .merge(metrics_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
