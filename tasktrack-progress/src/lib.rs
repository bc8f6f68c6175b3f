//! tasktrack-progress library
//!
//! Owns the append-only progress history:
//! - ingestion consumer seeding a row per task-creation event
//! - state machine for student updates and lecturer reviews
//! - status republisher for task-owning services
//! - REST surface under `/progress`

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use tasktrack_common::api::{metrics_routes, track_http_metrics};

pub mod api;
pub mod collaborators;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod machine;
pub mod republisher;
pub mod service;

pub use error::{ProgressError, ProgressResult};
pub use service::ProgressService;

/// Module name reported by `/health`
pub const MODULE_NAME: &str = "tasktrack-progress";

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub progress: Arc<ProgressService>,
}

impl AppState {
    pub fn new(progress: Arc<ProgressService>) -> Self {
        Self { progress }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::progress_routes())
        .route_layer(middleware::from_fn(track_http_metrics))
        .merge(tasktrack_common::api::health_routes(
            MODULE_NAME,
            env!("CARGO_PKG_VERSION"),
        ))
        .merge(metrics_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
