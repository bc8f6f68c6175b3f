//! HTTP helpers shared by every service
//!
//! - [`Principal`]: the validated `{id, role}` caller handed over by the
//!   gateway, extracted from request headers
//! - [`HealthResponse`] / [`health_routes`]: uniform `GET /health`
//! - [`track_http_metrics`] / [`metrics_routes`]: Prometheus request metrics
//! - [`error_body`]: JSON shape of every error response
//! - [`shutdown_signal`]: graceful shutdown trigger for `axum::serve`

pub mod health;
pub mod metrics;
pub mod principal;
pub mod shutdown;

pub use health::{health_routes, HealthResponse};
pub use metrics::{init_metrics, metrics_routes, track_http_metrics};
pub use principal::{Principal, PrincipalRejection, Role, ROLE_HEADER, USER_ID_HEADER};
pub use shutdown::shutdown_signal;

use serde_json::{json, Value};

/// Body of every error response: `{success: false, message, error: {code}}`
pub fn error_body(code: &str, message: &str) -> Value {
    json!({
        "success": false,
        "message": message,
        "error": {
            "code": code,
        }
    })
}
