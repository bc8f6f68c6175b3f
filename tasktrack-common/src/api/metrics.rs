//! Prometheus request metrics
//!
//! Every service records two series per matched route, labeled
//! `{method, route, code}`:
//! - `http_requests_total` counter
//! - `http_request_duration_seconds` histogram
//!
//! `/metrics` and `/health` are never counted. The recorder is process-global
//! and installed once by [`init_metrics`]; `GET /metrics` renders it.

use std::sync::Mutex;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::{Error, Result};

/// Request counter
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Request duration histogram
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";

/// Histogram buckets, in seconds
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.3, 0.5, 1.0, 2.0, 5.0];

/// Paths excluded from request metrics
const UNTRACKED_PATHS: &[&str] = &["/metrics", "/health"];

const UNMATCHED_ROUTE: &str = "unmatched";

static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the global Prometheus recorder
///
/// Later calls return the handle installed by the first one.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let mut slot = PROMETHEUS_HANDLE
        .lock()
        .map_err(|_| Error::Internal("metrics handle lock poisoned".to_string()))?;
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(HTTP_REQUEST_DURATION.to_string()), DURATION_BUCKETS)
        .and_then(|builder| builder.install_recorder())
        .map_err(|e| Error::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests");
    describe_histogram!(HTTP_REQUEST_DURATION, "HTTP request duration in seconds");
    info!("Prometheus metrics recorder installed");

    *slot = Some(handle.clone());
    Ok(handle)
}

/// Global handle, if [`init_metrics`] has run
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.lock().ok().and_then(|slot| slot.clone())
}

fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_string(), |path| path.as_str().to_string())
}

/// Middleware recording request count and duration
///
/// Mount with `route_layer` so the route label is the matched pattern
/// (`/progress/:id`), not the concrete path.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    if UNTRACKED_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let route = route_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("code", response.status().as_u16().to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}

/// `GET /metrics` in the Prometheus text format
pub async fn serve_metrics() -> impl IntoResponse {
    let content_type = [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")];
    match prometheus_handle() {
        Some(handle) => (StatusCode::OK, content_type, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            content_type,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// `GET /metrics`
pub fn metrics_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(serve_metrics))
}
