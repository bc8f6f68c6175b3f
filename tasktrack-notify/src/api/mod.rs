//! HTTP API for the notification service

pub mod handlers;

use axum::{
    routing::{delete, get, put},
    Router,
};

use crate::AppState;

/// `/notifications` routes
///
/// The first path segment is a notification id for `read` and delete, and a
/// user id for the listing routes.
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_all))
        .route("/notifications/:id", get(handlers::list_for_user))
        .route("/notifications/latest/:id", get(handlers::latest_for_user))
        .route("/notifications/stream/:id", get(handlers::stream))
        .route("/notifications/:id/read", put(handlers::mark_read))
        .route("/notifications/:id/:user_id", delete(handlers::delete_notification))
}
