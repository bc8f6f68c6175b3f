//! HTTP API for the progress service

pub mod form;
pub mod handlers;

use axum::{
    routing::{get, put},
    Router,
};

use crate::AppState;

/// `/progress` routes
pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/progress/:id", put(handlers::update_progress))
        .route("/progress/:id/comment", put(handlers::review_progress))
        .route(
            "/progress/task/individual/:task_id",
            get(handlers::list_individual).delete(handlers::delete_individual),
        )
        .route(
            "/progress/task/group/:task_id",
            get(handlers::list_group).delete(handlers::delete_group),
        )
        .route("/progress/user/:user_id", get(handlers::list_for_user))
        .route("/progress/stats/:user_id", get(handlers::stats_for_user))
}
