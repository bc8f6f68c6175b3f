//! Notification endpoint handlers

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use tracing::info;

use tasktrack_common::api::Principal;

use crate::db::{self, Notification};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /notifications
pub async fn list_all(
    State(state): State<AppState>,
    _principal: Principal,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(db::notifications::list_all(&state.db).await?))
}

/// GET /notifications/:userId
pub async fn list_for_user(
    State(state): State<AppState>,
    _principal: Principal,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(db::notifications::list_for_user(&state.db, user_id).await?))
}

/// GET /notifications/latest/:userId
pub async fn latest_for_user(
    State(state): State<AppState>,
    _principal: Principal,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Notification>> {
    db::notifications::latest_for_user(&state.db, user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No notifications for this user".to_string()))
}

/// GET /notifications/stream/:userId
///
/// A client may only join its own room.
pub async fn stream(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<i64>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if principal.id != user_id {
        return Err(ApiError::Forbidden(
            "Cannot subscribe to another user's notifications".to_string(),
        ));
    }
    Ok(state.hub.stream(user_id))
}

/// PUT /notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let notification = db::notifications::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Notification not found".to_string()))?;

    if notification.user_id != Some(principal.id) {
        return Err(ApiError::Forbidden(
            "Not allowed to update this notification".to_string(),
        ));
    }

    db::notifications::mark_read(&state.db, id).await?;
    info!(id, user_id = principal.id, "Notification marked as read");
    Ok(Json(json!({ "message": "Notification marked as read" })))
}

/// DELETE /notifications/:id/:userId
pub async fn delete_notification(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, user_id)): Path<(i64, i64)>,
) -> ApiResult<Json<Value>> {
    if principal.id != user_id || !db::notifications::delete_owned(&state.db, id, user_id).await? {
        return Err(ApiError::Forbidden(
            "Not allowed to delete this notification".to_string(),
        ));
    }

    info!(id, user_id, "Notification deleted");
    Ok(Json(json!({ "message": "Notification deleted" })))
}
