//! Progress endpoint handlers

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde_json::{json, Value};

use tasktrack_common::api::Principal;
use tasktrack_common::events::TaskType;

use super::form::ProgressForm;
use crate::db::{ProgressRecord, ProgressStats};
use crate::error::ProgressResult;
use crate::machine::{self, Review, StudentUpdate};
use crate::AppState;

/// PUT /progress/:id
///
/// Multipart fields: `progress`, `description`, `status`, `file`.
pub async fn update_progress(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> ProgressResult<Json<Value>> {
    let form = ProgressForm::read(multipart).await?;
    let update = StudentUpdate {
        progress: machine::parse_progress(form.field("progress"))?,
        description: form.text("description"),
        status_override: form.text("status"),
    };

    let outcome = state
        .progress
        .update_by_student(&principal, id, update, form.upload)
        .await?;
    Ok(Json(outcome.to_body()))
}

/// PUT /progress/:id/comment
///
/// Multipart fields: `action` (Revisi | Done), `dosenComment`, `grade`, `file`.
pub async fn review_progress(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> ProgressResult<Json<Value>> {
    let form = ProgressForm::read(multipart).await?;
    let review = Review {
        action: form.field("action").unwrap_or_default().parse()?,
        dosen_comment: form.field("dosenComment").map(str::to_string),
        grade: machine::parse_grade(form.field("grade"))?,
    };

    let outcome = state
        .progress
        .review(&principal, id, review, form.upload)
        .await?;
    Ok(Json(outcome.to_body()))
}

/// GET /progress/task/individual/:task_id
pub async fn list_individual(
    State(state): State<AppState>,
    principal: Principal,
    Path(task_id): Path<i64>,
) -> ProgressResult<Json<Vec<ProgressRecord>>> {
    let rows = state
        .progress
        .list_for_task(&principal, task_id, TaskType::Individual)
        .await?;
    Ok(Json(rows))
}

/// GET /progress/task/group/:task_id
pub async fn list_group(
    State(state): State<AppState>,
    principal: Principal,
    Path(task_id): Path<i64>,
) -> ProgressResult<Json<Vec<ProgressRecord>>> {
    let rows = state
        .progress
        .list_for_task(&principal, task_id, TaskType::Group)
        .await?;
    Ok(Json(rows))
}

/// DELETE /progress/task/individual/:task_id
pub async fn delete_individual(
    State(state): State<AppState>,
    principal: Principal,
    Path(task_id): Path<i64>,
) -> ProgressResult<Json<Value>> {
    let deleted = state
        .progress
        .delete_for_task(&principal, task_id, TaskType::Individual)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Progress deleted",
        "deleted": deleted,
    })))
}

/// DELETE /progress/task/group/:task_id
pub async fn delete_group(
    State(state): State<AppState>,
    principal: Principal,
    Path(task_id): Path<i64>,
) -> ProgressResult<Json<Value>> {
    let deleted = state
        .progress
        .delete_for_task(&principal, task_id, TaskType::Group)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Progress deleted",
        "deleted": deleted,
    })))
}

/// GET /progress/user/:user_id
pub async fn list_for_user(
    State(state): State<AppState>,
    _principal: Principal,
    Path(user_id): Path<i64>,
) -> ProgressResult<Json<Vec<ProgressRecord>>> {
    Ok(Json(state.progress.list_for_user(user_id).await?))
}

/// GET /progress/stats/:user_id
pub async fn stats_for_user(
    State(state): State<AppState>,
    _principal: Principal,
    Path(user_id): Path<i64>,
) -> ProgressResult<Json<ProgressStats>> {
    Ok(Json(state.progress.stats_for_user(user_id).await?))
}
