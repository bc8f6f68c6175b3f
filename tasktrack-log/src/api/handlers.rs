//! Log endpoint handlers
//!
//! Both endpoints are restricted to administrators.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use tasktrack_common::api::{Principal, Role};

use crate::db::{self, LogEntry};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

fn require_admin(principal: &Principal) -> ApiResult<()> {
    if principal.is(Role::Admin) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Admin role required".to_string()))
    }
}

/// GET /logs
pub async fn list_logs(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<Vec<LogEntry>>> {
    require_admin(&principal)?;
    Ok(Json(db::logs::list_all(&state.db).await?))
}

/// DELETE /logs/:id
pub async fn delete_log(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    require_admin(&principal)?;

    if !db::logs::delete(&state.db, id).await? {
        return Err(ApiError::NotFound("Log not found".to_string()));
    }

    info!(id, admin = principal.id, "Log deleted");
    Ok(Json(json!({ "message": "Log deleted" })))
}
