use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use grapevine_core::{serialize, AppState};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

const LIST_LIMIT: i64 = 100;

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows =
        grapevine_db::notifications::list_for_recipient(&state.db, auth.user_id, LIST_LIMIT)
            .await?;
    let unread = grapevine_db::notifications::unread_count(&state.db, auth.user_id).await?;

    let mut notifications = Vec::with_capacity(rows.len());
    for row in &rows {
        notifications.push(serialize::notification_view(&state.db, row).await?);
    }

    Ok(Json(json!({
        "notifications": notifications,
        "unread_count": unread,
    })))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(notification_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let marked =
        grapevine_db::notifications::mark_read(&state.db, notification_id, auth.user_id).await?;
    if !marked {
        return Err(ApiError::NotFound);
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let cleared = grapevine_db::notifications::clear_for_recipient(&state.db, auth.user_id).await?;

    Ok(Json(json!({ "cleared": cleared })))
}
