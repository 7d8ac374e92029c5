use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use grapevine_core::{serialize, AppState};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub participant_id: i64,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = grapevine_db::conversations::list_for_user(&state.db, auth.user_id).await?;

    let mut result = Vec::with_capacity(rows.len());
    for row in &rows {
        result.push(serialize::conversation_view(&state.db, row, auth.user_id).await?);
    }

    Ok(Json(json!(result)))
}

/// One conversation per user pair: returns the existing one when the pair
/// already talked, otherwise creates it.
pub async fn create_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.participant_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "Cannot start a conversation with yourself".into(),
        ));
    }

    grapevine_db::users::get_user_by_id(&state.db, body.participant_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !grapevine_db::friends::are_friends(&state.db, auth.user_id, body.participant_id).await? {
        return Err(ApiError::Forbidden);
    }

    let existing =
        grapevine_db::conversations::find_between(&state.db, auth.user_id, body.participant_id)
            .await?;

    let (status, conversation) = match existing {
        Some(conversation) => (StatusCode::OK, conversation),
        None => {
            let created = grapevine_db::conversations::create_conversation(
                &state.db,
                auth.user_id,
                body.participant_id,
            )
            .await?;
            (StatusCode::CREATED, created)
        }
    };

    let view = serialize::conversation_view(&state.db, &conversation, auth.user_id).await?;
    Ok((status, Json(json!(view))))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    grapevine_db::conversations::get_conversation(&state.db, conversation_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !grapevine_db::conversations::is_participant(&state.db, conversation_id, auth.user_id)
        .await?
    {
        return Err(ApiError::Forbidden);
    }

    let marked = grapevine_db::read_statuses::mark_conversation_read(
        &state.db,
        conversation_id,
        auth.user_id,
        Utc::now(),
    )
    .await?;

    Ok(Json(json!({ "marked_count": marked })))
}
