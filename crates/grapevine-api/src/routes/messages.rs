use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use grapevine_core::{serialize, AppState};
use grapevine_util::pagination::PaginationParams;
use grapevine_util::validation::validate_message_content;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub image: Option<String>,
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Value>, ApiError> {
    grapevine_db::conversations::get_conversation(&state.db, conversation_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !grapevine_db::conversations::is_participant(&state.db, conversation_id, auth.user_id)
        .await?
    {
        return Err(ApiError::Forbidden);
    }

    let rows = grapevine_db::messages::list_for_conversation(
        &state.db,
        conversation_id,
        params.before,
        params.limit() as i64,
    )
    .await?;

    let mut result = Vec::with_capacity(rows.len());
    for row in &rows {
        result.push(serialize::message_view(&state.db, row).await?);
    }

    Ok(Json(json!(result)))
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    grapevine_db::conversations::get_conversation(&state.db, conversation_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !grapevine_db::conversations::is_participant(&state.db, conversation_id, auth.user_id)
        .await?
    {
        return Err(ApiError::Forbidden);
    }

    // An existing conversation only carries new traffic while the pair are
    // still friends; history access stays with participation.
    let participant_ids =
        grapevine_db::conversations::participant_ids(&state.db, conversation_id).await?;
    let other_id = participant_ids
        .into_iter()
        .find(|id| *id != auth.user_id)
        .ok_or(ApiError::NotFound)?;
    if !grapevine_db::friends::are_friends(&state.db, auth.user_id, other_id).await? {
        return Err(ApiError::Forbidden);
    }

    let content = body.content.as_deref().unwrap_or("").trim().to_string();
    let image = body.image.as_deref().filter(|s| !s.is_empty());
    if content.is_empty() && image.is_none() {
        return Err(ApiError::BadRequest(
            "Message must have content or an image".into(),
        ));
    }
    validate_message_content(&content).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let message = grapevine_db::messages::create_message(
        &state.db,
        conversation_id,
        auth.user_id,
        &content,
        image,
    )
    .await?;

    state.dispatcher.message_created(&message).await?;

    let view = serialize::message_view(&state.db, &message).await?;
    Ok((StatusCode::CREATED, Json(json!(view))))
}

pub async fn edit_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((conversation_id, message_id)): Path<(i64, i64)>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let message = grapevine_db::messages::get_message(&state.db, message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if message.conversation_id != conversation_id || message.is_deleted {
        return Err(ApiError::NotFound);
    }
    if message.sender_id != auth.user_id {
        return Err(ApiError::Forbidden);
    }

    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message content cannot be empty".into()));
    }
    validate_message_content(content).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let updated =
        grapevine_db::messages::set_edited(&state.db, message_id, content, Utc::now()).await?;

    state.dispatcher.message_edited(&updated).await?;

    let view = serialize::message_view(&state.db, &updated).await?;
    Ok(Json(json!(view)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((conversation_id, message_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let message = grapevine_db::messages::get_message(&state.db, message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if message.conversation_id != conversation_id || message.is_deleted {
        return Err(ApiError::NotFound);
    }
    if message.sender_id != auth.user_id {
        return Err(ApiError::Forbidden);
    }

    grapevine_db::messages::soft_delete(&state.db, message_id, Utc::now()).await?;

    state.dispatcher.message_deleted(conversation_id, message_id);

    Ok(StatusCode::NO_CONTENT)
}
