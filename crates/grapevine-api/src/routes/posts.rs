use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use grapevine_core::AppState;
use grapevine_util::validation::validate_comment_content;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

/// Toggle: a second like removes the first. Only the like edge notifies the
/// author; unlikes stay silent.
pub async fn toggle_like(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let post = grapevine_db::posts::get_post(&state.db, post_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let liked = if grapevine_db::posts::has_liked(&state.db, post_id, auth.user_id).await? {
        grapevine_db::posts::remove_like(&state.db, post_id, auth.user_id).await?;
        false
    } else {
        let inserted = grapevine_db::posts::add_like(&state.db, post_id, auth.user_id).await?;
        if inserted {
            state.dispatcher.post_liked(&post, auth.user_id).await?;
        }
        true
    };

    let like_count = grapevine_db::posts::like_count(&state.db, post_id).await?;

    Ok(Json(json!({
        "liked": liked,
        "like_count": like_count,
    })))
}

pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(post_id): Path<i64>,
    Json(body): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let post = grapevine_db::posts::get_post(&state.db, post_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let content = body.content.trim();
    validate_comment_content(content).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let comment =
        grapevine_db::posts::create_comment(&state.db, post_id, auth.user_id, content).await?;

    state.dispatcher.post_commented(&post, auth.user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": comment.id,
            "post_id": comment.post_id,
            "author_id": comment.author_id,
            "content": comment.content,
            "created_at": comment.created_at,
        })),
    ))
}
