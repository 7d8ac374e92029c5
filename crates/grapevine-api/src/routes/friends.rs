use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use grapevine_core::{serialize, AppState};
use grapevine_models::friend_request::FriendRequestStatus;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SendFriendRequestRequest {
    pub receiver_id: i64,
}

#[derive(Deserialize)]
pub struct RespondFriendRequestRequest {
    pub action: String,
}

pub async fn list_friends(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = grapevine_db::friends::list_friends(&state.db, auth.user_id).await?;
    let result: Vec<Value> = rows
        .iter()
        .map(|user| json!(serialize::user_summary(user)))
        .collect();

    Ok(Json(json!(result)))
}

pub async fn remove_friend(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    grapevine_db::users::get_user_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let removed = grapevine_db::friends::remove_friendship(&state.db, auth.user_id, user_id).await?;
    if !removed {
        return Err(ApiError::BadRequest("Not friends with this user".into()));
    }

    // Park any accepted request rows as declined so a later re-send can
    // revive them instead of hitting a duplicate.
    for (sender, receiver) in [(auth.user_id, user_id), (user_id, auth.user_id)] {
        let request =
            grapevine_db::friends::get_request_between(&state.db, sender, receiver).await?;
        if let Some(request) = request {
            if request.status == FriendRequestStatus::Accepted.as_str() {
                grapevine_db::friends::set_request_status(
                    &state.db,
                    request.id,
                    FriendRequestStatus::Declined.as_str(),
                    Utc::now(),
                )
                .await?;
            }
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_friend_requests(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let incoming_rows =
        grapevine_db::friends::list_incoming_pending(&state.db, auth.user_id).await?;
    let outgoing_rows =
        grapevine_db::friends::list_outgoing_pending(&state.db, auth.user_id).await?;

    let mut incoming = Vec::with_capacity(incoming_rows.len());
    for row in &incoming_rows {
        incoming.push(serialize::friend_request_view(&state.db, row).await?);
    }
    let mut outgoing = Vec::with_capacity(outgoing_rows.len());
    for row in &outgoing_rows {
        outgoing.push(serialize::friend_request_view(&state.db, row).await?);
    }

    Ok(Json(json!({
        "incoming": incoming,
        "outgoing": outgoing,
    })))
}

pub async fn send_friend_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendFriendRequestRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.receiver_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "Cannot send friend request to yourself".into(),
        ));
    }

    grapevine_db::users::get_user_by_id(&state.db, body.receiver_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if grapevine_db::friends::are_friends(&state.db, auth.user_id, body.receiver_id).await? {
        return Err(ApiError::BadRequest("Already friends".into()));
    }

    let existing =
        grapevine_db::friends::get_request_between(&state.db, auth.user_id, body.receiver_id)
            .await?;

    let request = match existing {
        Some(prior) if prior.status == FriendRequestStatus::Pending.as_str() => {
            return Err(ApiError::Conflict("Friend request already sent".into()));
        }
        Some(prior) if prior.status == FriendRequestStatus::Declined.as_str() => {
            // A declined request is revived instead of duplicated.
            grapevine_db::friends::set_request_status(
                &state.db,
                prior.id,
                FriendRequestStatus::Pending.as_str(),
                Utc::now(),
            )
            .await?
        }
        Some(_) => {
            return Err(ApiError::BadRequest(
                "Friend request already processed".into(),
            ));
        }
        None => {
            grapevine_db::friends::create_request(&state.db, auth.user_id, body.receiver_id).await?
        }
    };

    state.dispatcher.friend_request_sent(&request).await?;

    let view = serialize::friend_request_view(&state.db, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Friend request sent successfully",
            "friend_request": view,
        })),
    ))
}

pub async fn respond_friend_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<i64>,
    Json(body): Json<RespondFriendRequestRequest>,
) -> Result<Json<Value>, ApiError> {
    let request = match grapevine_db::friends::get_request(&state.db, request_id).await? {
        Some(request) => request,
        None => {
            // The row is gone (cancelled or cleaned up), so any unread
            // notification still pointing at it is stale. Retire those
            // before reporting the miss.
            if let Err(e) = state.dispatcher.friend_request_invalidated(request_id).await {
                tracing::warn!(request_id, "friend request invalidation failed: {e}");
            }
            return Err(ApiError::NotFound);
        }
    };

    if request.receiver_id != auth.user_id {
        return Err(ApiError::NotFound);
    }

    if body.action != "accept" && body.action != "decline" {
        return Err(ApiError::BadRequest(
            "Invalid action. Use 'accept' or 'decline'".into(),
        ));
    }

    if request.status != FriendRequestStatus::Pending.as_str() {
        return Err(ApiError::BadRequest(
            "Friend request already processed".into(),
        ));
    }

    if body.action == "accept" {
        let updated = grapevine_db::friends::set_request_status(
            &state.db,
            request.id,
            FriendRequestStatus::Accepted.as_str(),
            Utc::now(),
        )
        .await?;
        grapevine_db::friends::add_friendship(&state.db, request.sender_id, request.receiver_id)
            .await?;

        state.dispatcher.friend_request_accepted(&updated).await?;

        let view = serialize::friend_request_view(&state.db, &updated).await?;
        Ok(Json(json!({
            "message": "Friend request accepted",
            "friend_request": view,
        })))
    } else {
        let updated = grapevine_db::friends::set_request_status(
            &state.db,
            request.id,
            FriendRequestStatus::Declined.as_str(),
            Utc::now(),
        )
        .await?;

        state.dispatcher.friend_request_invalidated(request.id).await?;

        let view = serialize::friend_request_view(&state.db, &updated).await?;
        Ok(Json(json!({
            "message": "Friend request declined",
            "friend_request": view,
        })))
    }
}

pub async fn cancel_friend_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let request = grapevine_db::friends::get_request(&state.db, request_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if request.sender_id != auth.user_id {
        return Err(ApiError::NotFound);
    }
    if request.status != FriendRequestStatus::Pending.as_str() {
        return Err(ApiError::BadRequest(
            "Friend request already processed".into(),
        ));
    }

    // Invalidate while the row still exists so the receiver's stale
    // notification gets retired, then drop the row.
    state.dispatcher.friend_request_invalidated(request.id).await?;
    grapevine_db::friends::delete_request(&state.db, request.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn friendship_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    grapevine_db::users::get_user_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if grapevine_db::friends::are_friends(&state.db, auth.user_id, user_id).await? {
        return Ok(Json(json!({ "status": "friends" })));
    }

    let outgoing =
        grapevine_db::friends::get_request_between(&state.db, auth.user_id, user_id).await?;
    if let Some(request) = outgoing {
        if request.status == FriendRequestStatus::Pending.as_str() {
            return Ok(Json(json!({
                "status": "request_sent",
                "request_id": request.id,
            })));
        }
    }

    let incoming =
        grapevine_db::friends::get_request_between(&state.db, user_id, auth.user_id).await?;
    if let Some(request) = incoming {
        if request.status == FriendRequestStatus::Pending.as_str() {
            return Ok(Json(json!({
                "status": "request_received",
                "request_id": request.id,
            })));
        }
    }

    Ok(Json(json!({ "status": "none" })))
}
