use grapevine_core::auth::{self, Claims};
use grapevine_core::AppState;

use crate::session::SessionInfo;

/// Why the gate refused a connection. `Rejected` closes with 1008,
/// `Internal` with 1011. Nothing is registered with the broker until the
/// gate has passed.
pub(crate) enum GateError {
    Rejected(&'static str),
    Internal,
}

/// Notification feeds are personal: the token subject must match the
/// user id in the path, or anyone could watch another user's feed by
/// editing the URL.
pub(crate) async fn authorize_notifications(
    state: &AppState,
    user_id: i64,
    token: Option<&str>,
) -> Result<SessionInfo, GateError> {
    let claims = verify(state, token)?;
    if claims.sub != user_id {
        tracing::debug!(
            subject = claims.sub,
            requested = user_id,
            "rejected notification feed subject mismatch"
        );
        return Err(GateError::Rejected("Token does not match requested feed"));
    }
    resolve_user(state, claims.sub).await
}

/// Conversation streams require the authenticated user to be a current
/// participant of an existing conversation.
pub(crate) async fn authorize_conversation(
    state: &AppState,
    conversation_id: i64,
    token: Option<&str>,
) -> Result<SessionInfo, GateError> {
    let claims = verify(state, token)?;
    let conversation = grapevine_db::conversations::get_conversation(&state.db, conversation_id)
        .await
        .map_err(|_| GateError::Internal)?;
    if conversation.is_none() {
        return Err(GateError::Rejected("Unknown conversation"));
    }
    let participant =
        grapevine_db::conversations::is_participant(&state.db, conversation_id, claims.sub)
            .await
            .map_err(|_| GateError::Internal)?;
    if !participant {
        tracing::debug!(
            user_id = claims.sub,
            conversation_id,
            "rejected non-participant conversation connect"
        );
        return Err(GateError::Rejected("Not a conversation participant"));
    }
    resolve_user(state, claims.sub).await
}

fn verify(state: &AppState, token: Option<&str>) -> Result<Claims, GateError> {
    let Some(token) = token else {
        return Err(GateError::Rejected("Missing token"));
    };
    auth::validate_token(token, &state.config.jwt_secret)
        .map_err(|_| GateError::Rejected("Invalid or expired token"))
}

async fn resolve_user(state: &AppState, user_id: i64) -> Result<SessionInfo, GateError> {
    let user = grapevine_db::users::get_user_by_id(&state.db, user_id)
        .await
        .map_err(|_| GateError::Internal)?;
    match user {
        Some(user) => Ok(SessionInfo {
            user_id: user.id,
            username: user.username,
        }),
        None => Err(GateError::Rejected("Unknown user")),
    }
}
