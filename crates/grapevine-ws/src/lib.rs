mod conversation;
mod gate;
mod notification;
mod session;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use grapevine_core::AppState;
use serde::Deserialize;

#[derive(Deserialize)]
struct TokenParams {
    token: Option<String>,
}

pub fn feed_router() -> Router<AppState> {
    Router::new()
        .route("/ws/notifications/{user_id}", get(notification_upgrade))
        .route(
            "/ws/conversations/{conversation_id}",
            get(conversation_upgrade),
        )
}

async fn notification_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<TokenParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        notification::handle_connection(socket, state, user_id, params.token)
    })
}

async fn conversation_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(params): Query<TokenParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        conversation::handle_connection(socket, state, conversation_id, params.token)
    })
}
