use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use grapevine_core::broker::{self, GroupEvent};
use grapevine_core::AppState;
use grapevine_models::feed::{
    ClientEvent, InboundMessage, EVENT_CONNECTION_ESTABLISHED, EVENT_TYPING,
};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::gate::{self, GateError};
use crate::session::{
    send_close, send_event, PendingSession, Session, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION,
    CLOSE_TRY_AGAIN_LATER,
};

pub(crate) async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    conversation_id: i64,
    token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let pending = PendingSession::new(broker::conversation_group(conversation_id));
    let info = match gate::authorize_conversation(&state, conversation_id, token.as_deref()).await
    {
        Ok(info) => info,
        Err(GateError::Rejected(reason)) => {
            tracing::debug!(
                connection_id = %pending.connection_id,
                "socket rejected while {:?}: {reason}",
                pending.state
            );
            let _ = send_close(&mut sender, CLOSE_POLICY_VIOLATION, reason).await;
            return;
        }
        Err(GateError::Internal) => {
            let _ = send_close(&mut sender, CLOSE_INTERNAL_ERROR, "Internal error").await;
            return;
        }
    };
    let mut session = pending.authenticate(info);

    let mut events = state.broker.join(&session.group);
    tracing::info!(
        connection_id = %session.connection_id,
        user_id = session.user_id,
        conversation_id,
        "conversation stream connected"
    );

    if send_event(
        &mut sender,
        EVENT_CONNECTION_ESTABLISHED,
        json!({
            "conversation_id": conversation_id,
            "user_id": session.user_id,
            "message": "Connected to conversation",
        }),
    )
    .await
    .is_err()
    {
        session.close();
        drop(events);
        state.broker.leave(&session.group);
        return;
    }
    session.activate();

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, &session, conversation_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) => break "client close frame",
                    Some(Err(_)) => break "websocket receive error",
                    None => break "websocket stream ended",
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(GroupEvent { event_type, payload }) => {
                        if event_type == EVENT_TYPING
                            && !session
                                .should_forward_typing(payload.get("user_id").and_then(|v| v.as_i64()))
                        {
                            continue;
                        }
                        if send_event(&mut sender, &event_type, payload).await.is_err() {
                            break "websocket send error";
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            user_id = session.user_id,
                            conversation_id,
                            skipped,
                            "conversation stream lagged; forcing reconnect"
                        );
                        let _ = send_close(
                            &mut sender,
                            CLOSE_TRY_AGAIN_LATER,
                            "Stream fell behind; reconnect required",
                        )
                        .await;
                        break "event stream lagged";
                    }
                    Err(RecvError::Closed) => break "event stream closed",
                }
            }
        }
    };

    session.close();
    tracing::info!(
        connection_id = %session.connection_id,
        "Client {} disconnected from conversation {}: {}",
        session.user_id,
        conversation_id,
        disconnect_reason
    );
    drop(events);
    state.broker.leave(&session.group);
}

/// Inbound frames that fail to parse are dropped without closing the
/// connection, so protocol drift degrades instead of disconnecting.
async fn handle_client_frame(
    state: &AppState,
    session: &Session,
    conversation_id: i64,
    text: &str,
) {
    let Ok(event) = serde_json::from_str::<ClientEvent>(text) else {
        return;
    };
    match event {
        ClientEvent::Typing { is_typing } => {
            state.broker.broadcast(
                &session.group,
                EVENT_TYPING,
                json!({
                    "user_id": session.user_id,
                    "username": session.username,
                    "is_typing": is_typing,
                }),
            );
        }
        ClientEvent::Message { message } => {
            create_and_broadcast(state, session, conversation_id, message).await;
        }
        // mark_as_read belongs to the notification feed.
        ClientEvent::MarkAsRead { .. } => {}
    }
}

async fn create_and_broadcast(
    state: &AppState,
    session: &Session,
    conversation_id: i64,
    inbound: InboundMessage,
) {
    let content = inbound.content.as_deref().unwrap_or("").trim().to_string();
    let image = inbound.image.as_deref().filter(|s| !s.trim().is_empty());
    if content.is_empty() && image.is_none() {
        return;
    }

    // The conversation may have disappeared since the gate ran; a write
    // against a missing conversation is dropped, not a crash.
    match grapevine_db::conversations::get_conversation(&state.db, conversation_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::warn!(conversation_id, "message for missing conversation dropped");
            return;
        }
        Err(e) => {
            tracing::warn!(conversation_id, "conversation lookup failed: {e}");
            return;
        }
    }
    match grapevine_db::conversations::is_participant(&state.db, conversation_id, session.user_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            tracing::warn!(conversation_id, "participant check failed: {e}");
            return;
        }
    }

    let message = match grapevine_db::messages::create_message(
        &state.db,
        conversation_id,
        session.user_id,
        &content,
        image,
    )
    .await
    {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(conversation_id, "message write failed: {e}");
            return;
        }
    };

    // The row is durable at this point; a failed broadcast only costs live
    // delivery, which reconnecting clients recover by fetching history.
    if let Err(e) = state.dispatcher.message_created(&message).await {
        tracing::warn!(message_id = message.id, "message broadcast failed: {e}");
    }
}
