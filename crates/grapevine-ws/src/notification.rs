use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use grapevine_core::broker::{self, GroupEvent};
use grapevine_core::error::CoreError;
use grapevine_core::{serialize, AppState};
use grapevine_models::feed::{ClientEvent, EVENT_UNREAD_NOTIFICATIONS};
use grapevine_models::notification::NotificationView;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::gate::{self, GateError};
use crate::session::{
    send_close, send_event, PendingSession, Session, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION,
    CLOSE_TRY_AGAIN_LATER,
};

/// Size of the unread backlog flushed once at connect. Everything after
/// that arrives incrementally.
const UNREAD_FLUSH_LIMIT: i64 = 20;

pub(crate) async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    user_id: i64,
    token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let pending = PendingSession::new(broker::notification_group(user_id));
    let info = match gate::authorize_notifications(&state, user_id, token.as_deref()).await {
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

    // Join before the flush so nothing created in between is lost; a
    // notification seen in both the snapshot and the live stream carries
    // the same id and is harmless to re-render.
    let mut events = state.broker.join(&session.group);
    tracing::info!(
        connection_id = %session.connection_id,
        user_id = session.user_id,
        "notification feed connected"
    );

    match unread_snapshot(&state, session.user_id).await {
        Ok(notifications) => {
            if send_event(
                &mut sender,
                EVENT_UNREAD_NOTIFICATIONS,
                json!({ "notifications": notifications }),
            )
            .await
            .is_err()
            {
                session.close();
                drop(events);
                state.broker.leave(&session.group);
                return;
            }
        }
        Err(e) => {
            tracing::warn!(user_id = session.user_id, "unread flush failed: {e}");
            let _ = send_close(&mut sender, CLOSE_INTERNAL_ERROR, "Internal error").await;
            session.close();
            drop(events);
            state.broker.leave(&session.group);
            return;
        }
    }
    session.activate();

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, &session, &text).await;
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
                        if send_event(&mut sender, &event_type, payload).await.is_err() {
                            break "websocket send error";
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            user_id = session.user_id,
                            skipped,
                            "notification feed lagged; forcing reconnect"
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
        "Client {} disconnected from notifications: {}",
        session.user_id,
        disconnect_reason
    );
    drop(events);
    state.broker.leave(&session.group);
}

async fn unread_snapshot(
    state: &AppState,
    user_id: i64,
) -> Result<Vec<NotificationView>, CoreError> {
    let rows =
        grapevine_db::notifications::recent_unread(&state.db, user_id, UNREAD_FLUSH_LIMIT).await?;
    let mut views = Vec::with_capacity(rows.len());
    for row in &rows {
        views.push(serialize::notification_view(&state.db, row).await?);
    }
    Ok(views)
}

async fn handle_client_frame(state: &AppState, session: &Session, text: &str) {
    let Ok(event) = serde_json::from_str::<ClientEvent>(text) else {
        return;
    };
    match event {
        ClientEvent::MarkAsRead { notification_id } => {
            // The query is recipient-gated, so foreign or unknown ids are a
            // no-op rather than an error.
            if let Err(e) =
                grapevine_db::notifications::mark_read(&state.db, notification_id, session.user_id)
                    .await
            {
                tracing::warn!(notification_id, "mark-as-read failed: {e}");
            }
        }
        // Typing and message frames belong to conversation streams.
        ClientEvent::Typing { .. } | ClientEvent::Message { .. } => {}
    }
}
