use axum::extract::ws::{CloseFrame, Message};
use futures_util::SinkExt;

pub(crate) const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub(crate) const CLOSE_INTERNAL_ERROR: u16 = 1011;
pub(crate) const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Lifecycle of one socket: `Connecting → Authenticated → Active → Closed`.
/// Transitions only move forward; `Closed` is terminal, and closing an
/// already-closed session is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// Identity established by the gate. Everything a session loop needs to
/// stamp onto outbound frames without going back to storage.
pub(crate) struct SessionInfo {
    pub user_id: i64,
    pub username: String,
}

/// A socket that has been accepted but not yet authenticated. It already
/// has a connection id and a target group; there is no user identity to
/// record until the gate rules on the token.
pub(crate) struct PendingSession {
    pub connection_id: String,
    pub group: String,
    pub state: SessionState,
}

impl PendingSession {
    pub fn new(group: String) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            group,
            state: SessionState::Connecting,
        }
    }

    /// Fixes the verified identity onto the record. Identity and group never
    /// change after this point; only the state field moves, and only from
    /// the session's own task.
    pub fn authenticate(self, identity: SessionInfo) -> Session {
        Session {
            connection_id: self.connection_id,
            user_id: identity.user_id,
            username: identity.username,
            group: self.group,
            state: SessionState::Authenticated,
        }
    }
}

/// Per-connection record, owned exclusively by its handler task.
pub(crate) struct Session {
    pub connection_id: String,
    pub user_id: i64,
    pub username: String,
    pub group: String,
    state: SessionState,
}

impl Session {
    /// Group joined and handshake frame delivered.
    pub fn activate(&mut self) {
        if self.state == SessionState::Authenticated {
            self.state = SessionState::Active;
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Typing indicators go to everyone in the group except their sender.
    pub fn should_forward_typing(&self, sender_id: Option<i64>) -> bool {
        sender_id != Some(self.user_id)
    }
}

/// Sends a JSON frame with the `type` discriminator merged into the
/// payload object, matching the shape clients parse.
pub(crate) async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event_type: &str,
    mut payload: serde_json::Value,
) -> Result<(), ()> {
    if let Some(fields) = payload.as_object_mut() {
        fields.insert("type".to_string(), event_type.into());
    }
    sender
        .send(Message::Text(payload.to_string().into()))
        .await
        .map_err(|_| ())
}

pub(crate) async fn send_close(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
) -> Result<(), ()> {
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}
