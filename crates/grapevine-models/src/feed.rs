use serde::Deserialize;

// Server -> client event names. Every outbound frame is a JSON object whose
// `type` field carries one of these.
pub const EVENT_CONNECTION_ESTABLISHED: &str = "connection_established";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_MESSAGE_EDITED: &str = "message_edited";
pub const EVENT_MESSAGE_DELETED: &str = "message_deleted";
pub const EVENT_UNREAD_NOTIFICATIONS: &str = "unread_notifications";
pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_FRIEND_REQUEST_INVALID: &str = "friend_request_invalid";

/// Client -> server frames. Anything that fails to parse into one of these
/// is dropped by the session without closing the connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    MarkAsRead {
        notification_id: i64,
    },
    Typing {
        #[serde(default)]
        is_typing: bool,
    },
    Message {
        message: InboundMessage,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}
