use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageView;
use crate::user::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: i64,
    pub participants: Vec<UserSummary>,
    /// The participant that is not the requesting user. `None` only for a
    /// degenerate conversation the viewer is the sole participant of.
    pub other_participant: Option<UserSummary>,
    pub last_message: Option<MessageView>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
