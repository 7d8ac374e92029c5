use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::friend_request::FriendRequestView;
use crate::user::UserSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FriendRequest,
    FriendAccepted,
    PostLike,
    PostComment,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FriendRequest => "friend_request",
            Self::FriendAccepted => "friend_accepted",
            Self::PostLike => "post_like",
            Self::PostComment => "post_comment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "friend_request" => Some(Self::FriendRequest),
            "friend_accepted" => Some(Self::FriendAccepted),
            "post_like" => Some(Self::PostLike),
            "post_comment" => Some(Self::PostComment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub from_user: Option<UserSummary>,
    pub post_id: Option<i64>,
    pub friend_request: Option<FriendRequestView>,
}
