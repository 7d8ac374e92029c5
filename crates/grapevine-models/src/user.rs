use serde::{Deserialize, Serialize};

/// Short user representation embedded in messages, notifications and
/// friend requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub picture_path: Option<String>,
}
