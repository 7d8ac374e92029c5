use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: i64,
    pub kind: String,
    pub message: String,
    pub from_user_id: Option<i64>,
    pub post_id: Option<i64>,
    pub friend_request_id: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

const SELECT_COLS: &str = "id, recipient_id, kind, message, from_user_id, post_id, friend_request_id, is_read, created_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for NotificationRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            recipient_id: row.try_get("recipient_id")?,
            kind: row.try_get("kind")?,
            message: row.try_get("message")?,
            from_user_id: row.try_get("from_user_id")?,
            post_id: row.try_get("post_id")?,
            friend_request_id: row.try_get("friend_request_id")?,
            is_read: bool_from_any_row(row, "is_read")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn create(
    pool: &DbPool,
    recipient_id: i64,
    kind: &str,
    message: &str,
    from_user_id: Option<i64>,
    post_id: Option<i64>,
    friend_request_id: Option<i64>,
) -> Result<NotificationRow, DbError> {
    let sql = format!(
        "INSERT INTO notifications (recipient_id, kind, message, from_user_id, post_id, friend_request_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {SELECT_COLS}"
    );
    let row = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(recipient_id)
        .bind(kind)
        .bind(message)
        .bind(from_user_id)
        .bind(post_id)
        .bind(friend_request_id)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get(pool: &DbPool, id: i64) -> Result<Option<NotificationRow>, DbError> {
    let sql = format!("SELECT {SELECT_COLS} FROM notifications WHERE id = $1");
    let row = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_for_recipient(
    pool: &DbPool,
    recipient_id: i64,
    limit: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM notifications
         WHERE recipient_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2"
    );
    let rows = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Newest unread first, capped. Feeds the backlog flush on connect.
pub async fn recent_unread(
    pool: &DbPool,
    recipient_id: i64,
    limit: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM notifications
         WHERE recipient_id = $1 AND is_read = 0
         ORDER BY created_at DESC, id DESC
         LIMIT $2"
    );
    let rows = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn unread_count(pool: &DbPool, recipient_id: i64) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = 0",
    )
    .bind(recipient_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Recipient-gated so one user cannot mark another's notification.
pub async fn mark_read(pool: &DbPool, id: i64, recipient_id: i64) -> Result<bool, DbError> {
    let result =
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = $1 AND recipient_id = $2")
            .bind(id)
            .bind(recipient_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Newest like notification from the same actor for the same post on or
/// after the cutoff, read or not.
pub async fn find_post_like_since(
    pool: &DbPool,
    recipient_id: i64,
    actor_id: i64,
    post_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Option<NotificationRow>, DbError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM notifications
         WHERE recipient_id = $1 AND from_user_id = $2 AND post_id = $3
           AND kind = 'post_like' AND created_at >= $4
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(recipient_id)
        .bind(actor_id)
        .bind(post_id)
        .bind(datetime_to_db_text(cutoff))
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Re-dates an existing notification and flips it back to unread.
pub async fn refresh(pool: &DbPool, id: i64, now: DateTime<Utc>) -> Result<NotificationRow, DbError> {
    let sql = format!(
        "UPDATE notifications SET created_at = $2, is_read = 0 WHERE id = $1
         RETURNING {SELECT_COLS}"
    );
    let row = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(id)
        .bind(datetime_to_db_text(now))
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Unread request notifications still pointing at a friend request. Only
/// the `friend_request` kind counts; `friend_accepted` rows are never
/// invalidated.
pub async fn unread_for_friend_request(
    pool: &DbPool,
    friend_request_id: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM notifications
         WHERE friend_request_id = $1 AND kind = 'friend_request' AND is_read = 0
         ORDER BY id"
    );
    let rows = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(friend_request_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Marks one recipient's unread notifications for a request as read, used
/// when that recipient acts on the request.
pub async fn mark_read_for_friend_request(
    pool: &DbPool,
    friend_request_id: i64,
    recipient_id: i64,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = 1
         WHERE friend_request_id = $1 AND recipient_id = $2 AND is_read = 0",
    )
    .bind(friend_request_id)
    .bind(recipient_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn clear_for_recipient(pool: &DbPool, recipient_id: i64) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM notifications WHERE recipient_id = $1")
        .bind(recipient_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
