use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ReadReceiptRow {
    pub user_id: i64,
    pub username: String,
    pub read_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ReadReceiptRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let read_at_raw: String = row.try_get("read_at")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            read_at: datetime_from_db_text(&read_at_raw)?,
        })
    }
}

/// Marks every message the reader has not seen yet in one statement.
/// Re-running it is a no-op, so retries and double-clicks stay cheap.
/// Returns how many receipts were inserted.
pub async fn mark_conversation_read(
    pool: &DbPool,
    conversation_id: i64,
    reader_id: i64,
    now: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "INSERT INTO message_read_statuses (message_id, user_id, read_at)
         SELECT m.id, $2, $3
         FROM messages m
         WHERE m.conversation_id = $1
           AND m.sender_id != $2
           AND m.is_deleted = 0
           AND NOT EXISTS (
               SELECT 1 FROM message_read_statuses r
               WHERE r.message_id = m.id AND r.user_id = $2
           )",
    )
    .bind(conversation_id)
    .bind(reader_id)
    .bind(datetime_to_db_text(now))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Messages from other participants the reader has no receipt for.
pub async fn unread_count(
    pool: &DbPool,
    conversation_id: i64,
    reader_id: i64,
) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*)
         FROM messages m
         WHERE m.conversation_id = $1
           AND m.sender_id != $2
           AND m.is_deleted = 0
           AND NOT EXISTS (
               SELECT 1 FROM message_read_statuses r
               WHERE r.message_id = m.id AND r.user_id = $2
           )",
    )
    .bind(conversation_id)
    .bind(reader_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn read_by(pool: &DbPool, message_id: i64) -> Result<Vec<ReadReceiptRow>, DbError> {
    let rows = sqlx::query_as::<_, ReadReceiptRow>(
        "SELECT r.user_id, u.username, r.read_at
         FROM message_read_statuses r
         INNER JOIN users u ON u.id = r.user_id
         WHERE r.message_id = $1
         ORDER BY r.read_at, r.user_id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn has_read(pool: &DbPool, message_id: i64, user_id: i64) -> Result<bool, DbError> {
    let exists: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM message_read_statuses WHERE message_id = $1 AND user_id = $2 LIMIT 1",
    )
    .bind(message_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}
