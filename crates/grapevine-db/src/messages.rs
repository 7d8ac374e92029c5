use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub image_path: Option<String>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLS: &str = "id, conversation_id, sender_id, content, image_path, is_edited, is_deleted, created_at, updated_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            content: row.try_get("content")?,
            image_path: row.try_get("image_path")?,
            is_edited: bool_from_any_row(row, "is_edited")?,
            is_deleted: bool_from_any_row(row, "is_deleted")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

/// Inserts the message and bumps the conversation's activity timestamp.
pub async fn create_message(
    pool: &DbPool,
    conversation_id: i64,
    sender_id: i64,
    content: &str,
    image_path: Option<&str>,
) -> Result<MessageRow, DbError> {
    let sql = format!(
        "INSERT INTO messages (conversation_id, sender_id, content, image_path)
         VALUES ($1, $2, $3, $4)
         RETURNING {SELECT_COLS}"
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(image_path)
        .fetch_one(pool)
        .await?;

    crate::conversations::touch_updated_at(pool, conversation_id, row.created_at).await?;
    Ok(row)
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let sql = format!("SELECT {SELECT_COLS} FROM messages WHERE id = $1");
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Non-deleted messages in chronological order. `before` pages backwards
/// from a message id; the newest page comes back when it is `None`.
pub async fn list_for_conversation(
    pool: &DbPool,
    conversation_id: i64,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let mut rows = match before {
        Some(before_id) => {
            let sql = format!(
                "SELECT {SELECT_COLS} FROM messages
                 WHERE conversation_id = $1 AND is_deleted = 0 AND id < $2
                 ORDER BY created_at DESC, id DESC
                 LIMIT $3"
            );
            sqlx::query_as::<_, MessageRow>(&sql)
                .bind(conversation_id)
                .bind(before_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {SELECT_COLS} FROM messages
                 WHERE conversation_id = $1 AND is_deleted = 0
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2"
            );
            sqlx::query_as::<_, MessageRow>(&sql)
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };
    rows.reverse();
    Ok(rows)
}

pub async fn set_edited(
    pool: &DbPool,
    id: i64,
    content: &str,
    now: DateTime<Utc>,
) -> Result<MessageRow, DbError> {
    let sql = format!(
        "UPDATE messages SET content = $2, is_edited = 1, updated_at = $3 WHERE id = $1
         RETURNING {SELECT_COLS}"
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .bind(content)
        .bind(datetime_to_db_text(now))
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    crate::conversations::touch_updated_at(pool, row.conversation_id, now).await?;
    Ok(row)
}

/// Tombstones the row; history queries skip it but the id stays valid.
pub async fn soft_delete(pool: &DbPool, id: i64, now: DateTime<Utc>) -> Result<MessageRow, DbError> {
    let sql = format!(
        "UPDATE messages SET is_deleted = 1, updated_at = $2 WHERE id = $1
         RETURNING {SELECT_COLS}"
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .bind(datetime_to_db_text(now))
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    crate::conversations::touch_updated_at(pool, row.conversation_id, now).await?;
    Ok(row)
}

pub async fn last_message(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Option<MessageRow>, DbError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM messages
         WHERE conversation_id = $1 AND is_deleted = 0
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}
