use crate::users::UserRow;
use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const CONVERSATION_COLS: &str = "id, created_at, updated_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ConversationRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

pub async fn create_conversation(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<ConversationRow, DbError> {
    let mut tx = pool.begin().await?;

    let (conversation_id,): (i64,) =
        sqlx::query_as("INSERT INTO conversations DEFAULT VALUES RETURNING id")
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query(
        "INSERT INTO conversation_participants (conversation_id, user_id)
         VALUES ($1, $2), ($1, $3)",
    )
    .bind(conversation_id)
    .bind(user_a)
    .bind(user_b)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = $1");
    let row = sqlx::query_as::<_, ConversationRow>(&sql)
        .bind(conversation_id)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn find_between(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<Option<ConversationRow>, DbError> {
    let row = sqlx::query_as::<_, ConversationRow>(
        "SELECT c.id, c.created_at, c.updated_at
         FROM conversations c
         INNER JOIN conversation_participants a ON a.conversation_id = c.id AND a.user_id = $1
         INNER JOIN conversation_participants b ON b.conversation_id = c.id AND b.user_id = $2
         LIMIT 1",
    )
    .bind(user_a)
    .bind(user_b)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_conversation(pool: &DbPool, id: i64) -> Result<Option<ConversationRow>, DbError> {
    let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = $1");
    let row = sqlx::query_as::<_, ConversationRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn is_participant(
    pool: &DbPool,
    conversation_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let exists: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2 LIMIT 1",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(exists.is_some())
}

pub async fn participant_ids(pool: &DbPool, conversation_id: i64) -> Result<Vec<i64>, DbError> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT user_id FROM conversation_participants WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn participants(pool: &DbPool, conversation_id: i64) -> Result<Vec<UserRow>, DbError> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.picture_path, u.created_at
         FROM users u
         INNER JOIN conversation_participants cp ON cp.user_id = u.id
         WHERE cp.conversation_id = $1
         ORDER BY u.id",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Most recently active first.
pub async fn list_for_user(pool: &DbPool, user_id: i64) -> Result<Vec<ConversationRow>, DbError> {
    let rows = sqlx::query_as::<_, ConversationRow>(
        "SELECT c.id, c.created_at, c.updated_at
         FROM conversations c
         INNER JOIN conversation_participants me ON me.conversation_id = c.id
         WHERE me.user_id = $1
         ORDER BY c.updated_at DESC, c.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn touch_updated_at(
    pool: &DbPool,
    conversation_id: i64,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
        .bind(conversation_id)
        .bind(datetime_to_db_text(now))
        .execute(pool)
        .await?;
    Ok(())
}
