use crate::{datetime_from_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub author_id: i64,
    pub description: String,
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

const POST_COLS: &str = "id, author_id, description, image_path, created_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for PostRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            author_id: row.try_get("author_id")?,
            description: row.try_get("description")?,
            image_path: row.try_get("image_path")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

const COMMENT_COLS: &str = "id, post_id, author_id, content, created_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for CommentRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            post_id: row.try_get("post_id")?,
            author_id: row.try_get("author_id")?,
            content: row.try_get("content")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn create_post(
    pool: &DbPool,
    author_id: i64,
    description: &str,
    image_path: Option<&str>,
) -> Result<PostRow, DbError> {
    let sql = format!(
        "INSERT INTO posts (author_id, description, image_path)
         VALUES ($1, $2, $3)
         RETURNING {POST_COLS}"
    );
    let row = sqlx::query_as::<_, PostRow>(&sql)
        .bind(author_id)
        .bind(description)
        .bind(image_path)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_post(pool: &DbPool, id: i64) -> Result<Option<PostRow>, DbError> {
    let sql = format!("SELECT {POST_COLS} FROM posts WHERE id = $1");
    let row = sqlx::query_as::<_, PostRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn has_liked(pool: &DbPool, post_id: i64, user_id: i64) -> Result<bool, DbError> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM post_likes WHERE post_id = $1 AND user_id = $2 LIMIT 1")
            .bind(post_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

/// Returns whether a new like row was actually inserted.
pub async fn add_like(pool: &DbPool, post_id: i64, user_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO post_likes (post_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(post_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_like(pool: &DbPool, post_id: i64, user_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
        .bind(post_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn like_count(pool: &DbPool, post_id: i64) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_likes WHERE post_id = $1")
        .bind(post_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn create_comment(
    pool: &DbPool,
    post_id: i64,
    author_id: i64,
    content: &str,
) -> Result<CommentRow, DbError> {
    let sql = format!(
        "INSERT INTO comments (post_id, author_id, content)
         VALUES ($1, $2, $3)
         RETURNING {COMMENT_COLS}"
    );
    let row = sqlx::query_as::<_, CommentRow>(&sql)
        .bind(post_id)
        .bind(author_id)
        .bind(content)
        .fetch_one(pool)
        .await?;
    Ok(row)
}
