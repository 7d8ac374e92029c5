use crate::{datetime_from_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub picture_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

const SELECT_COLS: &str = "id, username, first_name, last_name, picture_path, created_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            picture_path: row.try_get("picture_path")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn create_user(
    pool: &DbPool,
    username: &str,
    first_name: &str,
    last_name: &str,
    picture_path: Option<&str>,
) -> Result<UserRow, DbError> {
    let sql = format!(
        "INSERT INTO users (username, first_name, last_name, picture_path)
         VALUES ($1, $2, $3, $4)
         RETURNING {SELECT_COLS}"
    );
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .bind(picture_path)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {SELECT_COLS} FROM users WHERE id = $1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_user_by_username(
    pool: &DbPool,
    username: &str,
) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {SELECT_COLS} FROM users WHERE username = $1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}
