use crate::users::UserRow;
use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct FriendRequestRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const REQUEST_COLS: &str = "id, sender_id, receiver_id, status, created_at, updated_at";

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for FriendRequestRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            status: row.try_get("status")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
            updated_at: datetime_from_db_text(&updated_at_raw)?,
        })
    }
}

pub async fn are_friends(pool: &DbPool, user_id: i64, other_id: i64) -> Result<bool, DbError> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM friendships WHERE user_id = $1 AND friend_id = $2 LIMIT 1")
            .bind(user_id)
            .bind(other_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

/// Inserts both directed rows so either side can look the friendship up.
pub async fn add_friendship(pool: &DbPool, user_id: i64, other_id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO friendships (user_id, friend_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(other_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO friendships (user_id, friend_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(other_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn remove_friendship(pool: &DbPool, user_id: i64, other_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query(
        "DELETE FROM friendships
         WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)",
    )
    .bind(user_id)
    .bind(other_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_friends(pool: &DbPool, user_id: i64) -> Result<Vec<UserRow>, DbError> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, first_name, last_name, picture_path, created_at
         FROM users
         WHERE id IN (SELECT friend_id FROM friendships WHERE user_id = $1)
         ORDER BY username",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create_request(
    pool: &DbPool,
    sender_id: i64,
    receiver_id: i64,
) -> Result<FriendRequestRow, DbError> {
    let sql = format!(
        "INSERT INTO friend_requests (sender_id, receiver_id, status)
         VALUES ($1, $2, 'pending')
         RETURNING {REQUEST_COLS}"
    );
    let row = sqlx::query_as::<_, FriendRequestRow>(&sql)
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_request(pool: &DbPool, id: i64) -> Result<Option<FriendRequestRow>, DbError> {
    let sql = format!("SELECT {REQUEST_COLS} FROM friend_requests WHERE id = $1");
    let row = sqlx::query_as::<_, FriendRequestRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Directional lookup, sender to receiver only.
pub async fn get_request_between(
    pool: &DbPool,
    sender_id: i64,
    receiver_id: i64,
) -> Result<Option<FriendRequestRow>, DbError> {
    let sql =
        format!("SELECT {REQUEST_COLS} FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2");
    let row = sqlx::query_as::<_, FriendRequestRow>(&sql)
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn set_request_status(
    pool: &DbPool,
    id: i64,
    status: &str,
    now: DateTime<Utc>,
) -> Result<FriendRequestRow, DbError> {
    let sql = format!(
        "UPDATE friend_requests SET status = $2, updated_at = $3 WHERE id = $1
         RETURNING {REQUEST_COLS}"
    );
    let row = sqlx::query_as::<_, FriendRequestRow>(&sql)
        .bind(id)
        .bind(status)
        .bind(datetime_to_db_text(now))
        .fetch_optional(pool)
        .await?;
    row.ok_or(DbError::NotFound)
}

pub async fn delete_request(pool: &DbPool, id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM friend_requests WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_incoming_pending(
    pool: &DbPool,
    receiver_id: i64,
) -> Result<Vec<FriendRequestRow>, DbError> {
    let sql = format!(
        "SELECT {REQUEST_COLS} FROM friend_requests
         WHERE receiver_id = $1 AND status = 'pending'
         ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query_as::<_, FriendRequestRow>(&sql)
        .bind(receiver_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_outgoing_pending(
    pool: &DbPool,
    sender_id: i64,
) -> Result<Vec<FriendRequestRow>, DbError> {
    let sql = format!(
        "SELECT {REQUEST_COLS} FROM friend_requests
         WHERE sender_id = $1 AND status = 'pending'
         ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query_as::<_, FriendRequestRow>(&sql)
        .bind(sender_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn setup_users(pool: &DbPool) -> (i64, i64) {
        let a = crate::users::create_user(pool, "ania", "Ania", "Nowak", None)
            .await
            .unwrap();
        let b = crate::users::create_user(pool, "bartek", "Bartek", "Wilk", None)
            .await
            .unwrap();
        (a.id, b.id)
    }

    #[tokio::test]
    async fn test_friendship_is_symmetric() {
        let pool = test_pool().await;
        let (a, b) = setup_users(&pool).await;

        assert!(!are_friends(&pool, a, b).await.unwrap());
        add_friendship(&pool, a, b).await.unwrap();
        assert!(are_friends(&pool, a, b).await.unwrap());
        assert!(are_friends(&pool, b, a).await.unwrap());

        let friends_of_a = list_friends(&pool, a).await.unwrap();
        assert_eq!(friends_of_a.len(), 1);
        assert_eq!(friends_of_a[0].id, b);
    }

    #[tokio::test]
    async fn test_add_friendship_is_idempotent() {
        let pool = test_pool().await;
        let (a, b) = setup_users(&pool).await;

        add_friendship(&pool, a, b).await.unwrap();
        add_friendship(&pool, a, b).await.unwrap();
        assert_eq!(list_friends(&pool, a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_friendship_clears_both_directions() {
        let pool = test_pool().await;
        let (a, b) = setup_users(&pool).await;

        add_friendship(&pool, a, b).await.unwrap();
        assert!(remove_friendship(&pool, a, b).await.unwrap());
        assert!(!are_friends(&pool, a, b).await.unwrap());
        assert!(!are_friends(&pool, b, a).await.unwrap());
        assert!(!remove_friendship(&pool, a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_request_lifecycle() {
        let pool = test_pool().await;
        let (a, b) = setup_users(&pool).await;

        let request = create_request(&pool, a, b).await.unwrap();
        assert_eq!(request.status, "pending");

        let found = get_request_between(&pool, a, b).await.unwrap().unwrap();
        assert_eq!(found.id, request.id);
        assert!(get_request_between(&pool, b, a).await.unwrap().is_none());

        let incoming = list_incoming_pending(&pool, b).await.unwrap();
        assert_eq!(incoming.len(), 1);
        let outgoing = list_outgoing_pending(&pool, a).await.unwrap();
        assert_eq!(outgoing.len(), 1);

        let updated = set_request_status(&pool, request.id, "accepted", Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.status, "accepted");
        assert!(list_incoming_pending(&pool, b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_request_rejected() {
        let pool = test_pool().await;
        let (a, b) = setup_users(&pool).await;

        create_request(&pool, a, b).await.unwrap();
        assert!(create_request(&pool, a, b).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_request() {
        let pool = test_pool().await;
        let (a, b) = setup_users(&pool).await;

        let request = create_request(&pool, a, b).await.unwrap();
        assert!(delete_request(&pool, request.id).await.unwrap());
        assert!(get_request(&pool, request.id).await.unwrap().is_none());
        assert!(!delete_request(&pool, request.id).await.unwrap());
    }
}
