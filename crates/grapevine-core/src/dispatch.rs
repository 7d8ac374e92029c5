use crate::broker::{conversation_group, notification_group, GroupBroker};
use crate::error::CoreError;
use crate::serialize;
use chrono::{Duration, Utc};
use grapevine_db::friends::FriendRequestRow;
use grapevine_db::messages::MessageRow;
use grapevine_db::notifications::NotificationRow;
use grapevine_db::posts::PostRow;
use grapevine_db::DbPool;
use grapevine_models::feed::{
    EVENT_FRIEND_REQUEST_INVALID, EVENT_MESSAGE, EVENT_MESSAGE_DELETED, EVENT_MESSAGE_EDITED,
    EVENT_NOTIFICATION,
};
use serde_json::json;

pub const FRIEND_REQUEST_INVALID_MESSAGE: &str = "Friend request is no longer available";

/// Called at the tail of each qualifying write. Rows are committed by the
/// caller first; the dispatcher only records notifications and fans events
/// out, so a delivery miss is always recoverable by refetching.
#[derive(Clone)]
pub struct EventDispatcher {
    db: DbPool,
    broker: GroupBroker,
}

impl EventDispatcher {
    pub fn new(db: DbPool, broker: GroupBroker) -> Self {
        Self { db, broker }
    }

    pub async fn message_created(&self, message: &MessageRow) -> Result<(), CoreError> {
        let view = serialize::message_view(&self.db, message).await?;
        let delivered = self.broker.broadcast(
            &conversation_group(message.conversation_id),
            EVENT_MESSAGE,
            json!({ "message": view }),
        );
        tracing::debug!(
            message_id = message.id,
            conversation_id = message.conversation_id,
            delivered,
            "message event dispatched"
        );
        Ok(())
    }

    pub async fn message_edited(&self, message: &MessageRow) -> Result<(), CoreError> {
        let view = serialize::message_view(&self.db, message).await?;
        self.broker.broadcast(
            &conversation_group(message.conversation_id),
            EVENT_MESSAGE_EDITED,
            json!({ "message": view }),
        );
        Ok(())
    }

    pub fn message_deleted(&self, conversation_id: i64, message_id: i64) {
        self.broker.broadcast(
            &conversation_group(conversation_id),
            EVENT_MESSAGE_DELETED,
            json!({ "message_id": message_id }),
        );
    }

    pub async fn friend_request_sent(&self, request: &FriendRequestRow) -> Result<(), CoreError> {
        let sender = grapevine_db::users::get_user_by_id(&self.db, request.sender_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let notification = grapevine_db::notifications::create(
            &self.db,
            request.receiver_id,
            "friend_request",
            &format!(
                "{} {} sent you a friend request",
                sender.first_name, sender.last_name
            ),
            Some(request.sender_id),
            None,
            Some(request.id),
        )
        .await?;
        self.push_notification(&notification).await
    }

    /// The responder's request notification goes read, and the original
    /// sender gets a fresh `friend_accepted` push.
    pub async fn friend_request_accepted(
        &self,
        request: &FriendRequestRow,
    ) -> Result<(), CoreError> {
        grapevine_db::notifications::mark_read_for_friend_request(
            &self.db,
            request.id,
            request.receiver_id,
        )
        .await?;

        let receiver = grapevine_db::users::get_user_by_id(&self.db, request.receiver_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let notification = grapevine_db::notifications::create(
            &self.db,
            request.sender_id,
            "friend_accepted",
            &format!(
                "{} {} accepted your friend request",
                receiver.first_name, receiver.last_name
            ),
            Some(request.receiver_id),
            None,
            None,
        )
        .await?;
        self.push_notification(&notification).await
    }

    /// Declined, cancelled or deleted requests leave stale unread
    /// notifications behind. Each recipient is told which notification id
    /// to drop, then the row is marked read.
    pub async fn friend_request_invalidated(&self, friend_request_id: i64) -> Result<(), CoreError> {
        let stale =
            grapevine_db::notifications::unread_for_friend_request(&self.db, friend_request_id)
                .await?;
        for notification in stale {
            self.broker.broadcast(
                &notification_group(notification.recipient_id),
                EVENT_FRIEND_REQUEST_INVALID,
                json!({
                    "notification_id": notification.id,
                    "message": FRIEND_REQUEST_INVALID_MESSAGE,
                }),
            );
            grapevine_db::notifications::mark_read(
                &self.db,
                notification.id,
                notification.recipient_id,
            )
            .await?;
        }
        Ok(())
    }

    /// A repeat like within the hour re-dates the earlier notification
    /// instead of stacking a new one, and suppresses the push.
    pub async fn post_liked(&self, post: &PostRow, actor_id: i64) -> Result<(), CoreError> {
        if post.author_id == actor_id {
            return Ok(());
        }

        let cutoff = Utc::now() - Duration::hours(1);
        let existing = grapevine_db::notifications::find_post_like_since(
            &self.db,
            post.author_id,
            actor_id,
            post.id,
            cutoff,
        )
        .await?;

        if let Some(existing) = existing {
            grapevine_db::notifications::refresh(&self.db, existing.id, Utc::now()).await?;
            return Ok(());
        }

        let actor = grapevine_db::users::get_user_by_id(&self.db, actor_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let notification = grapevine_db::notifications::create(
            &self.db,
            post.author_id,
            "post_like",
            &format!("{} {} liked your post", actor.first_name, actor.last_name),
            Some(actor_id),
            Some(post.id),
            None,
        )
        .await?;
        self.push_notification(&notification).await
    }

    pub async fn post_commented(&self, post: &PostRow, actor_id: i64) -> Result<(), CoreError> {
        if post.author_id == actor_id {
            return Ok(());
        }

        let actor = grapevine_db::users::get_user_by_id(&self.db, actor_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        let notification = grapevine_db::notifications::create(
            &self.db,
            post.author_id,
            "post_comment",
            &format!(
                "{} {} commented on your post",
                actor.first_name, actor.last_name
            ),
            Some(actor_id),
            Some(post.id),
            None,
        )
        .await?;
        self.push_notification(&notification).await
    }

    async fn push_notification(&self, notification: &NotificationRow) -> Result<(), CoreError> {
        let view = serialize::notification_view(&self.db, notification).await?;
        let delivered = self.broker.broadcast(
            &notification_group(notification.recipient_id),
            EVENT_NOTIFICATION,
            json!({ "notification": view }),
        );
        tracing::debug!(
            notification_id = notification.id,
            recipient_id = notification.recipient_id,
            delivered,
            "notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    async fn test_state() -> (DbPool, GroupBroker, EventDispatcher) {
        let pool = grapevine_db::create_pool("sqlite::memory:", 1).await.unwrap();
        grapevine_db::run_migrations(&pool).await.unwrap();
        let broker = GroupBroker::default();
        let dispatcher = EventDispatcher::new(pool.clone(), broker.clone());
        (pool, broker, dispatcher)
    }

    async fn make_user(pool: &DbPool, username: &str) -> i64 {
        grapevine_db::users::create_user(pool, username, "Test", "User", None)
            .await
            .unwrap()
            .id
    }

    async fn backdate_notification(pool: &DbPool, id: i64, hours: i64) {
        let when = Utc::now() - Duration::hours(hours);
        sqlx::query("UPDATE notifications SET created_at = $2 WHERE id = $1")
            .bind(id)
            .bind(when.format("%Y-%m-%d %H:%M:%S").to_string())
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn message_created_reaches_all_members_including_sender() {
        let (pool, broker, dispatcher) = test_state().await;
        let alice = make_user(&pool, "alice").await;
        let bob = make_user(&pool, "bob").await;
        let conversation = grapevine_db::conversations::create_conversation(&pool, alice, bob)
            .await
            .unwrap();

        let mut alice_rx = broker.join(&conversation_group(conversation.id));
        let mut bob_rx = broker.join(&conversation_group(conversation.id));

        let message =
            grapevine_db::messages::create_message(&pool, conversation.id, alice, "hi", None)
                .await
                .unwrap();
        dispatcher.message_created(&message).await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event_type, EVENT_MESSAGE);
            assert_eq!(event.payload["message"]["content"], "hi");
            assert_eq!(event.payload["message"]["sender"]["username"], "alice");
        }
    }

    #[tokio::test]
    async fn message_deleted_carries_only_the_id() {
        let (_pool, broker, dispatcher) = test_state().await;
        let mut rx = broker.join(&conversation_group(5));

        dispatcher.message_deleted(5, 99);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EVENT_MESSAGE_DELETED);
        assert_eq!(event.payload, json!({ "message_id": 99 }));
    }

    #[tokio::test]
    async fn friend_request_sent_records_and_pushes() {
        let (pool, broker, dispatcher) = test_state().await;
        let sender = make_user(&pool, "sender").await;
        let receiver = make_user(&pool, "receiver").await;
        let request = grapevine_db::friends::create_request(&pool, sender, receiver)
            .await
            .unwrap();

        let mut rx = broker.join(&notification_group(receiver));
        dispatcher.friend_request_sent(&request).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EVENT_NOTIFICATION);
        assert_eq!(event.payload["notification"]["type"], "friend_request");
        assert_eq!(
            event.payload["notification"]["friend_request"]["id"],
            request.id
        );

        let rows = grapevine_db::notifications::list_for_recipient(&pool, receiver, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].message.ends_with("sent you a friend request"));
    }

    #[tokio::test]
    async fn friend_request_sent_without_listener_still_records() {
        let (pool, _broker, dispatcher) = test_state().await;
        let sender = make_user(&pool, "sender").await;
        let receiver = make_user(&pool, "receiver").await;
        let request = grapevine_db::friends::create_request(&pool, sender, receiver)
            .await
            .unwrap();

        dispatcher.friend_request_sent(&request).await.unwrap();

        assert_eq!(
            grapevine_db::notifications::unread_count(&pool, receiver)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn accept_marks_receiver_notification_and_notifies_sender() {
        let (pool, broker, dispatcher) = test_state().await;
        let sender = make_user(&pool, "sender").await;
        let receiver = make_user(&pool, "receiver").await;
        let request = grapevine_db::friends::create_request(&pool, sender, receiver)
            .await
            .unwrap();
        dispatcher.friend_request_sent(&request).await.unwrap();

        let mut sender_rx = broker.join(&notification_group(sender));
        dispatcher.friend_request_accepted(&request).await.unwrap();

        let event = sender_rx.recv().await.unwrap();
        assert_eq!(event.payload["notification"]["type"], "friend_accepted");

        // Receiver's original request notification is now read.
        assert_eq!(
            grapevine_db::notifications::unread_count(&pool, receiver)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn invalidation_pushes_stale_id_then_marks_read() {
        let (pool, broker, dispatcher) = test_state().await;
        let sender = make_user(&pool, "sender").await;
        let receiver = make_user(&pool, "receiver").await;
        let request = grapevine_db::friends::create_request(&pool, sender, receiver)
            .await
            .unwrap();
        dispatcher.friend_request_sent(&request).await.unwrap();

        let stale_id = grapevine_db::notifications::list_for_recipient(&pool, receiver, 1)
            .await
            .unwrap()[0]
            .id;

        let mut rx = broker.join(&notification_group(receiver));
        dispatcher
            .friend_request_invalidated(request.id)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EVENT_FRIEND_REQUEST_INVALID);
        assert_eq!(event.payload["notification_id"], stale_id);
        assert_eq!(event.payload["message"], FRIEND_REQUEST_INVALID_MESSAGE);

        assert_eq!(
            grapevine_db::notifications::unread_count(&pool, receiver)
                .await
                .unwrap(),
            0
        );

        // A second pass finds nothing left to invalidate.
        dispatcher
            .friend_request_invalidated(request.id)
            .await
            .unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn repeat_like_within_window_refreshes_without_push() {
        let (pool, broker, dispatcher) = test_state().await;
        let author = make_user(&pool, "author").await;
        let fan = make_user(&pool, "fan").await;
        let post = grapevine_db::posts::create_post(&pool, author, "a post", None)
            .await
            .unwrap();

        let mut rx = broker.join(&notification_group(author));

        dispatcher.post_liked(&post, fan).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload["notification"]["type"], "post_like");

        dispatcher.post_liked(&post, fan).await.unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let rows = grapevine_db::notifications::list_for_recipient(&pool, author, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_read);

        backdate_notification(&pool, rows[0].id, 2).await;
        dispatcher.post_liked(&post, fan).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload["notification"]["type"], "post_like");
        assert_eq!(
            grapevine_db::notifications::list_for_recipient(&pool, author, 10)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn self_actions_are_silent() {
        let (pool, broker, dispatcher) = test_state().await;
        let author = make_user(&pool, "author").await;
        let post = grapevine_db::posts::create_post(&pool, author, "mine", None)
            .await
            .unwrap();

        let mut rx = broker.join(&notification_group(author));
        dispatcher.post_liked(&post, author).await.unwrap();
        dispatcher.post_commented(&post, author).await.unwrap();

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(
            grapevine_db::notifications::unread_count(&pool, author)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn comment_notifies_post_author() {
        let (pool, broker, dispatcher) = test_state().await;
        let author = make_user(&pool, "author").await;
        let commenter = make_user(&pool, "commenter").await;
        let post = grapevine_db::posts::create_post(&pool, author, "a post", None)
            .await
            .unwrap();

        let mut rx = broker.join(&notification_group(author));
        dispatcher.post_commented(&post, commenter).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["notification"]["type"], "post_comment");
        assert_eq!(event.payload["notification"]["post_id"], post.id);
        assert!(event.payload["notification"]["message"]
            .as_str()
            .unwrap()
            .ends_with("commented on your post"));
    }
}
