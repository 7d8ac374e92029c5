use crate::error::CoreError;
use grapevine_db::conversations::ConversationRow;
use grapevine_db::friends::FriendRequestRow;
use grapevine_db::messages::MessageRow;
use grapevine_db::notifications::NotificationRow;
use grapevine_db::users::UserRow;
use grapevine_db::DbPool;
use grapevine_models::conversation::ConversationView;
use grapevine_models::friend_request::{FriendRequestStatus, FriendRequestView};
use grapevine_models::message::{MessageView, ReadReceipt};
use grapevine_models::notification::{NotificationKind, NotificationView};
use grapevine_models::user::UserSummary;

pub fn user_summary(user: &UserRow) -> UserSummary {
    UserSummary {
        id: user.id,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        picture_path: user.picture_path.clone(),
    }
}

/// Hydrates a message row with its sender and read receipts. The same view
/// is used on the REST and socket paths.
pub async fn message_view(pool: &DbPool, message: &MessageRow) -> Result<MessageView, CoreError> {
    let sender = grapevine_db::users::get_user_by_id(pool, message.sender_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let receipts = grapevine_db::read_statuses::read_by(pool, message.id).await?;

    Ok(MessageView {
        id: message.id,
        conversation_id: message.conversation_id,
        sender: user_summary(&sender),
        content: message.content.clone(),
        image: message.image_path.clone(),
        is_edited: message.is_edited,
        is_deleted: message.is_deleted,
        created_at: message.created_at,
        updated_at: message.updated_at,
        read_by: receipts
            .into_iter()
            .map(|receipt| ReadReceipt {
                user_id: receipt.user_id,
                username: receipt.username,
                read_at: receipt.read_at,
            })
            .collect(),
    })
}

pub async fn friend_request_view(
    pool: &DbPool,
    request: &FriendRequestRow,
) -> Result<FriendRequestView, CoreError> {
    let sender = grapevine_db::users::get_user_by_id(pool, request.sender_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let receiver = grapevine_db::users::get_user_by_id(pool, request.receiver_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let status = FriendRequestStatus::parse(&request.status).ok_or_else(|| {
        CoreError::Internal(format!("unknown friend request status '{}'", request.status))
    })?;

    Ok(FriendRequestView {
        id: request.id,
        sender: user_summary(&sender),
        receiver: user_summary(&receiver),
        status,
        created_at: request.created_at,
        updated_at: request.updated_at,
    })
}

pub async fn notification_view(
    pool: &DbPool,
    notification: &NotificationRow,
) -> Result<NotificationView, CoreError> {
    let kind = NotificationKind::parse(&notification.kind).ok_or_else(|| {
        CoreError::Internal(format!("unknown notification kind '{}'", notification.kind))
    })?;

    let from_user = match notification.from_user_id {
        Some(user_id) => grapevine_db::users::get_user_by_id(pool, user_id)
            .await?
            .map(|user| user_summary(&user)),
        None => None,
    };

    // A request deleted after the notification was written leaves the
    // reference dangling; render it as absent.
    let friend_request = match notification.friend_request_id {
        Some(request_id) => match grapevine_db::friends::get_request(pool, request_id).await? {
            Some(request) => Some(friend_request_view(pool, &request).await?),
            None => None,
        },
        None => None,
    };

    Ok(NotificationView {
        id: notification.id,
        kind,
        message: notification.message.clone(),
        is_read: notification.is_read,
        created_at: notification.created_at,
        from_user,
        post_id: notification.post_id,
        friend_request,
    })
}

pub async fn conversation_view(
    pool: &DbPool,
    conversation: &ConversationRow,
    viewer_id: i64,
) -> Result<ConversationView, CoreError> {
    let participant_rows = grapevine_db::conversations::participants(pool, conversation.id).await?;
    let other_participant = participant_rows
        .iter()
        .find(|user| user.id != viewer_id)
        .map(user_summary);
    let participants = participant_rows.iter().map(user_summary).collect();

    let last_message = match grapevine_db::messages::last_message(pool, conversation.id).await? {
        Some(message) => Some(message_view(pool, &message).await?),
        None => None,
    };
    let unread_count =
        grapevine_db::read_statuses::unread_count(pool, conversation.id, viewer_id).await?;

    Ok(ConversationView {
        id: conversation.id,
        participants,
        other_participant,
        last_message,
        unread_count,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    })
}
