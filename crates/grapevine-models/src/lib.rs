pub mod conversation;
pub mod feed;
pub mod friend_request;
pub mod message;
pub mod notification;
pub mod user;
