pub mod conversations;
pub mod friends;
pub mod messages;
pub mod notifications;
pub mod posts;
