pub mod auth;
pub mod broker;
pub mod dispatch;
pub mod error;
pub mod serialize;

use grapevine_db::DbPool;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub broker: broker::GroupBroker,
    pub dispatcher: dispatch::EventDispatcher,
    pub config: AppConfig,
    pub shutdown: Arc<Notify>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
}
