use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::{from_fn, Next},
    response::IntoResponse,
    response::Response,
    routing::{delete, get, patch, post},
    Json, Router,
};
use grapevine_core::AppState;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

pub mod error;
pub mod middleware;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    let cors = build_cors_layer();
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/metrics", get(metrics))
        // Conversations
        .route(
            "/api/v1/conversations",
            get(routes::conversations::list_conversations)
                .post(routes::conversations::create_conversation),
        )
        .route(
            "/api/v1/conversations/{conversation_id}/read",
            post(routes::conversations::mark_conversation_read),
        )
        .route(
            "/api/v1/conversations/{conversation_id}/messages",
            get(routes::messages::list_messages).post(routes::messages::send_message),
        )
        .route(
            "/api/v1/conversations/{conversation_id}/messages/{message_id}",
            patch(routes::messages::edit_message).delete(routes::messages::delete_message),
        )
        // Notifications
        .route(
            "/api/v1/notifications",
            get(routes::notifications::list_notifications)
                .delete(routes::notifications::clear_notifications),
        )
        .route(
            "/api/v1/notifications/{notification_id}/read",
            post(routes::notifications::mark_notification_read),
        )
        // Friends
        .route("/api/v1/friends", get(routes::friends::list_friends))
        .route(
            "/api/v1/friends/{user_id}",
            delete(routes::friends::remove_friend),
        )
        .route(
            "/api/v1/friends/requests",
            get(routes::friends::list_friend_requests).post(routes::friends::send_friend_request),
        )
        .route(
            "/api/v1/friends/requests/{request_id}",
            delete(routes::friends::cancel_friend_request),
        )
        .route(
            "/api/v1/friends/requests/{request_id}/respond",
            post(routes::friends::respond_friend_request),
        )
        .route(
            "/api/v1/friends/status/{user_id}",
            get(routes::friends::friendship_status),
        )
        // Posts
        .route("/api/v1/posts/{post_id}/like", post(routes::posts::toggle_like))
        .route(
            "/api/v1/posts/{post_id}/comments",
            post(routes::posts::create_comment),
        )
        // Middleware layers
        .layer(cors)
        .layer(from_fn(rate_limit_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    // The browser front-end is served from a different origin in every
    // deployment we know of, so the API stays origin-agnostic and relies on
    // bearer tokens instead of cookies.
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "grapevine" })),
    )
}

async fn metrics() -> impl IntoResponse {
    let requests = REQUEST_COUNT.load(Ordering::Relaxed);
    let limited = RATE_LIMITED_COUNT.load(Ordering::Relaxed);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        format!(
            "grapevine_up 1\ngrapevine_http_requests_total {}\ngrapevine_http_rate_limited_total {}\n",
            requests, limited
        ),
    )
}

static RATE_LIMIT_STATE: OnceLock<Mutex<HashMap<String, (i64, u32)>>> = OnceLock::new();
static REQUEST_COUNT: AtomicU64 = AtomicU64::new(0);
static RATE_LIMITED_COUNT: AtomicU64 = AtomicU64::new(0);

fn rate_limit_state() -> &'static Mutex<HashMap<String, (i64, u32)>> {
    RATE_LIMIT_STATE.get_or_init(|| Mutex::new(HashMap::new()))
}

async fn rate_limit_middleware(req: Request, next: Next) -> Response {
    REQUEST_COUNT.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now().timestamp();
    let key = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("local")
        .to_string();

    let allowed = {
        let mut map = match rate_limit_state().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = map.entry(key).or_insert((now, 0));
        if entry.0 != now {
            *entry = (now, 0);
        }
        if entry.1 >= 300 {
            false
        } else {
            entry.1 += 1;
            true
        }
    };

    if !allowed {
        RATE_LIMITED_COUNT.fetch_add(1, Ordering::Relaxed);
        return crate::error::ApiError::RateLimited.into_response();
    }

    next.run(req).await
}
