//! Socket-session integration tests: a real server on an ephemeral port,
//! driven by tokio-tungstenite clients.

use futures_util::{SinkExt, StreamExt};
use grapevine_core::broker::GroupBroker;
use grapevine_core::dispatch::EventDispatcher;
use grapevine_core::{AppConfig, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

const JWT_SECRET: &str = "feed-session-test-secret-0123456789abcdef";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the feed router on an ephemeral port and return the state handle
/// plus the ws base URL.
async fn start_server() -> (AppState, String) {
    let db = grapevine_db::create_pool("sqlite::memory:", 1)
        .await
        .expect("create pool");
    grapevine_db::run_migrations(&db).await.expect("migrations");

    let broker = GroupBroker::default();
    let dispatcher = EventDispatcher::new(db.clone(), broker.clone());
    let state = AppState {
        db,
        broker,
        dispatcher,
        config: AppConfig {
            jwt_secret: JWT_SECRET.into(),
            jwt_expiry_seconds: 3600,
        },
        shutdown: Arc::new(tokio::sync::Notify::new()),
    };

    let app = grapevine_ws::feed_router().with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("serve");
    });

    (state, format!("ws://{addr}"))
}

fn token_for(user_id: i64) -> String {
    grapevine_core::auth::create_token(user_id, JWT_SECRET, 3600).expect("create token")
}

async fn seed_user(state: &AppState, username: &str) -> i64 {
    grapevine_db::users::create_user(&state.db, username, "Test", "User", None)
        .await
        .expect("create user")
        .id
}

/// Two users, already friends, sharing one conversation.
async fn seed_conversation(state: &AppState) -> (i64, i64, i64) {
    let a = seed_user(state, "alice").await;
    let b = seed_user(state, "bob").await;
    grapevine_db::friends::add_friendship(&state.db, a, b)
        .await
        .expect("friendship");
    let conversation = grapevine_db::conversations::create_conversation(&state.db, a, b)
        .await
        .expect("conversation");
    (a, b, conversation.id)
}

async fn connect(url: String) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    stream
}

/// Next text frame as parsed JSON, failing loudly on anything else.
async fn next_json(stream: &mut WsStream) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("frame is json"),
        other => panic!("expected text frame, got: {other:?}"),
    }
}

/// Next close frame, skipping nothing; panics on a non-close frame.
async fn expect_close(stream: &mut WsStream, code: CloseCode, reason: &str) {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, code);
            assert_eq!(frame.reason.as_str(), reason);
        }
        other => panic!("expected close frame, got: {other:?}"),
    }
}

async fn assert_silent(stream: &mut WsStream, wait: Duration) {
    let result = tokio::time::timeout(wait, stream.next()).await;
    assert!(result.is_err(), "expected no frame, got: {result:?}");
}

#[tokio::test]
async fn conversation_feed_rejects_missing_token() {
    let (state, base) = start_server().await;
    let (_, _, conversation_id) = seed_conversation(&state).await;

    let mut stream = connect(format!("{base}/ws/conversations/{conversation_id}")).await;
    expect_close(&mut stream, CloseCode::Policy, "Missing token").await;
}

#[tokio::test]
async fn conversation_feed_rejects_garbage_token() {
    let (state, base) = start_server().await;
    let (_, _, conversation_id) = seed_conversation(&state).await;

    let mut stream = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token=not.a.jwt"
    ))
    .await;
    expect_close(&mut stream, CloseCode::Policy, "Invalid or expired token").await;
}

#[tokio::test]
async fn conversation_feed_rejects_non_participant() {
    let (state, base) = start_server().await;
    let (_, _, conversation_id) = seed_conversation(&state).await;
    let outsider = seed_user(&state, "mallory").await;

    let mut stream = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(outsider)
    ))
    .await;
    expect_close(&mut stream, CloseCode::Policy, "Not a conversation participant").await;
}

#[tokio::test]
async fn unknown_conversation_is_rejected_at_the_gate() {
    let (state, base) = start_server().await;
    let (a, _, _) = seed_conversation(&state).await;

    let mut stream =
        connect(format!("{base}/ws/conversations/999999?token={}", token_for(a))).await;
    expect_close(&mut stream, CloseCode::Policy, "Unknown conversation").await;
}

#[tokio::test]
async fn notification_feed_rejects_token_for_another_user() {
    let (state, base) = start_server().await;
    let a = seed_user(&state, "alice").await;
    let b = seed_user(&state, "bob").await;

    let mut stream = connect(format!(
        "{base}/ws/notifications/{b}?token={}",
        token_for(a)
    ))
    .await;
    expect_close(&mut stream, CloseCode::Policy, "Token does not match requested feed").await;
}

#[tokio::test]
async fn conversation_feed_announces_itself() {
    let (state, base) = start_server().await;
    let (a, _, conversation_id) = seed_conversation(&state).await;

    let mut stream = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(a)
    ))
    .await;

    let hello = next_json(&mut stream).await;
    assert_eq!(hello["type"], "connection_established");
    assert_eq!(hello["conversation_id"], conversation_id);
    assert_eq!(hello["user_id"], a);
}

#[tokio::test]
async fn message_reaches_both_participants_including_sender() {
    let (state, base) = start_server().await;
    let (a, b, conversation_id) = seed_conversation(&state).await;

    let mut alice = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(a)
    ))
    .await;
    let mut bob = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(b)
    ))
    .await;
    next_json(&mut alice).await;
    next_json(&mut bob).await;

    let frame = json!({
        "type": "message",
        "message": { "content": "hello from alice" }
    });
    alice
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send message frame");

    // Both sessions see the same broadcast; the author's own copy is the echo.
    for stream in [&mut bob, &mut alice] {
        let event = next_json(stream).await;
        assert_eq!(event["type"], "message");
        assert_eq!(event["message"]["content"], "hello from alice");
        assert_eq!(event["message"]["sender"]["id"], a);
        assert_eq!(event["message"]["is_edited"], false);
        assert_eq!(event["message"]["is_deleted"], false);
    }

    // The write is durable, not just broadcast.
    let rows = grapevine_db::messages::list_for_conversation(&state.db, conversation_id, None, 10)
        .await
        .expect("list messages");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "hello from alice");
}

#[tokio::test]
async fn sequential_messages_arrive_in_order_for_every_participant() {
    let (state, base) = start_server().await;
    let (a, b, conversation_id) = seed_conversation(&state).await;

    let mut alice = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(a)
    ))
    .await;
    let mut bob = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(b)
    ))
    .await;
    next_json(&mut alice).await;
    next_json(&mut bob).await;

    let sent: Vec<String> = (1..=5).map(|n| format!("note {n}")).collect();
    for content in &sent {
        let frame = json!({ "type": "message", "message": { "content": content } });
        alice
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("send message frame");
    }

    // Exactly one broadcast per send, and both participants observe the
    // sends in the same relative order.
    for stream in [&mut alice, &mut bob] {
        let mut observed = Vec::new();
        for _ in 0..sent.len() {
            let event = next_json(stream).await;
            assert_eq!(event["type"], "message");
            observed.push(
                event["message"]["content"]
                    .as_str()
                    .expect("message content")
                    .to_string(),
            );
        }
        assert_eq!(observed, sent);
        assert_silent(stream, Duration::from_millis(200)).await;
    }

    let rows = grapevine_db::messages::list_for_conversation(&state.db, conversation_id, None, 10)
        .await
        .expect("list messages");
    assert_eq!(rows.len(), sent.len());
}

#[tokio::test]
async fn empty_message_is_discarded_without_echo() {
    let (state, base) = start_server().await;
    let (a, _, conversation_id) = seed_conversation(&state).await;

    let mut alice = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(a)
    ))
    .await;
    next_json(&mut alice).await;

    let frame = json!({ "type": "message", "message": { "content": "   " } });
    alice
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");

    assert_silent(&mut alice, Duration::from_millis(300)).await;
    let rows = grapevine_db::messages::list_for_conversation(&state.db, conversation_id, None, 10)
        .await
        .expect("list messages");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn typing_indicator_skips_its_author() {
    let (state, base) = start_server().await;
    let (a, b, conversation_id) = seed_conversation(&state).await;

    let mut alice = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(a)
    ))
    .await;
    let mut bob = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(b)
    ))
    .await;
    next_json(&mut alice).await;
    next_json(&mut bob).await;

    let frame = json!({ "type": "typing", "is_typing": true });
    alice
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send typing frame");

    let event = next_json(&mut bob).await;
    assert_eq!(event["type"], "typing");
    assert_eq!(event["user_id"], a);
    assert_eq!(event["username"], "alice");
    assert_eq!(event["is_typing"], true);

    assert_silent(&mut alice, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn notification_feed_flushes_unread_backlog_newest_first() {
    let (state, base) = start_server().await;
    let recipient = seed_user(&state, "alice").await;
    let actor = seed_user(&state, "bob").await;

    let old = grapevine_db::notifications::create(
        &state.db,
        recipient,
        "post_like",
        "bob liked your post",
        Some(actor),
        None,
        None,
    )
    .await
    .expect("create notification");
    // Distinct timestamps so the ordering assertion is meaningful.
    sqlx::query("UPDATE notifications SET created_at = '2024-01-01 00:00:00' WHERE id = $1")
        .bind(old.id)
        .execute(&state.db)
        .await
        .expect("backdate");
    let recent = grapevine_db::notifications::create(
        &state.db,
        recipient,
        "post_comment",
        "bob commented on your post",
        Some(actor),
        None,
        None,
    )
    .await
    .expect("create notification");

    let mut stream = connect(format!(
        "{base}/ws/notifications/{recipient}?token={}",
        token_for(recipient)
    ))
    .await;

    let flush = next_json(&mut stream).await;
    assert_eq!(flush["type"], "unread_notifications");
    let ids: Vec<i64> = flush["notifications"]
        .as_array()
        .expect("notifications array")
        .iter()
        .map(|n| n["id"].as_i64().expect("notification id"))
        .collect();
    assert_eq!(ids, vec![recent.id, old.id]);
}

#[tokio::test]
async fn mark_as_read_frame_updates_the_row() {
    let (state, base) = start_server().await;
    let recipient = seed_user(&state, "alice").await;
    let actor = seed_user(&state, "bob").await;
    let notification = grapevine_db::notifications::create(
        &state.db,
        recipient,
        "post_like",
        "bob liked your post",
        Some(actor),
        None,
        None,
    )
    .await
    .expect("create notification");

    let mut stream = connect(format!(
        "{base}/ws/notifications/{recipient}?token={}",
        token_for(recipient)
    ))
    .await;
    next_json(&mut stream).await;

    let frame = json!({ "type": "mark_as_read", "notification_id": notification.id });
    stream
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("send mark_as_read");

    // The write happens on the session task; poll until it lands.
    let mut is_read = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        is_read = grapevine_db::notifications::get(&state.db, notification.id)
            .await
            .expect("get notification")
            .expect("notification row")
            .is_read;
        if is_read {
            break;
        }
    }
    assert!(is_read, "notification never became read");
}

#[tokio::test]
async fn dispatched_friend_request_lands_on_the_notification_feed() {
    let (state, base) = start_server().await;
    let sender = seed_user(&state, "alice").await;
    let receiver = seed_user(&state, "bob").await;

    let mut stream = connect(format!(
        "{base}/ws/notifications/{receiver}?token={}",
        token_for(receiver)
    ))
    .await;
    let flush = next_json(&mut stream).await;
    assert_eq!(flush["type"], "unread_notifications");
    assert_eq!(flush["notifications"].as_array().map(Vec::len), Some(0));

    let request = grapevine_db::friends::create_request(&state.db, sender, receiver)
        .await
        .expect("create request");
    state
        .dispatcher
        .friend_request_sent(&request)
        .await
        .expect("dispatch");

    let event = next_json(&mut stream).await;
    assert_eq!(event["type"], "notification");
    assert_eq!(event["notification"]["type"], "friend_request");
    assert_eq!(event["notification"]["from_user"]["id"], sender);
    assert_eq!(
        event["notification"]["friend_request"]["id"],
        request.id
    );
}

#[tokio::test]
async fn invalidation_retires_the_stale_notification_live() {
    let (state, base) = start_server().await;
    let sender = seed_user(&state, "alice").await;
    let receiver = seed_user(&state, "bob").await;

    let request = grapevine_db::friends::create_request(&state.db, sender, receiver)
        .await
        .expect("create request");
    state
        .dispatcher
        .friend_request_sent(&request)
        .await
        .expect("dispatch");

    let mut stream = connect(format!(
        "{base}/ws/notifications/{receiver}?token={}",
        token_for(receiver)
    ))
    .await;
    let flush = next_json(&mut stream).await;
    let flushed_id = flush["notifications"][0]["id"].as_i64().expect("id");

    state
        .dispatcher
        .friend_request_invalidated(request.id)
        .await
        .expect("invalidate");

    let event = next_json(&mut stream).await;
    assert_eq!(event["type"], "friend_request_invalid");
    assert_eq!(event["notification_id"], flushed_id);
    assert_eq!(event["message"], "Friend request is no longer available");

    // The stale row is also marked read so reconnects never replay it.
    let row = grapevine_db::notifications::get(&state.db, flushed_id)
        .await
        .expect("get")
        .expect("row");
    assert!(row.is_read);
}

#[tokio::test]
async fn disconnect_reaps_the_group() {
    let (state, base) = start_server().await;
    let (a, _, conversation_id) = seed_conversation(&state).await;

    let mut stream = connect(format!(
        "{base}/ws/conversations/{conversation_id}?token={}",
        token_for(a)
    ))
    .await;
    next_json(&mut stream).await;
    assert_eq!(state.broker.group_count(), 1);

    stream
        .send(Message::Close(None))
        .await
        .expect("send close");
    drop(stream);

    let mut reaped = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if state.broker.group_count() == 0 {
            reaped = true;
            break;
        }
    }
    assert!(reaped, "group survived the last disconnect");
}
