//! Integration tests for the HTTP routes and the chat WebSocket.

mod common;

use axum::http::StatusCode;
use chatpilot_lib::api::{app, run_server, serve};
use chatpilot_lib::config::AppConfig;
use common::{eventually, make_state, BrowserLog, MockProvider};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// Serve `state` on an ephemeral port
async fn spawn_server(state: Arc<chatpilot_lib::state::AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = serve(listener, state).await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

/// Next JSON frame, failing the test after five seconds
async fn next_frame(client: &mut Client) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip progress frames
async fn next_reply(client: &mut Client) -> serde_json::Value {
    loop {
        let frame = next_frame(client).await;
        if frame["type"] == "reply" {
            return frame;
        }
        assert_eq!(frame["type"], "progress");
    }
}

async fn send_text(client: &mut Client, text: &str) {
    let body = serde_json::json!({ "text": text }).to_string();
    client.send(Message::Text(body)).await.unwrap();
}

// ---------------------------------------------------------------------------
// HTTP routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_health() {
    let state = make_state(AppConfig::default(), MockProvider::new(vec![]), BrowserLog::new());
    let (status, body) = get(app(state), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn test_api_status() {
    let state = make_state(AppConfig::default(), MockProvider::new(vec![]), BrowserLog::new());
    let (status, body) = get(app(state), "/api/status").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["active_sessions"], 0);
    assert_eq!(json["provider"], "mock");
    assert_eq!(json["model"], "mock-model");
    assert_eq!(json["headless"], true);
}

#[tokio::test]
async fn test_index_page() {
    let state = make_state(AppConfig::default(), MockProvider::new(vec![]), BrowserLog::new());
    let (status, body) = get(app(state), "/").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("<title>Chatpilot</title>"));
    assert!(html.contains("/ws"));
}

#[tokio::test]
async fn test_unknown_route() {
    let state = make_state(AppConfig::default(), MockProvider::new(vec![]), BrowserLog::new());
    let (status, _) = get(app(state), "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_server_port_in_use() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = AppConfig::default();
    config.server.port = taken.local_addr().unwrap().port();

    let state = make_state(config, MockProvider::new(vec![]), BrowserLog::new());
    let err = run_server(state).await.unwrap_err();
    assert!(err.to_string().contains("Failed to bind"), "{}", err);
}

// ---------------------------------------------------------------------------
// WebSocket sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ws_one_reply_per_message() {
    let provider = MockProvider::new(vec![
        r#"{"intent": "navigate", "task": "Open example.com", "status": "continue",
            "action": {"kind": "navigate", "url": "example.com"}}"#,
        r#"{"status": "complete"}"#,
        r#"{"intent": "other", "status": "complete", "reply": "You're welcome!"}"#,
    ]);
    let log = BrowserLog::new();
    let state = make_state(AppConfig::default(), provider, Arc::clone(&log));
    let addr = spawn_server(Arc::clone(&state)).await;
    let mut client = connect(addr).await;

    send_text(&mut client, "open example.com").await;
    let mut progress = 0;
    let reply = loop {
        let frame = next_frame(&mut client).await;
        if frame["type"] == "reply" {
            break frame;
        }
        progress += 1;
    };
    assert_eq!(reply["status"], "completed");
    assert_eq!(reply["text"], "Navigation completed successfully!");
    assert_eq!(reply["image"], common::PIXEL_PNG);
    assert_eq!(reply["url"], "https://example.com");
    assert_eq!(progress, 2);

    send_text(&mut client, "thanks").await;
    let reply = next_reply(&mut client).await;
    assert_eq!(reply["text"], "You're welcome!");

    assert_eq!(state.sessions.active_count(), 1);
    assert_eq!(log.launches.load(Ordering::SeqCst), 1);

    client.close(None).await.unwrap();
    assert!(eventually(|| log.closes() == 1).await);
    assert!(eventually(|| state.sessions.active_count() == 0).await);
}

#[tokio::test]
async fn test_ws_malformed_and_empty_messages() {
    let provider = MockProvider::new(vec![]);
    let log = BrowserLog::new();
    let state = make_state(AppConfig::default(), provider.clone(), Arc::clone(&log));
    let addr = spawn_server(state).await;
    let mut client = connect(addr).await;

    client
        .send(Message::Text("this is not json".to_string()))
        .await
        .unwrap();
    let reply = next_frame(&mut client).await;
    assert_eq!(reply["type"], "reply");
    assert_eq!(reply["status"], "error");

    send_text(&mut client, "   ").await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply["type"], "reply");
    assert_eq!(reply["status"], "clarify");

    // Neither frame reached the reasoning service
    assert_eq!(provider.request_count(), 0);

    client.close(None).await.unwrap();
    assert!(eventually(|| log.closes() == 1).await);
}

#[tokio::test]
async fn test_ws_reasoning_failure_keeps_session_open() {
    let log = BrowserLog::new();
    let state = make_state(AppConfig::default(), MockProvider::failing(), Arc::clone(&log));
    let addr = spawn_server(state).await;
    let mut client = connect(addr).await;

    send_text(&mut client, "search for rust").await;
    let reply = next_reply(&mut client).await;
    assert_eq!(reply["status"], "clarify");
    assert!(reply.get("image").is_none());

    // Script is exhausted now; still answered on the same connection
    send_text(&mut client, "hello?").await;
    let reply = next_reply(&mut client).await;
    assert_eq!(reply["status"], "clarify");
    assert!(log.actions().is_empty());

    client.close(None).await.unwrap();
    assert!(eventually(|| log.closes() == 1).await);
}

#[tokio::test]
async fn test_ws_disconnect_mid_turn_closes_browser_once() {
    let provider = MockProvider::new(vec![
        r#"{"intent": "navigate", "status": "continue", "action": {"kind": "navigate", "url": "https://slow.example"}}"#,
        r#"{"status": "complete"}"#,
    ]);
    let log = BrowserLog::new();
    *log.delay.lock() = Duration::from_millis(300);
    let state = make_state(AppConfig::default(), provider, Arc::clone(&log));
    let addr = spawn_server(Arc::clone(&state)).await;
    let mut client = connect(addr).await;

    send_text(&mut client, "open slow.example").await;
    send_text(&mut client, "and then something else").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close(None).await.unwrap();
    drop(client);

    // The in-flight action still completes; the queued message is skipped
    assert!(eventually(|| log.closes() == 1).await);
    assert_eq!(log.actions(), vec!["navigate:https://slow.example".to_string()]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.closes(), 1);
    assert_eq!(state.sessions.active_count(), 0);
}

#[tokio::test]
async fn test_ws_launch_failure_sends_error() {
    let log = BrowserLog::new();
    log.fail_launch.store(true, Ordering::SeqCst);
    let state = make_state(AppConfig::default(), MockProvider::new(vec![]), Arc::clone(&log));
    let addr = spawn_server(Arc::clone(&state)).await;
    let mut client = connect(addr).await;

    let reply = next_frame(&mut client).await;
    assert_eq!(reply["type"], "reply");
    assert_eq!(reply["status"], "error");
    assert!(reply["text"].as_str().unwrap().contains("Chrome not found"));
    assert_eq!(state.sessions.active_count(), 0);
    assert_eq!(log.closes(), 0);
}

#[tokio::test]
async fn test_ws_cookie_export_on_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.browser.cookie_export_dir = Some(dir.path().to_path_buf());

    let log = BrowserLog::new();
    let state = make_state(config, MockProvider::new(vec![]), Arc::clone(&log));
    let addr = spawn_server(state).await;
    let client = connect(addr).await;

    // Let the session register before hanging up
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(client);

    assert!(eventually(|| log.closes() == 1).await);
    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(files.len(), 1);
    let cookies: serde_json::Value =
        serde_json::from_slice(&std::fs::read(files[0].path()).unwrap()).unwrap();
    assert_eq!(cookies[0]["name"], "sid");
}

#[tokio::test]
async fn test_ws_disconnect_stops_remaining_steps() {
    let provider = MockProvider::new(vec![
        r#"{"intent": "navigate", "status": "continue", "action": {"kind": "navigate", "url": "https://a.example"}}"#,
        r#"{"status": "continue", "action": {"kind": "navigate", "url": "https://b.example"}}"#,
        r#"{"status": "continue", "action": {"kind": "navigate", "url": "https://c.example"}}"#,
        r#"{"status": "continue", "action": {"kind": "navigate", "url": "https://d.example"}}"#,
        r#"{"status": "complete"}"#,
    ]);
    let log = BrowserLog::new();
    *log.delay.lock() = Duration::from_millis(300);
    let state = make_state(AppConfig::default(), provider.clone(), Arc::clone(&log));
    let addr = spawn_server(Arc::clone(&state)).await;
    let mut client = connect(addr).await;

    send_text(&mut client, "visit four sites").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close(None).await.unwrap();
    drop(client);

    assert!(eventually(|| log.closes() == 1).await);
    assert_eq!(log.actions(), vec!["navigate:https://a.example".to_string()]);
    assert_eq!(provider.request_count(), 1);
    assert!(eventually(|| state.sessions.active_count() == 0).await);
}

#[tokio::test]
async fn test_ws_session_limit() {
    let mut config = AppConfig::default();
    config.server.max_connections = 1;
    let log = BrowserLog::new();
    let state = make_state(config, MockProvider::new(vec![]), Arc::clone(&log));
    let addr = spawn_server(Arc::clone(&state)).await;

    let first = connect(addr).await;
    assert!(eventually(|| state.sessions.active_count() == 1).await);

    let mut second = connect(addr).await;
    let reply = next_frame(&mut second).await;
    assert_eq!(reply["type"], "reply");
    assert_eq!(reply["status"], "error");
    assert!(reply["text"].as_str().unwrap().contains("in use"));
    assert_eq!(log.launches.load(Ordering::SeqCst), 1);
    assert_eq!(state.sessions.active_count(), 1);

    // The slot frees up once the first session ends
    drop(first);
    assert!(eventually(|| log.closes() == 1).await);
    assert!(eventually(|| state.sessions.active_count() == 0).await);

    let _third = connect(addr).await;
    assert!(eventually(|| log.launches.load(Ordering::SeqCst) == 2).await);
    assert!(eventually(|| state.sessions.active_count() == 1).await);
}
