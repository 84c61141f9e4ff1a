//! WebSocket fan-out and agent-invocation round trips, driven against a
//! spawned hub plus an in-process mock session server.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{McpClient, TestServer};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect_ws(server: &TestServer) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
        .await
        .expect("ws connect");
    stream
}

async fn next_event(stream: &mut WsStream, timeout: Duration) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(timeout, stream.next()).await.ok()??;
        match frame.ok()? {
            WsMessage::Text(text) => return serde_json::from_str(&text).ok(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            _ => return None,
        }
    }
}

async fn send_frame(stream: &mut WsStream, frame: Value) {
    stream
        .send(WsMessage::Text(frame.to_string().into()))
        .await
        .expect("ws send");
}

// ---------------------------------------------------------------------------
// Mock OpenCode-style session server
// ---------------------------------------------------------------------------

struct MockSdk {
    sessions: Mutex<Vec<(String, String)>>, // (id, directory)
    prompts: Mutex<Vec<String>>,
    reply: String,
    counter: AtomicU64,
}

impl MockSdk {
    fn new(reply: &str, initial: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(
                initial
                    .iter()
                    .map(|(id, dir)| (id.to_string(), dir.to_string()))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
            reply: reply.to_string(),
            counter: AtomicU64::new(0),
        })
    }

    fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

async fn mock_list(State(sdk): State<Arc<MockSdk>>) -> Json<Value> {
    let sessions: Vec<Value> = sdk
        .sessions
        .lock()
        .unwrap()
        .iter()
        .map(|(id, dir)| json!({ "id": id, "directory": dir }))
        .collect();
    Json(json!(sessions))
}

async fn mock_create(State(sdk): State<Arc<MockSdk>>) -> Json<Value> {
    let id = format!("inv-{}", sdk.counter.fetch_add(1, Ordering::Relaxed));
    sdk.sessions.lock().unwrap().push((id.clone(), "/".to_string()));
    Json(json!({ "id": id }))
}

async fn mock_prompt(
    State(sdk): State<Arc<MockSdk>>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let text = body["parts"][0]["text"].as_str().unwrap_or_default().to_string();
    sdk.prompts.lock().unwrap().push(text);
    Json(json!({
        "parts": [
            { "type": "step-start" },
            { "type": "text", "text": sdk.reply },
            { "type": "text", "text": "scratch", "ignored": true }
        ]
    }))
}

async fn spawn_mock_sdk(sdk: Arc<MockSdk>) -> String {
    let app = Router::new()
        .route("/session", get(mock_list).post(mock_create))
        .route("/session/{id}/message", post(mock_prompt))
        .with_state(sdk);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

async fn register_agent(server: &TestServer, sdk_url: &str, project_path: &str) -> String {
    let mut mcp = McpClient::new(&server.base_url);
    mcp.initialize().await;
    let result = mcp
        .call_tool(
            "register",
            json!({
                "session_id": "S",
                "project_path": project_path,
                "server_url": sdk_url,
            }),
        )
        .await;
    assert!(result.get("error").is_none(), "register failed: {result}");
    result["agent_name"].as_str().unwrap().to_string()
}

async fn poll_for_message(
    client: &reqwest::Client,
    server: &TestServer,
    channel_id: &str,
    sender_name: &str,
    content: &str,
) -> Value {
    for _ in 0..100 {
        let messages: Vec<Value> = client
            .get(format!(
                "{}/api/channels/{}/messages",
                server.base_url, channel_id
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(found) = messages
            .iter()
            .find(|m| m["sender_name"] == sender_name && m["content"] == content)
        {
            return found.clone();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("no message '{content}' from {sender_name} within 10s");
}

// ---------------------------------------------------------------------------
// WebSocket substrate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::start().await;
    let mut ws = connect_ws(&server).await;

    send_frame(&mut ws, json!({ "type": "ping" })).await;
    let event = next_event(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(event["type"], "pong");
}

#[tokio::test]
async fn test_empty_subscription_receives_everything() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let mut ws = connect_ws(&server).await;

    server
        .post_message(&client, general["id"].as_str().unwrap(), "broadcast me", None)
        .await;

    let event = next_event(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["data"]["content"], "broadcast me");
}

#[tokio::test]
async fn test_subscription_filters_channels() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let random = server.find_channel(&client, "#random").await;
    let random_id = random["id"].as_str().unwrap();

    let mut subscribed = connect_ws(&server).await;
    send_frame(&mut subscribed, json!({ "type": "subscribe", "channel_ids": [random_id] })).await;
    let ack = next_event(&mut subscribed, Duration::from_secs(2)).await.unwrap();
    assert_eq!(ack["type"], "subscribed");

    let mut unfiltered = connect_ws(&server).await;

    // A #general message reaches the unfiltered client only.
    server
        .post_message(&client, general["id"].as_str().unwrap(), "general noise", None)
        .await;
    let event = next_event(&mut unfiltered, Duration::from_secs(2)).await.unwrap();
    assert_eq!(event["data"]["content"], "general noise");
    assert!(
        next_event(&mut subscribed, Duration::from_millis(800)).await.is_none(),
        "subscribed client must not see unsubscribed channels"
    );

    // A #random message reaches both.
    server.post_message(&client, random_id, "random hit", None).await;
    let event = next_event(&mut subscribed, Duration::from_secs(2)).await.unwrap();
    assert_eq!(event["data"]["content"], "random hit");
}

#[tokio::test]
async fn test_rate_limit_sliding_window() {
    let server = TestServer::start().await;
    let mut ws = connect_ws(&server).await;

    // 30 frames pass, the 31st is dropped with an error event.
    for _ in 0..31 {
        send_frame(&mut ws, json!({ "type": "ping" })).await;
    }
    let mut pongs = 0;
    let mut errors = 0;
    for _ in 0..31 {
        let event = next_event(&mut ws, Duration::from_secs(2)).await.unwrap();
        match event["type"].as_str().unwrap() {
            "pong" => pongs += 1,
            "error" => errors += 1,
            other => panic!("unexpected event {other}"),
        }
    }
    assert_eq!(pongs, 30);
    assert_eq!(errors, 1);

    // After the window passes, frames are accepted again.
    tokio::time::sleep(Duration::from_secs(10)).await;
    send_frame(&mut ws, json!({ "type": "ping" })).await;
    let event = next_event(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(event["type"], "pong");
}

// ---------------------------------------------------------------------------
// Invocation round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dm_round_trip() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let sdk = MockSdk::new("LIVE_TEST_OK", &[("S", "/tmp/live")]);
    let sdk_url = spawn_mock_sdk(sdk.clone()).await;
    let agent_name = register_agent(&server, &sdk_url, "/tmp/live").await;

    let mut ws = connect_ws(&server).await;

    let dm: Value = client
        .post(format!("{}/api/agents/{}/dm", server.base_url, agent_name))
        .json(&json!({ "content": "Reply with exactly: LIVE_TEST_OK" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let channel_id = dm["channel"]["id"].as_str().unwrap();

    let reply =
        poll_for_message(&client, &server, channel_id, &agent_name, "LIVE_TEST_OK").await;
    assert_eq!(reply["content"], "LIVE_TEST_OK");

    // Typing events bracket the dispatch: true, then false, in order.
    let mut saw_typing_true = false;
    let mut saw_typing_false = false;
    while let Some(event) = next_event(&mut ws, Duration::from_secs(2)).await {
        if event["type"] == "agent_typing" && event["data"]["agent_name"] == agent_name.as_str() {
            if event["data"]["is_typing"] == true {
                assert!(!saw_typing_false, "typing=true must precede typing=false");
                saw_typing_true = true;
            } else {
                saw_typing_false = true;
            }
        }
        if saw_typing_true && saw_typing_false {
            break;
        }
    }
    assert!(saw_typing_true && saw_typing_false);

    // The DM prompt is the raw flow: no channel context prepended.
    let prompts = sdk.recorded_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Reply with exactly: LIVE_TEST_OK"));
    assert!(prompts[0].contains("Direct message from"));
    assert!(!prompts[0].contains("Recent messages:"));
}

#[tokio::test]
async fn test_mention_includes_channel_context() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let sdk = MockSdk::new("4", &[("S", "/tmp/mention")]);
    let sdk_url = spawn_mock_sdk(sdk.clone()).await;
    let agent_name = register_agent(&server, &sdk_url, "/tmp/mention").await;

    let general = server.find_channel(&client, "#general").await;
    let general_id = general["id"].as_str().unwrap();

    server.post_message(&client, general_id, "hello", None).await;
    server.post_message(&client, general_id, "are you there?", None).await;
    server
        .post_message(
            &client,
            general_id,
            &format!("@{agent_name} what is 2+2?"),
            Some(vec![&agent_name]),
        )
        .await;

    let reply = poll_for_message(&client, &server, general_id, &agent_name, "4").await;
    assert_eq!(reply["content"], "4");

    let prompts = sdk.recorded_prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert!(prompt.contains("#general"));
    assert!(prompt.contains("what is 2+2?"));
    // Context lines appear as "<sender>: <content>", oldest first, before
    // the triggering message.
    let hello_at = prompt.find(": hello").expect("context includes 'hello'");
    let there_at = prompt.find(": are you there?").expect("context includes follow-up");
    let trigger_at = prompt.find("what is 2+2?").unwrap();
    assert!(hello_at < there_at && there_at < trigger_at);
}

#[tokio::test]
async fn test_invocation_uses_dedicated_session() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let sdk = MockSdk::new("ack", &[("S", "/tmp/dedicated")]);
    let sdk_url = spawn_mock_sdk(sdk.clone()).await;
    let agent_name = register_agent(&server, &sdk_url, "/tmp/dedicated").await;

    let dm: Value = client
        .post(format!("{}/api/agents/{}/dm", server.base_url, agent_name))
        .json(&json!({ "content": "first" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let channel_id = dm["channel"]["id"].as_str().unwrap();
    poll_for_message(&client, &server, channel_id, &agent_name, "ack").await;

    // A fresh invocation session was created; the agent's own session "S"
    // was never prompted, and a second DM reuses the cached session.
    {
        let sessions = sdk.sessions.lock().unwrap();
        assert!(sessions.iter().any(|(id, _)| id.starts_with("inv-")));
    }

    client
        .post(format!("{}/api/agents/{}/dm", server.base_url, agent_name))
        .json(&json!({ "content": "second" }))
        .send()
        .await
        .unwrap();
    for _ in 0..100 {
        if sdk.recorded_prompts().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(sdk.recorded_prompts().len(), 2);
    let created: usize = sdk
        .sessions
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| id.starts_with("inv-"))
        .count();
    assert_eq!(created, 1, "second DM must reuse the cached invocation session");
}

#[tokio::test]
async fn test_unreachable_agent_reports_typing_error() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    // Register against a server that immediately goes away.
    let sdk = MockSdk::new("never", &[("S", "/tmp/gone")]);
    let sdk_url = spawn_mock_sdk(sdk).await;
    let agent_name = register_agent(&server, &sdk_url, "/tmp/gone").await;

    // Point the agent at a dead port by re-registering with a bogus URL.
    let mut mcp = McpClient::new(&server.base_url);
    mcp.initialize().await;
    mcp.call_tool(
        "register",
        json!({
            "session_id": "S",
            "project_path": "/tmp/gone",
            "agent_name": agent_name,
            "server_url": "http://127.0.0.1:1",
        }),
    )
    .await;

    let mut ws = connect_ws(&server).await;
    client
        .post(format!("{}/api/agents/{}/dm", server.base_url, agent_name))
        .json(&json!({ "content": "anyone home?" }))
        .send()
        .await
        .unwrap();

    // The POST succeeded; failure surfaces only as agent_typing{error}.
    let mut saw_error = false;
    while let Some(event) = next_event(&mut ws, Duration::from_secs(10)).await {
        if event["type"] == "agent_typing"
            && event["data"]["is_typing"] == false
            && event["data"]["error"].is_string()
        {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error, "expected agent_typing with error field");
}
