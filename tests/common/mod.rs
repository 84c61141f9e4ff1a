#![allow(dead_code)]

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub port: u16,
    server_process: Option<Child>,
}

static BUILD_RELEASE: LazyLock<()> = LazyLock::new(|| {
    let build_status = Command::new("cargo")
        .args(["build", "--release"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("build release binary");
    assert!(build_status.success(), "Failed to build release binary");
});

impl TestServer {
    pub async fn start() -> Self {
        LazyLock::force(&BUILD_RELEASE);

        let temp_dir = TempDir::new().expect("create temp dir");
        let data_dir = temp_dir.path();
        let binary = Path::new(env!("CARGO_MANIFEST_DIR")).join("target/release/talkto");

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let base_url = format!("http://127.0.0.1:{}", port);

        let server_process = Command::new(&binary)
            .args(["serve", "--data-dir"])
            .arg(data_dir)
            .args(["--host", "127.0.0.1", "--port"])
            .arg(port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("start server");

        Self::wait_for_ready(&base_url).await;

        Self {
            temp_dir,
            base_url,
            port,
            server_process: Some(server_process),
        }
    }

    async fn wait_for_ready(base_url: &str) {
        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{}/api/health", base_url))
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("Server did not become ready");
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Onboard the operator so the localhost bypass resolves to a user.
    pub async fn onboard(&self, client: &reqwest::Client, name: &str) -> Value {
        let response = client
            .post(format!("{}/api/users/onboard", self.base_url))
            .json(&json!({ "name": name, "display_name": name }))
            .send()
            .await
            .expect("onboard");
        assert!(response.status().is_success(), "onboard failed: {}", response.status());
        response.json().await.expect("onboard body")
    }

    pub async fn find_channel(&self, client: &reqwest::Client, name: &str) -> Value {
        let channels: Vec<Value> = client
            .get(format!("{}/api/channels", self.base_url))
            .send()
            .await
            .expect("list channels")
            .json()
            .await
            .expect("channels body");
        channels
            .into_iter()
            .find(|c| c["name"] == name)
            .unwrap_or_else(|| panic!("channel {name} not found"))
    }

    pub async fn post_message(
        &self,
        client: &reqwest::Client,
        channel_id: &str,
        content: &str,
        mentions: Option<Vec<&str>>,
    ) -> Value {
        let mut body = json!({ "content": content });
        if let Some(mentions) = mentions {
            body["mentions"] = json!(mentions);
        }
        let response = client
            .post(format!("{}/api/channels/{}/messages", self.base_url, channel_id))
            .json(&body)
            .send()
            .await
            .expect("post message");
        assert_eq!(response.status().as_u16(), 201, "post message failed");
        response.json().await.expect("message body")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(mut process) = self.server_process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Minimal MCP client over plain JSON, one session per instance.
pub struct McpClient {
    pub base_url: String,
    pub session_id: Option<String>,
    client: reqwest::Client,
    next_id: i64,
}

impl McpClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            session_id: None,
            client: reqwest::Client::new(),
            next_id: 1,
        }
    }

    pub async fn initialize(&mut self) -> Value {
        let (value, headers) = self
            .request_raw("initialize", json!({ "protocolVersion": "2024-11-05" }))
            .await;
        self.session_id = headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        assert!(self.session_id.is_some(), "initialize must return a session id");
        value
    }

    async fn request_raw(&mut self, method: &str, params: Value) -> (Value, reqwest::header::HeaderMap) {
        let id = self.next_id;
        self.next_id += 1;
        let mut request = self
            .client
            .post(format!("{}/mcp", self.base_url))
            .json(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }));
        if let Some(session_id) = &self.session_id {
            request = request.header("mcp-session-id", session_id.clone());
        }
        let response = request.send().await.expect("mcp request");
        let headers = response.headers().clone();
        let value: Value = response.json().await.expect("mcp response body");
        (value, headers)
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let (value, _) = self.request_raw(method, params).await;
        value
    }

    /// Call a tool and decode the JSON object inside the text content item.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        let response = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .unwrap_or_else(|| panic!("tool {name} returned no text content: {response}"));
        serde_json::from_str(text).expect("tool result is JSON")
    }
}
