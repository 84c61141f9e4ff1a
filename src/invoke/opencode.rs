//! HTTP client for OpenCode-style session servers.
//!
//! One client serves every known server; the target base URL rides on each
//! call because agents register with whichever server spawned them.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Budget for health probes and session listings.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard deadline for one prompt dispatch.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Deserialize)]
pub struct SdkSession {
    pub id: String,
    /// Working directory the session was started in; used by
    /// auto-discovery to match sessions to agents.
    #[serde(default, alias = "cwd")]
    pub directory: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// One piece of a prompt response. Only `text` parts that are not marked
/// ignored contribute to the reply.
#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ignored: Option<bool>,
}

#[derive(Debug, Serialize)]
struct PromptRequest {
    parts: Vec<PromptPart>,
}

#[derive(Debug, Serialize)]
struct PromptPart {
    #[serde(rename = "type")]
    part_type: &'static str,
    text: String,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    #[serde(default)]
    parts: Vec<Part>,
}

/// The seam between the hub and external session runtimes. The engine and
/// the liveness sweeper both talk through it.
#[async_trait]
pub trait SessionSdk: Send + Sync {
    async fn list_sessions(&self, base_url: &str) -> Result<Vec<SdkSession>>;
    async fn create_session(&self, base_url: &str) -> Result<String>;
    async fn prompt_session(&self, base_url: &str, session_id: &str, text: &str)
        -> Result<Vec<Part>>;
}

pub struct OpenCodeClient {
    client: Client,
}

impl OpenCodeClient {
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(HEALTH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for OpenCodeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSdk for OpenCodeClient {
    async fn list_sessions(&self, base_url: &str) -> Result<Vec<SdkSession>> {
        let url = format!("{base_url}/session");
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("session server unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "session server error: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("invalid session list: {e}")))
    }

    async fn create_session(&self, base_url: &str) -> Result<String> {
        let url = format!("{base_url}/session");
        let response = self
            .client
            .post(&url)
            .timeout(HEALTH_TIMEOUT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| Error::Internal(format!("failed to create session: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "session create failed: {}",
                response.status()
            )));
        }
        let created: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("invalid create response: {e}")))?;
        tracing::info!("created invocation session {} on {}", created.id, base_url);
        Ok(created.id)
    }

    async fn prompt_session(
        &self,
        base_url: &str,
        session_id: &str,
        text: &str,
    ) -> Result<Vec<Part>> {
        let url = format!("{base_url}/session/{session_id}/message");
        let request = PromptRequest {
            parts: vec![PromptPart {
                part_type: "text",
                text: text.to_string(),
            }],
        };
        let response = self
            .client
            .post(&url)
            .timeout(PROMPT_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("prompt dispatch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "prompt failed: {}",
                response.status()
            )));
        }
        let parsed: PromptResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("invalid prompt response: {e}")))?;
        Ok(parsed.parts)
    }
}

/// Keep `text` parts not marked ignored, join in order, trim the ends.
#[must_use]
pub fn extract_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter(|p| p.kind == "text" && p.ignored != Some(true))
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
