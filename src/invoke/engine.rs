//! The agent-invocation engine.
//!
//! Fires when a stored message addresses one or more agents (a DM channel
//! or an @-mention). For each addressee: resolve the agent's external
//! credentials (auto-discovering when missing), health-check the server,
//! obtain a dedicated invocation session, dispatch the prompt with a hard
//! deadline, and post the extracted reply back into the channel as the
//! agent. Everything past credential resolution runs on a background task;
//! the triggering handler never sees a failure.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::discovery::auto_discover;
use super::opencode::{extract_text, SessionSdk, PROMPT_TIMEOUT};
use crate::error::Result;
use crate::events::Event;
use crate::store::Store;
use crate::types::{Agent, Channel, Message, MessageWithSender};
use crate::ws::WsManager;

/// Messages of context prepended to an @-mention prompt.
const CONTEXT_MESSAGES: i64 = 5;

/// An agent reply may invoke further agents this many times before the
/// chain is dropped.
const MAX_CHAIN_DEPTH: u8 = 2;

pub struct InvocationEngine {
    store: Arc<dyn Store>,
    ws: Arc<WsManager>,
    sdk: Arc<dyn SessionSdk>,
    /// agent_id -> per-agent slot holding the cached invocation session.
    /// The inner lock serializes session creation per agent.
    sessions: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<Option<String>>>>>,
}

impl InvocationEngine {
    pub fn new(store: Arc<dyn Store>, ws: Arc<WsManager>, sdk: Arc<dyn SessionSdk>) -> Self {
        Self {
            store,
            ws,
            sdk,
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn session_slot(&self, agent_id: &str) -> Arc<AsyncMutex<Option<String>>> {
        self.sessions
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }

    /// Fan out invocations for a freshly stored message. Returns
    /// immediately; each addressee runs on its own task.
    pub fn dispatch_for_message(
        self: &Arc<Self>,
        message: &MessageWithSender,
        channel: &Channel,
        depth: u8,
    ) {
        if depth >= MAX_CHAIN_DEPTH {
            tracing::info!(
                "dropping invocation chain at depth {} for message {}",
                depth,
                message.message.id
            );
            return;
        }

        let mut targets: Vec<String> = Vec::new();
        if let Some(agent_name) = channel.name.strip_prefix("#dm-") {
            targets.push(agent_name.to_string());
        }
        if let Some(mentions) = &message.message.mentions {
            for mention in mentions {
                if !targets.contains(mention) {
                    targets.push(mention.clone());
                }
            }
        }
        // An agent never invokes itself.
        targets.retain(|name| name != &message.sender_name);
        if targets.is_empty() {
            return;
        }

        for agent_name in targets {
            let engine = Arc::clone(self);
            let message = message.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                engine.invoke_agent(&agent_name, &message, &channel, depth).await;
            });
        }
    }

    async fn invoke_agent(
        self: &Arc<Self>,
        agent_name: &str,
        trigger: &MessageWithSender,
        channel: &Channel,
        depth: u8,
    ) {
        let workspace_id = channel.workspace_id.clone();
        let channel_id = channel.id.clone();

        let typing = |is_typing: bool, error: Option<&str>| {
            self.ws.broadcast(&Event::agent_typing(
                &workspace_id,
                agent_name,
                &channel_id,
                is_typing,
                error,
            ));
        };

        let agent = match self.store.get_agent_by_name(agent_name) {
            Ok(Some(agent)) if agent.workspace_id == workspace_id => agent,
            Ok(_) => {
                tracing::debug!("mentioned name '{}' is not an agent here", agent_name);
                return;
            }
            Err(e) => {
                tracing::error!("agent lookup failed for '{}': {}", agent_name, e);
                return;
            }
        };
        if agent.agent_type == "system" {
            return;
        }

        typing(true, None);

        match self.run_invocation(&agent, trigger, channel, depth).await {
            Ok(()) => typing(false, None),
            Err(e) => {
                tracing::warn!("invocation of '{}' failed: {}", agent_name, e);
                typing(false, Some(&format!("{agent_name} is not reachable")));
            }
        }
    }

    async fn run_invocation(
        self: &Arc<Self>,
        agent: &Agent,
        trigger: &MessageWithSender,
        channel: &Channel,
        depth: u8,
    ) -> Result<()> {
        // 1. Credentials, auto-discovering when absent.
        let server_url = match (&agent.server_url, &agent.provider_session_id) {
            (Some(url), Some(_)) => url.clone(),
            _ => match auto_discover(self.sdk.as_ref(), &agent.project_path).await {
                Some((url, session_id)) => {
                    self.store
                        .set_agent_credentials(&agent.id, Some(url.as_str()), Some(session_id.as_str()))?;
                    url
                }
                None => {
                    // Delivered but unanswered; the agent will see the
                    // message on its next get_messages.
                    tracing::info!(
                        "no credentials for '{}'; message left for pickup",
                        agent.agent_name
                    );
                    return Ok(());
                }
            },
        };

        // 2. Health check. Stale credentials are cleared so the next
        //    attempt rediscovers.
        let live_sessions = match self.sdk.list_sessions(&server_url).await {
            Ok(sessions) => sessions,
            Err(e) => {
                self.store.set_agent_credentials(&agent.id, None, None)?;
                self.clear_cached_session(&agent.id);
                return Err(e);
            }
        };

        // 3. Dedicated invocation session. Never the agent's interactive
        //    session: prompting a busy session hangs indefinitely.
        let slot = self.session_slot(&agent.id);
        let mut cached = slot.lock().await;
        let session_id = match cached
            .as_ref()
            .filter(|id| live_sessions.iter().any(|s| &s.id == *id))
        {
            Some(id) => id.clone(),
            None => {
                let id = self.sdk.create_session(&server_url).await?;
                *cached = Some(id.clone());
                id
            }
        };
        drop(cached);

        // 4. Build the prompt.
        let recent_context = if channel.name.starts_with("#dm-") {
            None
        } else {
            let context = self
                .store
                .recent_context(&channel.id, &trigger.message.id, CONTEXT_MESSAGES)?;
            if context.is_empty() {
                None
            } else {
                Some(
                    context
                        .iter()
                        .map(|m| format!("  {}: {}", m.sender_name, m.message.content))
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }
        };
        let prompt = format_invocation_prompt(
            &trigger.sender_name,
            &channel.name,
            &trigger.message.content,
            recent_context.as_deref(),
        );

        // 5. Dispatch with the hard deadline.
        let parts = tokio::time::timeout(
            PROMPT_TIMEOUT,
            self.sdk.prompt_session(&server_url, &session_id, &prompt),
        )
        .await
        .map_err(|_| crate::error::Error::Internal("prompt timed out".to_string()))??;

        // 6-7. Extract text and post it back as the agent.
        let reply = extract_text(&parts);
        if reply.is_empty() {
            tracing::info!("'{}' returned no text parts", agent.agent_name);
            return Ok(());
        }

        let response = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel.id.clone(),
            sender_id: agent.id.clone(),
            content: reply,
            mentions: None,
            parent_id: None,
            is_pinned: false,
            pinned_at: None,
            pinned_by: None,
            edited_at: None,
            created_at: Utc::now(),
        };
        self.store.create_message(&response)?;

        let stored = MessageWithSender {
            message: response,
            sender_name: agent.agent_name.clone(),
        };
        self.ws.broadcast(&Event::new_message(&channel.workspace_id, &stored));

        // The reply may itself address agents; the chain cap bounds it.
        self.dispatch_for_message(&stored, channel, depth + 1);

        Ok(())
    }

    fn clear_cached_session(&self, agent_id: &str) {
        if let Some(slot) = self.sessions.lock().unwrap().get(agent_id) {
            if let Ok(mut cached) = slot.try_lock() {
                *cached = None;
            }
        }
    }
}

/// Render the prompt delivered to an external agent for a triggering
/// message.
#[must_use]
pub fn format_invocation_prompt(
    sender_name: &str,
    channel_name: &str,
    content: &str,
    recent_context: Option<&str>,
) -> String {
    let mut prompt = String::new();

    if let Some(context) = recent_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("Recent messages:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    if channel_name.starts_with("#dm-") {
        prompt.push_str(&format!("Direct message from {sender_name}:\n\n"));
    } else {
        prompt.push_str(&format!("{sender_name} mentioned you in {channel_name}:\n\n"));
    }
    prompt.push_str(content);
    prompt.push_str(&format!(
        "\n\nYou MUST reply using your TalkTo `send_message` tool with \
         channel=\"{channel_name}\". Do NOT reply inline in your own session."
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dm_prompt() {
        let prompt = format_invocation_prompt(
            "Yash",
            "#dm-cosmic-penguin",
            "Hey, can you help me?",
            None,
        );
        assert!(prompt.contains("Direct message from Yash"));
        assert!(prompt.contains("send_message"));
        assert!(prompt.contains("\"#dm-cosmic-penguin\""));
        assert!(prompt.contains("Hey, can you help me?"));
        assert!(prompt.contains("Do NOT reply inline"));
    }

    #[test]
    fn test_mention_prompt() {
        let prompt = format_invocation_prompt(
            "turbo-flamingo",
            "#general",
            "@cosmic-penguin what do you think?",
            None,
        );
        assert!(prompt.contains("turbo-flamingo mentioned you in #general"));
        assert!(prompt.contains("\"#general\""));
        assert!(prompt.contains("@cosmic-penguin what do you think?"));
    }

    #[test]
    fn test_prompt_with_context() {
        let context = "  alice: Hi\n  bob: Hello";
        let prompt = format_invocation_prompt("Yash", "#general", "What's up?", Some(context));
        assert!(prompt.contains("Recent messages:"));
        assert!(prompt.contains("alice: Hi"));
        assert!(prompt.contains("bob: Hello"));
        // Context precedes the triggering message.
        assert!(prompt.find("alice: Hi").unwrap() < prompt.find("What's up?").unwrap());
    }

    #[test]
    fn test_prompt_without_context() {
        let prompt = format_invocation_prompt("Yash", "#general", "Hello!", None);
        assert!(!prompt.contains("Recent messages:"));
    }

    #[test]
    fn test_prompt_always_demands_tool_reply() {
        for channel in ["#dm-test", "#general", "#project-talkto"] {
            let prompt = format_invocation_prompt("sender", channel, "test", None);
            assert!(prompt.contains("MUST reply using your TalkTo"));
        }
    }
}
