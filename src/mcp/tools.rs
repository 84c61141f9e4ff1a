//! The MCP tool set.
//!
//! Tool handlers return plain JSON values; semantic failures are reported
//! as `{"error": "..."}` inside the tool result so the calling agent can
//! read and react, never as JSON-RPC protocol errors.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::protocol::Tool;
use super::session::McpSession;
use crate::events::Event;
use crate::names::generate_unique_name;
use crate::server::AppState;
use crate::types::*;

pub const NOT_REGISTERED: &str = "Not registered. Call register first.";

const ALLOWED_GENDERS: &[&str] = &["male", "female", "non-binary", "other"];

fn err(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn registered_agent(state: &AppState, session: &McpSession) -> Result<Agent, Value> {
    let agent_id = session.registered_agent_id().ok_or_else(|| err(NOT_REGISTERED))?;
    state
        .store
        .get_agent(&agent_id)
        .map_err(|e| err(format!("lookup failed: {e}")))?
        .ok_or_else(|| err(NOT_REGISTERED))
}

/// Resolve a channel by id, exact name, or name without the '#' prefix,
/// always inside the given workspace.
fn resolve_channel(state: &AppState, workspace_id: &str, ident: &str) -> Option<Channel> {
    if let Ok(Some(channel)) = state.store.get_channel(ident) {
        if channel.workspace_id == workspace_id {
            return Some(channel);
        }
        return None;
    }
    if let Ok(Some(channel)) = state.store.get_channel_by_name(workspace_id, ident) {
        return Some(channel);
    }
    if !ident.starts_with('#') {
        if let Ok(Some(channel)) =
            state.store.get_channel_by_name(workspace_id, &format!("#{ident}"))
        {
            return Some(channel);
        }
    }
    None
}

fn message_json(msg: &MessageWithSender, channel_name: Option<&str>) -> Value {
    let mut value = json!({
        "id": msg.message.id,
        "channel_id": msg.message.channel_id,
        "sender_id": msg.message.sender_id,
        "sender_name": msg.sender_name,
        "content": msg.message.content,
        "mentions": msg.message.mentions,
        "parent_id": msg.message.parent_id,
        "created_at": msg.message.created_at.to_rfc3339(),
    });
    if let Some(name) = channel_name {
        value["channel_name"] = json!(name);
    }
    value
}

pub async fn call_tool(
    state: &Arc<AppState>,
    session: &McpSession,
    name: &str,
    args: &Value,
) -> Value {
    match name {
        "register" => register(state, session, args).await,
        "send_message" => send_message(state, session, args),
        "get_messages" => get_messages(state, session, args),
        "create_channel" => create_channel(state, session, args),
        "join_channel" => join_channel(state, session, args),
        "list_channels" => list_channels(state, session),
        "list_agents" => list_agents(state, session),
        "update_profile" => update_profile(state, session, args),
        "heartbeat" => heartbeat(state, session),
        "disconnect" => disconnect(state, session, args),
        "get_feature_requests" => get_feature_requests(state, session),
        "create_feature_request" => create_feature_request(state, session, args),
        "vote_feature" => vote_feature(state, session, args),
        "search_messages" => search_messages(state, session, args),
        "edit_message" => edit_message(state, session, args),
        "react_message" => react_message(state, session, args),
        _ => err(format!("Unknown tool: {name}")),
    }
}

async fn register(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let Some(provider_session_id) = opt_str(args, "session_id") else {
        return err("session_id is required");
    };
    let Some(project_path) = opt_str(args, "project_path") else {
        return err("project_path is required");
    };
    let agent_type = opt_str(args, "agent_type").unwrap_or("opencode");
    let server_url = opt_str(args, "server_url");
    let requested_name = opt_str(args, "agent_name");
    let now = Utc::now();

    let project_name = std::path::Path::new(project_path)
        .file_name()
        .map_or_else(|| project_path.to_string(), |n| n.to_string_lossy().to_string());
    let project_channel_name = format!("#project-{project_name}");

    // Resume path: the name matches an existing agent.
    if let Some(name) = requested_name {
        match state.store.get_agent_by_name(name) {
            Ok(Some(agent)) => {
                if let Err(e) = state.store.set_agent_credentials(
                    &agent.id,
                    server_url.or(agent.server_url.as_deref()),
                    Some(provider_session_id),
                ) {
                    return err(format!("failed to update credentials: {e}"));
                }
                if let Err(e) = state.store.set_agent_status(&agent.id, AgentStatus::Online) {
                    return err(format!("failed to update status: {e}"));
                }
                start_session_row(state, &agent.id, now);
                session.set_registered_agent_id(agent.id.clone());
                state.ws.broadcast(&Event::agent_status(
                    &agent.workspace_id,
                    &agent.agent_name,
                    "online",
                    &agent.agent_type,
                    &agent.project_name,
                ));

                let channel = format!("#project-{}", agent.project_name);
                let (master_prompt, inject_prompt) =
                    render_prompts(state, &agent, &channel);
                return json!({
                    "status": "connected",
                    "agent_name": agent.agent_name,
                    "project_channel": channel,
                    "master_prompt": master_prompt,
                    "inject_prompt": inject_prompt,
                    "description": agent.description,
                    "personality": agent.personality,
                    "current_task": agent.current_task,
                });
            }
            Ok(None) => {} // fall through to fresh registration below
            Err(e) => return err(format!("lookup failed: {e}")),
        }
    }

    // Fresh registration: allocate a name, collision-retried.
    let mut agent_name = requested_name.map(str::to_string);
    let mut attempt: u32 = 0;
    let agent_name = loop {
        let candidate = agent_name
            .take()
            .unwrap_or_else(|| generate_unique_name(project_path, agent_type, attempt));
        match state.store.get_agent_by_name(&candidate) {
            Ok(None) => break candidate,
            Ok(Some(_)) => {
                attempt += 1;
                if attempt > 20 {
                    return err("could not allocate a unique agent name");
                }
            }
            Err(e) => return err(format!("lookup failed: {e}")),
        }
    };

    let workspace_id = DEFAULT_WORKSPACE_ID.to_string();
    let agent_id = Uuid::new_v4().to_string();
    let user = User {
        id: agent_id.clone(),
        name: agent_name.clone(),
        user_type: UserType::Agent,
        display_name: None,
        about: None,
        agent_instructions: None,
        email: None,
        avatar_url: None,
        created_at: now,
    };
    let agent = Agent {
        id: agent_id.clone(),
        agent_name: agent_name.clone(),
        agent_type: agent_type.to_string(),
        project_path: project_path.to_string(),
        project_name: project_name.clone(),
        status: AgentStatus::Online,
        description: None,
        personality: None,
        current_task: None,
        gender: None,
        server_url: server_url.map(str::to_string),
        provider_session_id: Some(provider_session_id.to_string()),
        workspace_id: workspace_id.clone(),
    };

    let created = (|| -> crate::error::Result<()> {
        state.store.create_user(&user)?;
        state.store.create_agent(&agent)?;
        state.store.add_workspace_member(&WorkspaceMember {
            workspace_id: workspace_id.clone(),
            user_id: agent_id.clone(),
            role: Role::Member,
            joined_at: now,
        })?;
        Ok(())
    })();
    if let Err(e) = created {
        return err(format!("registration failed: {e}"));
    }

    // Auto-join #general and the project channel (created on demand).
    for channel_name in ["#general", project_channel_name.as_str()] {
        let channel = match state.store.get_channel_by_name(&workspace_id, channel_name) {
            Ok(Some(channel)) => Some(channel),
            Ok(None) => {
                let channel = Channel {
                    id: Uuid::new_v4().to_string(),
                    name: channel_name.to_string(),
                    channel_type: if channel_name == "#general" {
                        ChannelType::General
                    } else {
                        ChannelType::Project
                    },
                    topic: None,
                    project_path: (channel_name != "#general")
                        .then(|| project_path.to_string()),
                    workspace_id: workspace_id.clone(),
                    created_by: agent_id.clone(),
                    created_at: now,
                    is_archived: false,
                    archived_at: None,
                };
                match state.store.create_channel(&channel) {
                    Ok(()) => {
                        state
                            .ws
                            .broadcast(&Event::channel_created(&workspace_id, &channel));
                        Some(channel)
                    }
                    Err(e) => {
                        tracing::warn!("failed to create {}: {}", channel_name, e);
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("channel lookup failed for {}: {}", channel_name, e);
                None
            }
        };
        if let Some(channel) = channel {
            let _ = state.store.add_channel_member(&ChannelMember {
                channel_id: channel.id,
                user_id: agent_id.clone(),
                joined_at: now,
            });
        }
    }

    start_session_row(state, &agent_id, now);
    session.set_registered_agent_id(agent_id);
    state.ws.broadcast(&Event::agent_status(
        &workspace_id,
        &agent_name,
        "online",
        agent_type,
        &project_name,
    ));

    let (master_prompt, inject_prompt) = render_prompts(state, &agent, &project_channel_name);
    json!({
        "status": "registered",
        "agent_name": agent_name,
        "project_channel": project_channel_name,
        "master_prompt": master_prompt,
        "inject_prompt": inject_prompt,
    })
}

fn start_session_row(state: &AppState, agent_id: &str, now: chrono::DateTime<Utc>) {
    // The client's OS pid is not observable over HTTP; external
    // integrations may record a real one later.
    let session_row = AgentSession {
        id: Uuid::new_v4().to_string(),
        agent_id: agent_id.to_string(),
        pid: 0,
        tty: String::new(),
        is_active: true,
        started_at: now,
        ended_at: None,
        last_heartbeat: now,
    };
    if let Err(e) = state.store.start_agent_session(&session_row) {
        tracing::warn!("failed to record agent session: {e}");
    }
}

fn render_prompts(state: &AppState, agent: &Agent, project_channel: &str) -> (String, String) {
    let operator = state
        .store
        .get_workspace_human(&agent.workspace_id)
        .ok()
        .flatten();
    let (name, display, about, instructions) = match &operator {
        Some(user) => (
            user.name.clone(),
            user.display_name.clone().unwrap_or_else(|| user.name.clone()),
            user.about.clone().unwrap_or_default(),
            user.agent_instructions.clone().unwrap_or_default(),
        ),
        None => (String::new(), String::new(), String::new(), String::new()),
    };

    let master_prompt = state
        .prompts
        .render_master_prompt(
            &agent.agent_name,
            &agent.agent_type,
            &agent.project_name,
            project_channel,
            &name,
            &display,
            &about,
            &instructions,
        )
        .unwrap_or_else(|e| {
            tracing::error!("master prompt render failed: {e}");
            String::new()
        });
    let inject_prompt = state
        .prompts
        .render_registration_rules(&agent.agent_name, project_channel)
        .unwrap_or_else(|e| {
            tracing::error!("registration rules render failed: {e}");
            String::new()
        });
    (master_prompt, inject_prompt)
}

fn send_message(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(channel_ident) = opt_str(args, "channel") else {
        return err("channel is required");
    };
    let Some(content) = opt_str(args, "content") else {
        return err("content is required");
    };
    if content.len() > MAX_MESSAGE_LEN {
        return err(format!("content exceeds {MAX_MESSAGE_LEN} characters"));
    }
    let mentions: Option<Vec<String>> = args
        .get("mentions")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });

    let Some(channel) = resolve_channel(state, &agent.workspace_id, channel_ident) else {
        return err("Channel not found");
    };

    match state.post_message(&channel, &agent.id, &agent.agent_name, content, mentions, None, 0)
    {
        Ok(stored) => json!({
            "status": "sent",
            "message_id": stored.message.id,
            "channel": channel.name,
        }),
        Err(e) => err(format!("failed to send: {e}")),
    }
}

fn get_messages(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let limit = args
        .get("limit")
        .and_then(Value::as_i64)
        .unwrap_or(10)
        .clamp(1, 10);

    let messages = if let Some(channel_ident) = opt_str(args, "channel") {
        let Some(channel) = resolve_channel(state, &agent.workspace_id, channel_ident) else {
            return err("Channel not found");
        };
        state.store.list_messages(&channel.id, None, limit)
    } else {
        state.store.agent_inbox(&agent, limit)
    };

    match messages {
        Ok(messages) => json!({
            "messages": messages.iter().map(|m| message_json(m, None)).collect::<Vec<_>>(),
        }),
        Err(e) => err(format!("failed to fetch messages: {e}")),
    }
}

fn create_channel(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(raw_name) = opt_str(args, "name") else {
        return err("name is required");
    };
    let name = if raw_name.starts_with('#') {
        raw_name.to_string()
    } else {
        format!("#{raw_name}")
    };

    match state.store.get_channel_by_name(&agent.workspace_id, &name) {
        Ok(Some(_)) => return err(format!("Channel {name} already exists")),
        Ok(None) => {}
        Err(e) => return err(format!("lookup failed: {e}")),
    }

    let channel = Channel {
        id: Uuid::new_v4().to_string(),
        name: name.clone(),
        channel_type: ChannelType::Custom,
        topic: None,
        project_path: None,
        workspace_id: agent.workspace_id.clone(),
        created_by: agent.id.clone(),
        created_at: Utc::now(),
        is_archived: false,
        archived_at: None,
    };
    if let Err(e) = state.store.create_channel(&channel) {
        return err(format!("failed to create channel: {e}"));
    }
    let _ = state.store.add_channel_member(&ChannelMember {
        channel_id: channel.id.clone(),
        user_id: agent.id,
        joined_at: channel.created_at,
    });
    state
        .ws
        .broadcast(&Event::channel_created(&channel.workspace_id, &channel));

    json!({ "channel_id": channel.id, "name": channel.name, "type": channel.channel_type.as_str() })
}

fn join_channel(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(channel_ident) = opt_str(args, "channel") else {
        return err("channel is required");
    };
    let Some(channel) = resolve_channel(state, &agent.workspace_id, channel_ident) else {
        return err("Channel not found");
    };

    match state.store.add_channel_member(&ChannelMember {
        channel_id: channel.id,
        user_id: agent.id,
        joined_at: Utc::now(),
    }) {
        Ok(true) => json!({ "status": "joined", "channel": channel.name }),
        Ok(false) => json!({ "status": "already_member", "channel": channel.name }),
        Err(e) => err(format!("failed to join: {e}")),
    }
}

fn list_channels(state: &Arc<AppState>, session: &McpSession) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    match state.store.list_channels(&agent.workspace_id) {
        Ok(channels) => Value::Array(
            channels
                .iter()
                .filter(|c| !c.is_archived)
                .map(|c| {
                    json!({
                        "id": c.id,
                        "name": c.name,
                        "type": c.channel_type.as_str(),
                        "topic": c.topic,
                    })
                })
                .collect(),
        ),
        Err(e) => err(format!("failed to list channels: {e}")),
    }
}

fn list_agents(state: &Arc<AppState>, session: &McpSession) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    match state.store.list_agents(&agent.workspace_id) {
        Ok(agents) => Value::Array(
            agents
                .iter()
                .map(|a| {
                    json!({
                        "agent_name": a.agent_name,
                        "agent_type": a.agent_type,
                        "status": a.status.as_str(),
                        "project_name": a.project_name,
                        "description": a.description,
                        "current_task": a.current_task,
                        "is_ghost": state.ghosts.is_ghost(&a.id),
                    })
                })
                .collect(),
        ),
        Err(e) => err(format!("failed to list agents: {e}")),
    }
}

fn update_profile(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let mut agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };

    if let Some(gender) = opt_str(args, "gender") {
        if !ALLOWED_GENDERS.contains(&gender) {
            return err(format!(
                "invalid gender: {gender}. Must be one of: {}",
                ALLOWED_GENDERS.join(", ")
            ));
        }
        agent.gender = Some(gender.to_string());
    }
    if let Some(description) = opt_str(args, "description") {
        agent.description = Some(description.to_string());
    }
    if let Some(personality) = opt_str(args, "personality") {
        agent.personality = Some(personality.to_string());
    }
    if let Some(current_task) = opt_str(args, "current_task") {
        agent.current_task = Some(current_task.to_string());
    }

    if let Err(e) = state.store.update_agent(&agent) {
        return err(format!("failed to update profile: {e}"));
    }
    json!({
        "status": "updated",
        "description": agent.description,
        "personality": agent.personality,
        "current_task": agent.current_task,
        "gender": agent.gender,
    })
}

fn heartbeat(state: &Arc<AppState>, session: &McpSession) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let now = Utc::now();
    match state.store.touch_agent_heartbeat(&agent.id, now) {
        Ok(touched) => {
            if !touched {
                start_session_row(state, &agent.id, now);
            }
        }
        Err(e) => return err(format!("heartbeat failed: {e}")),
    }
    if agent.status != AgentStatus::Online {
        let _ = state.store.set_agent_status(&agent.id, AgentStatus::Online);
        state.ws.broadcast(&Event::agent_status(
            &agent.workspace_id,
            &agent.agent_name,
            "online",
            &agent.agent_type,
            &agent.project_name,
        ));
    }
    json!({ "status": "ok" })
}

fn disconnect(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let registered = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    // Disconnect by name defaults to the registered agent itself.
    let agent = match opt_str(args, "agent_name") {
        Some(name) if name != registered.agent_name => {
            match state.store.get_agent_by_name(name) {
                Ok(Some(agent)) => agent,
                Ok(None) => return err(format!("Agent {name} not found")),
                Err(e) => return err(format!("lookup failed: {e}")),
            }
        }
        _ => registered,
    };

    let now = Utc::now();
    if let Err(e) = state.store.set_agent_status(&agent.id, AgentStatus::Offline) {
        return err(format!("failed to disconnect: {e}"));
    }
    if let Err(e) = state.store.end_agent_sessions(&agent.id, now) {
        return err(format!("failed to close session: {e}"));
    }
    state.ws.broadcast(&Event::agent_status(
        &agent.workspace_id,
        &agent.agent_name,
        "offline",
        &agent.agent_type,
        &agent.project_name,
    ));
    json!({ "status": "disconnected", "agent_name": agent.agent_name })
}

fn get_feature_requests(state: &Arc<AppState>, session: &McpSession) -> Value {
    if let Err(e) = registered_agent(state, session) {
        return e;
    }
    match state.store.list_features(None) {
        Ok(features) => json!({
            "features": features
                .iter()
                .map(|(f, votes)| {
                    json!({
                        "id": f.id,
                        "title": f.title,
                        "description": f.description,
                        "status": f.status,
                        "vote_count": votes,
                    })
                })
                .collect::<Vec<_>>(),
        }),
        Err(e) => err(format!("failed to list features: {e}")),
    }
}

fn create_feature_request(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(title) = opt_str(args, "title") else {
        return err("title is required");
    };
    let Some(description) = opt_str(args, "description") else {
        return err("description is required");
    };

    let feature = FeatureRequest {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        description: description.to_string(),
        status: "open".to_string(),
        reason: None,
        created_by: agent.id,
        created_at: Utc::now(),
        updated_at: None,
    };
    if let Err(e) = state.store.create_feature(&feature) {
        return err(format!("failed to create feature: {e}"));
    }
    state.ws.broadcast(&Event::feature_update(
        &agent.workspace_id,
        &feature,
        0,
        "created",
    ));
    json!({ "status": "created", "feature_id": feature.id, "title": feature.title })
}

fn vote_feature(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(feature_id) = opt_str(args, "feature_id") else {
        return err("feature_id is required");
    };
    let vote = match args.get("vote").and_then(Value::as_i64) {
        Some(v @ (-1 | 1)) => v as i32,
        _ => return err("vote must be +1 or -1"),
    };

    let feature = match state.store.get_feature(feature_id) {
        Ok(Some(feature)) => feature,
        Ok(None) => return err("Feature not found"),
        Err(e) => return err(format!("lookup failed: {e}")),
    };

    if let Err(e) = state.store.upsert_feature_vote(&FeatureVote {
        feature_id: feature.id.clone(),
        user_id: agent.id,
        vote,
    }) {
        return err(format!("failed to vote: {e}"));
    }
    let vote_count = state.store.feature_vote_count(&feature.id).unwrap_or(0);
    state.ws.broadcast(&Event::feature_update(
        &agent.workspace_id,
        &feature,
        vote_count,
        "voted",
    ));
    json!({ "status": "voted", "vote": vote, "vote_count": vote_count })
}

fn search_messages(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(query) = opt_str(args, "query") else {
        return err("query is required");
    };
    let channel = opt_str(args, "channel");

    match state.store.search_messages(&agent.workspace_id, query, channel, 50) {
        Ok(hits) => json!({
            "results": hits
                .iter()
                .map(|(m, channel_name)| message_json(m, Some(channel_name)))
                .collect::<Vec<_>>(),
        }),
        Err(e) => err(format!("search failed: {e}")),
    }
}

fn edit_message(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(message_id) = opt_str(args, "id") else {
        return err("id is required");
    };
    let Some(content) = opt_str(args, "content") else {
        return err("content is required");
    };
    if content.len() > MAX_MESSAGE_LEN {
        return err(format!("content exceeds {MAX_MESSAGE_LEN} characters"));
    }

    let message = match state.store.get_message(message_id) {
        Ok(Some(message)) => message,
        Ok(None) => return err("Message not found"),
        Err(e) => return err(format!("lookup failed: {e}")),
    };
    if message.sender_id != agent.id {
        return err("only the author can edit a message");
    }

    if let Err(e) = state.store.edit_message(&message.id, content, Utc::now()) {
        return err(format!("failed to edit: {e}"));
    }
    if let Ok(Some(updated)) = state.store.get_message_with_sender(&message.id) {
        state
            .ws
            .broadcast(&Event::message_edited(&agent.workspace_id, &updated));
    }
    json!({ "status": "edited", "message_id": message.id })
}

fn react_message(state: &Arc<AppState>, session: &McpSession, args: &Value) -> Value {
    let agent = match registered_agent(state, session) {
        Ok(agent) => agent,
        Err(e) => return e,
    };
    let Some(message_id) = opt_str(args, "id") else {
        return err("id is required");
    };
    let Some(emoji) = opt_str(args, "emoji") else {
        return err("emoji is required");
    };

    let message = match state.store.get_message(message_id) {
        Ok(Some(message)) => message,
        Ok(None) => return err("Message not found"),
        Err(e) => return err(format!("lookup failed: {e}")),
    };

    match state.store.toggle_reaction(&message.id, &agent.id, emoji) {
        Ok(added) => {
            state.ws.broadcast(&Event::reaction(
                &agent.workspace_id,
                &message.id,
                &message.channel_id,
                &agent.id,
                emoji,
                added,
            ));
            json!({ "status": if added { "added" } else { "removed" }, "emoji": emoji })
        }
        Err(e) => err(format!("failed to react: {e}")),
    }
}

/// The advertised tool catalogue.
pub fn tool_definitions() -> Vec<Tool> {
    fn schema(properties: Value, required: &[&str]) -> Value {
        json!({ "type": "object", "properties": properties, "required": required })
    }

    vec![
        Tool {
            name: "register",
            description: "Register this agent with the hub (or resume by agent_name). \
                          Returns your agent name and operating prompts.",
            input_schema: schema(
                json!({
                    "session_id": { "type": "string", "description": "Your runtime session id" },
                    "project_path": { "type": "string", "description": "Absolute path of the project you work in" },
                    "agent_name": { "type": "string", "description": "Existing agent name to resume" },
                    "agent_type": { "type": "string", "description": "Runtime kind, e.g. opencode or claude" },
                    "server_url": { "type": "string", "description": "Base URL of your session server" }
                }),
                &["session_id", "project_path"],
            ),
        },
        Tool {
            name: "send_message",
            description: "Post a message to a channel, optionally mentioning agents.",
            input_schema: schema(
                json!({
                    "channel": { "type": "string", "description": "Channel name or id" },
                    "content": { "type": "string" },
                    "mentions": { "type": "array", "items": { "type": "string" } }
                }),
                &["channel", "content"],
            ),
        },
        Tool {
            name: "get_messages",
            description: "Fetch your most relevant messages: mentions first, then your \
                          project channel, then other joined channels.",
            input_schema: schema(
                json!({
                    "channel": { "type": "string", "description": "Restrict to one channel" },
                    "limit": { "type": "integer", "description": "Max messages (capped at 10)" }
                }),
                &[],
            ),
        },
        Tool {
            name: "create_channel",
            description: "Create a channel; the '#' prefix is added automatically.",
            input_schema: schema(json!({ "name": { "type": "string" } }), &["name"]),
        },
        Tool {
            name: "join_channel",
            description: "Join a channel by name or id.",
            input_schema: schema(json!({ "channel": { "type": "string" } }), &["channel"]),
        },
        Tool {
            name: "list_channels",
            description: "List the channels in your workspace.",
            input_schema: schema(json!({}), &[]),
        },
        Tool {
            name: "list_agents",
            description: "List the agents in your workspace.",
            input_schema: schema(json!({}), &[]),
        },
        Tool {
            name: "update_profile",
            description: "Update your description, personality, current task, or gender.",
            input_schema: schema(
                json!({
                    "description": { "type": "string" },
                    "personality": { "type": "string" },
                    "current_task": { "type": "string" },
                    "gender": { "type": "string", "enum": ALLOWED_GENDERS }
                }),
                &[],
            ),
        },
        Tool {
            name: "heartbeat",
            description: "Signal that you are alive; refreshes your session heartbeat.",
            input_schema: schema(json!({}), &[]),
        },
        Tool {
            name: "disconnect",
            description: "Mark an agent offline and close its session.",
            input_schema: schema(json!({ "agent_name": { "type": "string" } }), &[]),
        },
        Tool {
            name: "get_feature_requests",
            description: "List feature requests with vote counts.",
            input_schema: schema(json!({}), &[]),
        },
        Tool {
            name: "create_feature_request",
            description: "File a feature request.",
            input_schema: schema(
                json!({
                    "title": { "type": "string" },
                    "description": { "type": "string" }
                }),
                &["title", "description"],
            ),
        },
        Tool {
            name: "vote_feature",
            description: "Vote +1 or -1 on a feature request; revoting replaces your vote.",
            input_schema: schema(
                json!({
                    "feature_id": { "type": "string" },
                    "vote": { "type": "integer", "enum": [-1, 1] }
                }),
                &["feature_id", "vote"],
            ),
        },
        Tool {
            name: "search_messages",
            description: "Search message content in your workspace, optionally within one \
                          channel. Wildcards match literally.",
            input_schema: schema(
                json!({
                    "query": { "type": "string" },
                    "channel": { "type": "string" }
                }),
                &["query"],
            ),
        },
        Tool {
            name: "edit_message",
            description: "Edit a message you authored.",
            input_schema: schema(
                json!({
                    "id": { "type": "string" },
                    "content": { "type": "string" }
                }),
                &["id", "content"],
            ),
        },
        Tool {
            name: "react_message",
            description: "Toggle an emoji reaction on a message.",
            input_schema: schema(
                json!({
                    "id": { "type": "string" },
                    "emoji": { "type": "string" }
                }),
                &["id", "emoji"],
            ),
        },
    ]
}
