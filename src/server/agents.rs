//! Agent listings (with liveness) and the DM entry point.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::dto::DmRequest;
use super::response::{ApiError, StoreOptionExt, StoreResultExt};
use super::validation::validate_message_content;
use super::AppState;
use crate::auth::{AuthContext, RequireUser};
use crate::types::{Agent, Channel, ChannelMember, ChannelType};

fn agent_json(state: &AppState, agent: &Agent) -> Value {
    let mut value = serde_json::to_value(agent).unwrap_or_default();
    value["is_ghost"] = json!(state.ghosts.is_ghost(&agent.id));
    value
}

pub async fn list_agents(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let agents = state
        .store
        .list_agents(&ctx.workspace_id)
        .api_err("Failed to list agents")?;
    let out: Vec<Value> = agents.iter().map(|a| agent_json(&state, a)).collect();
    Ok(Json(out))
}

pub async fn get_agent(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .store
        .get_agent_by_name(&name)
        .api_err("Failed to load agent")?
        .or_not_found("Agent not found")?;
    if agent.workspace_id != ctx.workspace_id {
        return Err(ApiError::not_found("Agent not found"));
    }
    Ok(Json(agent_json(&state, &agent)))
}

/// Resolve (or create) the `#dm-{agent}` channel and post into it; the
/// invocation engine picks the message up from there.
pub async fn dm_agent(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<DmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_message_content(&req.content)?;
    let agent = state
        .store
        .get_agent_by_name(&name)
        .api_err("Failed to load agent")?
        .or_not_found("Agent not found")?;
    if agent.workspace_id != auth.ctx.workspace_id {
        return Err(ApiError::not_found("Agent not found"));
    }

    let dm_name = format!("#dm-{}", agent.agent_name);
    let now = Utc::now();
    let channel = match state
        .store
        .get_channel_by_name(&auth.ctx.workspace_id, &dm_name)
        .api_err("Failed to look up DM channel")?
    {
        Some(channel) => channel,
        None => {
            let channel = Channel {
                id: Uuid::new_v4().to_string(),
                name: dm_name,
                channel_type: ChannelType::Dm,
                topic: None,
                project_path: None,
                workspace_id: auth.ctx.workspace_id.clone(),
                created_by: auth.user.id.clone(),
                created_at: now,
                is_archived: false,
                archived_at: None,
            };
            state
                .store
                .create_channel(&channel)
                .api_err("Failed to create DM channel")?;
            for user_id in [&auth.user.id, &agent.id] {
                let _ = state.store.add_channel_member(&ChannelMember {
                    channel_id: channel.id.clone(),
                    user_id: user_id.to_string(),
                    joined_at: now,
                });
            }
            channel
        }
    };

    let sender_name = auth
        .user
        .display_name
        .clone()
        .unwrap_or_else(|| auth.user.name.clone());
    let stored = state
        .post_message(&channel, &auth.user.id, &sender_name, &req.content, None, None, 0)
        .api_err("Failed to send DM")?;

    Ok((StatusCode::CREATED, Json(json!({ "channel": channel, "message": stored }))))
}
