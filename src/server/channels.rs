//! Channel CRUD, scoped to the authenticated workspace.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::dto::CreateChannelRequest;
use super::response::{ApiError, StoreOptionExt, StoreResultExt};
use super::validation::validate_channel_name;
use super::AppState;
use crate::auth::{AuthContext, RequireUser};
use crate::events::Event;
use crate::types::{Channel, ChannelMember, ChannelType};

/// Load a channel and enforce workspace isolation: a channel in another
/// workspace is reported as missing, never as forbidden.
pub(super) fn channel_in_workspace(
    state: &AppState,
    ctx: &AuthContext,
    channel_id: &str,
) -> Result<Channel, ApiError> {
    let channel = state
        .store
        .get_channel(channel_id)
        .api_err("Failed to load channel")?
        .or_not_found("Channel not found")?;
    if channel.workspace_id != ctx.workspace_id {
        return Err(ApiError::not_found("Channel not found"));
    }
    Ok(channel)
}

pub async fn list_channels(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let channels = state
        .store
        .list_channels(&ctx.workspace_id)
        .api_err("Failed to list channels")?;

    let mut out = Vec::with_capacity(channels.len());
    for channel in channels {
        let unread = match &ctx.user_id {
            Some(user_id) => state
                .store
                .unread_count(user_id, &channel.id)
                .unwrap_or_default(),
            None => 0,
        };
        let mut value = serde_json::to_value(&channel).unwrap_or_default();
        value["unread_count"] = json!(unread);
        out.push(value);
    }
    Ok(Json(out))
}

pub async fn create_channel(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_channel_name(&req.name)?;
    let name = if req.name.starts_with('#') {
        req.name.clone()
    } else {
        format!("#{}", req.name)
    };

    if state
        .store
        .get_channel_by_name(&auth.ctx.workspace_id, &name)
        .api_err("Failed to check channel")?
        .is_some()
    {
        return Err(ApiError::conflict("Channel already exists"));
    }

    let now = Utc::now();
    let channel = Channel {
        id: Uuid::new_v4().to_string(),
        name,
        channel_type: req.channel_type.unwrap_or(ChannelType::Custom),
        topic: req.topic,
        project_path: req.project_path,
        workspace_id: auth.ctx.workspace_id.clone(),
        created_by: auth.user.id.clone(),
        created_at: now,
        is_archived: false,
        archived_at: None,
    };
    state.store.create_channel(&channel).api_err("Failed to create channel")?;
    state
        .store
        .add_channel_member(&ChannelMember {
            channel_id: channel.id.clone(),
            user_id: auth.user.id,
            joined_at: now,
        })
        .api_err("Failed to join channel")?;
    state
        .ws
        .broadcast(&Event::channel_created(&channel.workspace_id, &channel));

    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn get_channel(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    Ok(Json(channel))
}

pub async fn archive_channel(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    state
        .store
        .archive_channel(&channel.id, Utc::now())
        .api_err("Failed to archive channel")?;
    Ok(Json(json!({ "status": "archived", "id": channel.id })))
}

/// Deleting is only possible while the channel is empty; anything with
/// history must be archived instead.
pub async fn delete_channel(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    state
        .store
        .delete_channel(&channel.id)
        .api_err("Failed to delete channel")?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn channel_analytics(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    let analytics = state
        .store
        .channel_analytics(&channel.id)
        .api_err("Failed to compute analytics")?;
    Ok(Json(analytics))
}

pub async fn mark_read(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &auth.ctx, &id)?;
    state
        .store
        .mark_read(&auth.user.id, &channel.id, Utc::now())
        .api_err("Failed to mark read")?;
    Ok(Json(json!({ "status": "read", "channel_id": channel.id })))
}
