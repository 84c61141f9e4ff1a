//! Message endpoints: history, posting (which may invoke agents), edits,
//! pins, and reactions.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use super::channels::channel_in_workspace;
use super::dto::{
    CreateMessageRequest, EditMessageRequest, ListMessagesParams, PinRequest, ReactRequest,
};
use super::response::{ApiError, StoreOptionExt, StoreResultExt};
use super::validation::validate_message_content;
use super::AppState;
use crate::auth::{AuthContext, RequireUser};
use crate::events::Event;
use crate::types::Message;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 100;

fn message_in_channel(
    state: &AppState,
    channel_id: &str,
    message_id: &str,
) -> Result<Message, ApiError> {
    let message = state
        .store
        .get_message(message_id)
        .api_err("Failed to load message")?
        .or_not_found("Message not found")?;
    if message.channel_id != channel_id {
        return Err(ApiError::not_found("Message not found"));
    }
    Ok(message)
}

pub async fn list_messages(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ListMessagesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let messages = state
        .store
        .list_messages(&channel.id, params.before.as_deref(), limit)
        .api_err("Failed to list messages")?;
    Ok(Json(messages))
}

pub async fn create_message(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &auth.ctx, &id)?;
    validate_message_content(&req.content)?;
    if channel.is_archived {
        return Err(ApiError::conflict("Channel is archived"));
    }

    if let Some(parent_id) = &req.parent_id {
        message_in_channel(&state, &channel.id, parent_id)?;
    }

    let sender_name = auth
        .user
        .display_name
        .clone()
        .unwrap_or_else(|| auth.user.name.clone());
    let stored = state
        .post_message(
            &channel,
            &auth.user.id,
            &sender_name,
            &req.content,
            req.mentions,
            req.parent_id,
            0,
        )
        .api_err("Failed to create message")?;

    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn edit_message(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &auth.ctx, &id)?;
    validate_message_content(&req.content)?;
    let message = message_in_channel(&state, &channel.id, &mid)?;
    if message.sender_id != auth.user.id {
        return Err(ApiError::forbidden("Only the author can edit a message"));
    }

    state
        .store
        .edit_message(&message.id, &req.content, Utc::now())
        .api_err("Failed to edit message")?;
    let updated = state
        .store
        .get_message_with_sender(&message.id)
        .api_err("Failed to reload message")?
        .or_not_found("Message not found")?;
    state
        .ws
        .broadcast(&Event::message_edited(&channel.workspace_id, &updated));
    Ok(Json(updated))
}

pub async fn delete_message(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &auth.ctx, &id)?;
    let message = message_in_channel(&state, &channel.id, &mid)?;
    if message.sender_id != auth.user.id && auth.ctx.role != crate::types::Role::Admin {
        return Err(ApiError::forbidden("Only the author or an admin can delete a message"));
    }

    state
        .store
        .delete_message(&message.id)
        .api_err("Failed to delete message")?;
    state.ws.broadcast(&Event::message_deleted(
        &channel.workspace_id,
        &channel.id,
        &message.id,
    ));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pin_message(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
    body: Option<Json<PinRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &auth.ctx, &id)?;
    let message = message_in_channel(&state, &channel.id, &mid)?;
    let pinned = body.map_or(true, |Json(req)| req.pinned);

    state
        .store
        .set_message_pinned(&message.id, pinned, &auth.user.id, Utc::now())
        .api_err("Failed to update pin")?;
    Ok(Json(json!({ "id": message.id, "is_pinned": pinned })))
}

pub async fn list_pinned(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    let pinned = state
        .store
        .list_pinned_messages(&channel.id)
        .api_err("Failed to list pinned messages")?;
    Ok(Json(pinned))
}

pub async fn react_message(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
    Json(req): Json<ReactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &auth.ctx, &id)?;
    let message = message_in_channel(&state, &channel.id, &mid)?;
    if req.emoji.trim().is_empty() {
        return Err(ApiError::bad_request("emoji is required"));
    }

    let added = state
        .store
        .toggle_reaction(&message.id, &auth.user.id, &req.emoji)
        .api_err("Failed to toggle reaction")?;
    state.ws.broadcast(&Event::reaction(
        &channel.workspace_id,
        &message.id,
        &channel.id,
        &auth.user.id,
        &req.emoji,
        added,
    ));
    Ok(Json(json!({
        "message_id": message.id,
        "emoji": req.emoji,
        "added": added,
    })))
}

pub async fn list_reactions(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Path((id, mid)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel_in_workspace(&state, &ctx, &id)?;
    let message = message_in_channel(&state, &channel.id, &mid)?;
    let reactions = state
        .store
        .list_reactions(&message.id)
        .api_err("Failed to list reactions")?;
    Ok(Json(reactions))
}
