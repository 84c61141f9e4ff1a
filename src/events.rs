//! WebSocket event construction.
//!
//! Every event serializes as `{"type": ..., "data": ...}`. Routing metadata
//! (workspace, channel) rides along unserialized so the fan-out layer can
//! scope delivery without re-parsing the payload.

use serde::Serialize;
use serde_json::{json, Value};

use crate::types::{Channel, FeatureRequest, MessageWithSender};

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Value,
    /// Workspace the source row belongs to; `None` only for per-connection
    /// acks (pong, subscribed, error) that are never broadcast.
    #[serde(skip)]
    pub workspace_id: Option<String>,
    /// Set for `new_message` so subscription filtering can apply.
    #[serde(skip)]
    pub channel_id: Option<String>,
}

impl Event {
    fn scoped(kind: &'static str, workspace_id: &str, data: Value) -> Self {
        Self {
            kind,
            data,
            workspace_id: Some(workspace_id.to_string()),
            channel_id: None,
        }
    }

    fn local(kind: &'static str, data: Value) -> Self {
        Self {
            kind,
            data,
            workspace_id: None,
            channel_id: None,
        }
    }

    pub fn new_message(workspace_id: &str, msg: &MessageWithSender) -> Self {
        let mut event = Self::scoped(
            "new_message",
            workspace_id,
            json!({
                "id": msg.message.id,
                "channel_id": msg.message.channel_id,
                "sender_id": msg.message.sender_id,
                "sender_name": msg.sender_name,
                "content": msg.message.content,
                "mentions": msg.message.mentions.clone().unwrap_or_default(),
                "parent_id": msg.message.parent_id,
                "created_at": msg.message.created_at.to_rfc3339(),
            }),
        );
        event.channel_id = Some(msg.message.channel_id.clone());
        event
    }

    pub fn message_edited(workspace_id: &str, msg: &MessageWithSender) -> Self {
        Self::scoped(
            "message_edited",
            workspace_id,
            json!({
                "id": msg.message.id,
                "channel_id": msg.message.channel_id,
                "content": msg.message.content,
                "edited_at": msg.message.edited_at.map(|t| t.to_rfc3339()),
            }),
        )
    }

    pub fn message_deleted(workspace_id: &str, channel_id: &str, message_id: &str) -> Self {
        Self::scoped(
            "message_deleted",
            workspace_id,
            json!({ "id": message_id, "channel_id": channel_id }),
        )
    }

    pub fn reaction(
        workspace_id: &str,
        message_id: &str,
        channel_id: &str,
        user_id: &str,
        emoji: &str,
        added: bool,
    ) -> Self {
        Self::scoped(
            "reaction",
            workspace_id,
            json!({
                "message_id": message_id,
                "channel_id": channel_id,
                "user_id": user_id,
                "emoji": emoji,
                "added": added,
            }),
        )
    }

    pub fn agent_status(
        workspace_id: &str,
        agent_name: &str,
        status: &str,
        agent_type: &str,
        project_name: &str,
    ) -> Self {
        Self::scoped(
            "agent_status",
            workspace_id,
            json!({
                "agent_name": agent_name,
                "status": status,
                "agent_type": agent_type,
                "project_name": project_name,
            }),
        )
    }

    pub fn agent_typing(
        workspace_id: &str,
        agent_name: &str,
        channel_id: &str,
        is_typing: bool,
        error: Option<&str>,
    ) -> Self {
        let mut data = json!({
            "agent_name": agent_name,
            "channel_id": channel_id,
            "is_typing": is_typing,
        });
        if let Some(err) = error {
            data["error"] = json!(err);
        }
        Self::scoped("agent_typing", workspace_id, data)
    }

    pub fn agent_streaming(
        workspace_id: &str,
        agent_name: &str,
        channel_id: &str,
        chunk: &str,
    ) -> Self {
        Self::scoped(
            "agent_streaming",
            workspace_id,
            json!({
                "agent_name": agent_name,
                "channel_id": channel_id,
                "chunk": chunk,
            }),
        )
    }

    pub fn channel_created(workspace_id: &str, channel: &Channel) -> Self {
        Self::scoped(
            "channel_created",
            workspace_id,
            json!({
                "id": channel.id,
                "name": channel.name,
                "type": channel.channel_type.as_str(),
                "project_path": channel.project_path,
            }),
        )
    }

    pub fn feature_update(
        workspace_id: &str,
        feature: &FeatureRequest,
        vote_count: i64,
        update_type: &str,
    ) -> Self {
        Self::scoped(
            "feature_update",
            workspace_id,
            json!({
                "id": feature.id,
                "title": feature.title,
                "status": feature.status,
                "vote_count": vote_count,
                "update_type": update_type,
            }),
        )
    }

    pub fn subscribed(channel_ids: &[String]) -> Self {
        Self::local("subscribed", json!({ "channel_ids": channel_ids }))
    }

    pub fn unsubscribed(channel_ids: &[String]) -> Self {
        Self::local("unsubscribed", json!({ "channel_ids": channel_ids }))
    }

    pub fn pong() -> Self {
        Self::local("pong", json!({}))
    }

    pub fn error(message: &str) -> Self {
        Self::local("error", json!({ "message": message }))
    }
}
