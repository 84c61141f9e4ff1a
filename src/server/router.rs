use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::events::Event;
use crate::invoke::InvocationEngine;
use crate::liveness::GhostCache;
use crate::mcp::{mcp_handler, McpSessionRegistry};
use crate::prompts::PromptEngine;
use crate::store::Store;
use crate::types::{Channel, Message, MessageWithSender};
use crate::ws::{ws_handler, WsManager};

use super::{agents, channels, features, messages, search, users, workspaces};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub ws: Arc<WsManager>,
    pub mcp: Arc<McpSessionRegistry>,
    pub invoker: Arc<InvocationEngine>,
    pub ghosts: Arc<GhostCache>,
    pub prompts: Arc<PromptEngine>,
}

impl AppState {
    /// Store a message, broadcast it (strictly after the row is committed),
    /// and schedule agent invocation for DM targets and mentions.
    pub fn post_message(
        self: &Arc<Self>,
        channel: &Channel,
        sender_id: &str,
        sender_name: &str,
        content: &str,
        mentions: Option<Vec<String>>,
        parent_id: Option<String>,
        depth: u8,
    ) -> Result<MessageWithSender> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel.id.clone(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            mentions,
            parent_id,
            is_pinned: false,
            pinned_at: None,
            pinned_by: None,
            edited_at: None,
            created_at: Utc::now(),
        };
        self.store.create_message(&message)?;

        let stored = MessageWithSender {
            message,
            sender_name: sender_name.to_string(),
        };
        self.ws
            .broadcast(&Event::new_message(&channel.workspace_id, &stored));
        self.invoker.dispatch_for_message(&stored, channel, depth);

        Ok(stored)
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(users::health))
        .route("/users/onboard", post(users::onboard))
        .route(
            "/users/me",
            get(users::get_me).patch(users::update_me).delete(users::delete_me),
        )
        .route("/auth/me", get(users::auth_me))
        .route("/auth/logout", post(users::logout))
        .route("/channels", get(channels::list_channels).post(channels::create_channel))
        .route("/channels/{id}", get(channels::get_channel).delete(channels::delete_channel))
        .route("/channels/{id}/archive", post(channels::archive_channel))
        .route("/channels/{id}/analytics", get(channels::channel_analytics))
        .route("/channels/{id}/read", post(channels::mark_read))
        .route(
            "/channels/{id}/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route("/channels/{id}/messages/pinned", get(messages::list_pinned))
        .route(
            "/channels/{id}/messages/{mid}",
            axum::routing::patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/channels/{id}/messages/{mid}/pin", post(messages::pin_message))
        .route("/channels/{id}/messages/{mid}/react", post(messages::react_message))
        .route("/channels/{id}/messages/{mid}/reactions", get(messages::list_reactions))
        .route("/agents", get(agents::list_agents))
        .route("/agents/{name}", get(agents::get_agent))
        .route("/agents/{name}/dm", post(agents::dm_agent))
        .route("/features", get(features::list_features).post(features::create_feature))
        .route("/features/{id}/vote", post(features::vote_feature))
        .route("/search", get(search::search))
        .route(
            "/workspaces",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route("/workspaces/{id}/members", get(workspaces::list_members))
        .route(
            "/workspaces/{id}/keys",
            get(workspaces::list_keys).post(workspaces::create_key),
        )
        .route("/workspaces/{id}/keys/{key_id}", delete(workspaces::revoke_key))
        .route(
            "/workspaces/{id}/invites",
            get(workspaces::list_invites).post(workspaces::create_invite),
        )
        .route("/workspaces/{id}/invites/{invite_id}", delete(workspaces::revoke_invite))
        .route("/join/{token}", post(workspaces::join));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .route("/mcp", post(mcp_handler))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
