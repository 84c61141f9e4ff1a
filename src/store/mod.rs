mod schema;
pub mod seed;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;

/// Analytics summary for one channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelAnalytics {
    pub message_count: i64,
    pub member_count: i64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub top_senders: Vec<SenderCount>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SenderCount {
    pub sender_name: String,
    pub message_count: i64,
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    /// Create tables, apply pragmas-independent migrations, backfill the
    /// default workspace on databases that predate workspaces.
    fn initialize(&self) -> Result<()>;

    /// Cheap connectivity probe for the health endpoint.
    fn health_check(&self) -> Result<()>;

    // Workspace operations
    fn create_workspace(&self, workspace: &Workspace) -> Result<()>;
    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>>;
    fn get_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>>;
    fn list_workspaces(&self) -> Result<Vec<Workspace>>;
    fn list_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>>;

    // Workspace membership
    fn add_workspace_member(&self, member: &WorkspaceMember) -> Result<()>;
    fn get_workspace_member(&self, workspace_id: &str, user_id: &str)
        -> Result<Option<WorkspaceMember>>;
    fn list_workspace_members(&self, workspace_id: &str) -> Result<Vec<(WorkspaceMember, User)>>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    /// The (single) human member of a workspace, if one has onboarded.
    fn get_workspace_human(&self, workspace_id: &str) -> Result<Option<User>>;

    // Agent operations
    fn create_agent(&self, agent: &Agent) -> Result<()>;
    fn get_agent(&self, id: &str) -> Result<Option<Agent>>;
    fn get_agent_by_name(&self, agent_name: &str) -> Result<Option<Agent>>;
    fn list_agents(&self, workspace_id: &str) -> Result<Vec<Agent>>;
    fn list_all_agents(&self) -> Result<Vec<Agent>>;
    fn update_agent(&self, agent: &Agent) -> Result<()>;
    fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<()>;
    fn set_agent_credentials(
        &self,
        id: &str,
        server_url: Option<&str>,
        provider_session_id: Option<&str>,
    ) -> Result<()>;

    // Agent sessions (at most one active per agent)
    fn start_agent_session(&self, session: &AgentSession) -> Result<()>;
    fn latest_agent_session(&self, agent_id: &str) -> Result<Option<AgentSession>>;
    fn touch_agent_heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> Result<bool>;
    fn end_agent_sessions(&self, agent_id: &str, at: DateTime<Utc>) -> Result<()>;

    // Channel operations
    fn create_channel(&self, channel: &Channel) -> Result<()>;
    fn get_channel(&self, id: &str) -> Result<Option<Channel>>;
    fn get_channel_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<Channel>>;
    fn list_channels(&self, workspace_id: &str) -> Result<Vec<Channel>>;
    fn archive_channel(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    /// Fails with `Conflict` while the channel still holds messages.
    fn delete_channel(&self, id: &str) -> Result<bool>;
    fn channel_analytics(&self, id: &str) -> Result<ChannelAnalytics>;

    // Channel membership
    /// Returns false when the user was already a member.
    fn add_channel_member(&self, member: &ChannelMember) -> Result<bool>;

    // Message operations
    fn create_message(&self, message: &Message) -> Result<()>;
    fn get_message(&self, id: &str) -> Result<Option<Message>>;
    fn get_message_with_sender(&self, id: &str) -> Result<Option<MessageWithSender>>;
    /// Newest-first page; `before` is a message id cursor, tiebroken by
    /// insert order.
    fn list_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MessageWithSender>>;
    /// Last `limit` messages before `exclude_id`, oldest first, for
    /// invocation context.
    fn recent_context(
        &self,
        channel_id: &str,
        exclude_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageWithSender>>;
    /// Priority inbox for an agent: mentions first (newest first), then the
    /// project channel, then other joined channels.
    fn agent_inbox(&self, agent: &Agent, limit: i64) -> Result<Vec<MessageWithSender>>;
    fn edit_message(&self, id: &str, content: &str, at: DateTime<Utc>) -> Result<()>;
    fn delete_message(&self, id: &str) -> Result<bool>;
    /// Returns the new pinned state; pinning an already-pinned message is a
    /// no-op.
    fn set_message_pinned(
        &self,
        id: &str,
        pinned: bool,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    fn list_pinned_messages(&self, channel_id: &str) -> Result<Vec<MessageWithSender>>;
    /// Text + channel filters applied together; `%` and `_` in the query
    /// match literally.
    fn search_messages(
        &self,
        workspace_id: &str,
        query: &str,
        channel_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(MessageWithSender, String)>>;

    // Reactions: toggled, composite-keyed
    fn toggle_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool>;
    fn list_reactions(&self, message_id: &str) -> Result<Vec<MessageReaction>>;

    // Read receipts (monotonic per user+channel)
    fn mark_read(&self, user_id: &str, channel_id: &str, at: DateTime<Utc>) -> Result<()>;
    fn get_read_receipt(&self, user_id: &str, channel_id: &str) -> Result<Option<ReadReceipt>>;
    fn unread_count(&self, user_id: &str, channel_id: &str) -> Result<i64>;

    // Feature requests
    fn create_feature(&self, feature: &FeatureRequest) -> Result<()>;
    fn get_feature(&self, id: &str) -> Result<Option<FeatureRequest>>;
    fn list_features(&self, status: Option<&str>) -> Result<Vec<(FeatureRequest, i64)>>;
    fn upsert_feature_vote(&self, vote: &FeatureVote) -> Result<()>;
    fn feature_vote_count(&self, feature_id: &str) -> Result<i64>;

    // API keys
    fn create_api_key(&self, key: &WorkspaceApiKey) -> Result<()>;
    fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<WorkspaceApiKey>>;
    fn list_api_keys(&self, workspace_id: &str) -> Result<Vec<WorkspaceApiKey>>;
    fn revoke_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;
    fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    // Invites
    fn create_invite(&self, invite: &WorkspaceInvite) -> Result<()>;
    fn get_invite_by_token(&self, token: &str) -> Result<Option<WorkspaceInvite>>;
    fn list_invites(&self, workspace_id: &str) -> Result<Vec<WorkspaceInvite>>;
    fn revoke_invite(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;
    fn increment_invite_use(&self, id: &str) -> Result<()>;

    // Browser sessions
    fn create_user_session(&self, session: &UserSession) -> Result<()>;
    fn get_user_session_by_hash(&self, token_hash: &str) -> Result<Option<UserSession>>;
    fn revoke_user_session(&self, id: &str) -> Result<bool>;
    fn touch_user_session(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}
