//! Workspace administration: membership, API keys, invites, and invite
//! acceptance.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::dto::{
    CreateApiKeyRequest, CreateApiKeyResponse, CreateInviteRequest, CreateWorkspaceRequest,
    JoinRequest,
};
use super::response::{ApiError, StoreOptionExt, StoreResultExt};
use super::users::issue_session;
use super::validation::validate_user_name;
use super::AppState;
use crate::auth::{generate_token, key_prefix, AuthContext, RequireAdmin, TokenKind};
use crate::types::{
    Role, User, UserType, Workspace, WorkspaceApiKey, WorkspaceInvite, WorkspaceMember,
    WorkspaceType,
};

fn workspace_for_admin(
    state: &AppState,
    admin: &RequireAdmin,
    workspace_id: &str,
) -> Result<Workspace, ApiError> {
    let workspace = state
        .store
        .get_workspace(workspace_id)
        .api_err("Failed to load workspace")?
        .or_not_found("Workspace not found")?;
    admin
        .0
        .require_same_workspace(&workspace.id)
        .map_err(|_| ApiError::not_found("Workspace not found"))?;
    Ok(workspace)
}

pub async fn list_workspaces(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let workspaces = match &ctx.user_id {
        Some(user_id) if ctx.role != Role::Admin => state
            .store
            .list_workspaces_for_user(user_id)
            .api_err("Failed to list workspaces")?,
        _ => state.store.list_workspaces().api_err("Failed to list workspaces")?,
    };
    Ok(Json(workspaces))
}

pub async fn create_workspace(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.slug.trim().is_empty() || req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name and slug are required"));
    }
    if state
        .store
        .get_workspace_by_slug(&req.slug)
        .api_err("Failed to check slug")?
        .is_some()
    {
        return Err(ApiError::conflict("Workspace slug already exists"));
    }

    let now = Utc::now();
    let created_by = admin.0.user_id.clone().unwrap_or_else(|| "system".to_string());
    let workspace = Workspace {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        slug: req.slug,
        workspace_type: req.workspace_type.unwrap_or(WorkspaceType::Shared),
        description: req.description,
        onboarding_prompt: None,
        human_welcome: None,
        created_by: created_by.clone(),
        created_at: now,
    };
    state
        .store
        .create_workspace(&workspace)
        .api_err("Failed to create workspace")?;

    if let Some(user_id) = &admin.0.user_id {
        state
            .store
            .add_workspace_member(&WorkspaceMember {
                workspace_id: workspace.id.clone(),
                user_id: user_id.clone(),
                role: Role::Admin,
                joined_at: now,
            })
            .api_err("Failed to add creator as member")?;
    }

    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn list_members(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for_admin(&state, &admin, &id)?;
    let members = state
        .store
        .list_workspace_members(&workspace.id)
        .api_err("Failed to list members")?;
    let out: Vec<_> = members
        .into_iter()
        .map(|(member, user)| {
            json!({
                "user": user,
                "role": member.role,
                "joined_at": member.joined_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(out))
}

pub async fn list_keys(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for_admin(&state, &admin, &id)?;
    let keys = state
        .store
        .list_api_keys(&workspace.id)
        .api_err("Failed to list keys")?;
    Ok(Json(keys))
}

pub async fn create_key(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for_admin(&state, &admin, &id)?;

    let (raw, hash) = generate_token(TokenKind::ApiKey);
    let now = Utc::now();
    let key = WorkspaceApiKey {
        id: Uuid::new_v4().to_string(),
        workspace_id: workspace.id,
        key_hash: hash,
        key_prefix: key_prefix(&raw),
        name: req.name,
        created_by: admin.0.user_id.clone().unwrap_or_else(|| "system".to_string()),
        created_at: now,
        expires_at: req.expires_in_days.map(|days| now + Duration::days(days)),
        revoked_at: None,
        last_used_at: None,
    };
    state.store.create_api_key(&key).api_err("Failed to create key")?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            key: raw,
            key_prefix: key.key_prefix,
            id: key.id,
        }),
    ))
}

pub async fn revoke_key(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, key_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    workspace_for_admin(&state, &admin, &id)?;
    let revoked = state
        .store
        .revoke_api_key(&key_id, Utc::now())
        .api_err("Failed to revoke key")?;
    if !revoked {
        return Err(ApiError::not_found("Key not found or already revoked"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_invites(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for_admin(&state, &admin, &id)?;
    let invites = state
        .store
        .list_invites(&workspace.id)
        .api_err("Failed to list invites")?;
    Ok(Json(invites))
}

pub async fn create_invite(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for_admin(&state, &admin, &id)?;

    // Invite tokens are bearer secrets of the same grade as sessions.
    let (token, _) = generate_token(TokenKind::Session);
    let now = Utc::now();
    let invite = WorkspaceInvite {
        id: Uuid::new_v4().to_string(),
        workspace_id: workspace.id,
        token: token.clone(),
        role: req.role.unwrap_or(Role::Member),
        max_uses: req.max_uses,
        use_count: 0,
        expires_at: req.expires_in_days.map(|days| now + Duration::days(days)),
        created_at: now,
        revoked_at: None,
    };
    state.store.create_invite(&invite).api_err("Failed to create invite")?;

    let join_url = format!("{}/api/join/{}", state.config.base_url(), token);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": invite.id,
            "token": token,
            "join_url": join_url,
            "role": invite.role,
            "expires_at": invite.expires_at.map(|t| t.to_rfc3339()),
        })),
    ))
}

pub async fn revoke_invite(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, invite_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    workspace_for_admin(&state, &admin, &id)?;
    let revoked = state
        .store
        .revoke_invite(&invite_id, Utc::now())
        .api_err("Failed to revoke invite")?;
    if !revoked {
        return Err(ApiError::not_found("Invite not found or already revoked"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Invite acceptance: creates the user, adds membership, and opens a
/// browser session. Unauthenticated; the invite token is the credential.
pub async fn join(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<Response, ApiError> {
    validate_user_name(&req.name)?;
    let invite = state
        .store
        .get_invite_by_token(&token)
        .api_err("Failed to look up invite")?
        .or_not_found("Invite not found")?;
    if !invite.is_usable(Utc::now()) {
        return Err(ApiError::not_found("Invite not found"));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        user_type: UserType::Human,
        display_name: req.display_name,
        about: None,
        agent_instructions: None,
        email: req.email,
        avatar_url: None,
        created_at: now,
    };
    state.store.create_user(&user).api_err("Failed to create user")?;
    state
        .store
        .add_workspace_member(&WorkspaceMember {
            workspace_id: invite.workspace_id.clone(),
            user_id: user.id.clone(),
            role: invite.role,
            joined_at: now,
        })
        .api_err("Failed to add member")?;
    state
        .store
        .increment_invite_use(&invite.id)
        .api_err("Failed to record invite use")?;

    let session_token = issue_session(&state, &user.id, &invite.workspace_id)?;
    Ok((
        StatusCode::CREATED,
        [(
            header::SET_COOKIE,
            format!(
                "{}={}; HttpOnly; SameSite=Strict; Path=/",
                crate::auth::SESSION_COOKIE,
                session_token
            ),
        )],
        Json(json!({ "user": user, "workspace_id": invite.workspace_id })),
    )
        .into_response())
}
