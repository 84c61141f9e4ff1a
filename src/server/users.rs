//! Onboarding, profile, auth introspection, and the health endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::dto::OnboardRequest;
use super::response::{ApiError, StoreOptionExt, StoreResultExt};
use super::validation::validate_user_name;
use super::AppState;
use crate::auth::{generate_token, hash_token, AuthContext, RequireUser, TokenKind, SESSION_COOKIE};
use crate::types::{Role, User, UserSession, UserType, WorkspaceMember, DEFAULT_WORKSPACE_ID};

/// Browser sessions live this long before re-onboarding is required.
const SESSION_TTL_DAYS: i64 = 30;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.store.health_check() {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!("health check: database connectivity failed: {e}");
            "error"
        }
    };
    Json(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "database": database,
        "ws_clients": state.ws.active_count(),
    }))
}

fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/")
}

pub(super) fn issue_session(
    state: &AppState,
    user_id: &str,
    workspace_id: &str,
) -> Result<String, ApiError> {
    let (raw, hash) = generate_token(TokenKind::Session);
    let now = Utc::now();
    state
        .store
        .create_user_session(&UserSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash: hash,
            workspace_id: workspace_id.to_string(),
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
            last_active_at: None,
        })
        .api_err("Failed to create session")?;
    Ok(raw)
}

/// First-human bootstrap. Re-onboarding updates the existing profile in
/// place. Public: this is how the first principal comes to exist.
pub async fn onboard(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OnboardRequest>,
) -> Result<Response, ApiError> {
    validate_user_name(&req.name)?;

    let existing = state
        .store
        .get_workspace_human(DEFAULT_WORKSPACE_ID)
        .api_err("Failed to check for existing user")?;

    if let Some(mut user) = existing {
        user.name = req.name;
        user.display_name = req.display_name;
        user.about = req.about;
        user.agent_instructions = req.agent_instructions;
        user.email = req.email;
        state.store.update_user(&user).api_err("Failed to update user")?;
        return Ok(Json(user).into_response());
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        user_type: UserType::Human,
        display_name: req.display_name,
        about: req.about,
        agent_instructions: req.agent_instructions,
        email: req.email,
        avatar_url: None,
        created_at: now,
    };
    state.store.create_user(&user).api_err("Failed to create user")?;
    state
        .store
        .add_workspace_member(&WorkspaceMember {
            workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
            user_id: user.id.clone(),
            role: Role::Admin,
            joined_at: now,
        })
        .api_err("Failed to add workspace member")?;

    let token = issue_session(&state, &user.id, DEFAULT_WORKSPACE_ID)?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&token))],
        Json(user),
    )
        .into_response())
}

pub async fn get_me(auth: RequireUser) -> impl IntoResponse {
    Json(auth.user)
}

pub async fn update_me(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OnboardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_user_name(&req.name)?;
    let mut user = auth.user;
    user.name = req.name;
    user.display_name = req.display_name;
    user.about = req.about;
    user.agent_instructions = req.agent_instructions;
    user.email = req.email;
    state.store.update_user(&user).api_err("Failed to update user")?;
    Ok(Json(user))
}

pub async fn delete_me(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .delete_user(&auth.user.id)
        .api_err("Failed to delete user")?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn auth_me(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match &ctx.user_id {
        Some(id) => state.store.get_user(id).api_err("Failed to load user")?,
        None => None,
    };
    let workspace = state
        .store
        .get_workspace(&ctx.workspace_id)
        .api_err("Failed to load workspace")?
        .or_not_found("Workspace not found")?;
    Ok(Json(json!({
        "user": user,
        "workspace": workspace,
        "role": ctx.role,
    })))
}

pub async fn logout(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Response, ApiError> {
    let _ = ctx;
    // Revoke the presented session, if any.
    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|h| h.to_str().ok()) {
        for pair in cookie_header.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == SESSION_COOKIE {
                    if let Some(session) = state
                        .store
                        .get_user_session_by_hash(&hash_token(value))
                        .api_err("Failed to look up session")?
                    {
                        state
                            .store
                            .revoke_user_session(&session.id)
                            .api_err("Failed to revoke session")?;
                    }
                }
            }
        }
    }
    Ok((
        [(
            header::SET_COOKIE,
            format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0"),
        )],
        Json(json!({ "status": "logged_out" })),
    )
        .into_response())
}
