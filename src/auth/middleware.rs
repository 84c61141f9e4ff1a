//! Request authentication.
//!
//! Every inbound request resolves to an [`AuthContext`] triple
//! `(user_id?, workspace_id, role)`. Three sources are consulted in order:
//! the `talkto_session` cookie, a `tk_`-prefixed bearer API key, and the
//! localhost bypass, which applies when the peer is loopback and the hub is
//! not in network mode, mapping to the default workspace's human operator.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use super::token::{constant_time_eq, hash_token};
use crate::server::AppState;
use crate::types::{Role, User, DEFAULT_WORKSPACE_ID};

pub const SESSION_COOKIE: &str = "talkto_session";

/// The resolved principal of a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Absent for API-key principals and for the localhost bypass before
    /// onboarding.
    pub user_id: Option<String>,
    pub workspace_id: String,
    pub role: Role,
}

impl AuthContext {
    pub fn require_same_workspace(&self, workspace_id: &str) -> Result<(), AuthError> {
        if self.workspace_id == workspace_id {
            Ok(())
        } else {
            // Cross-workspace resources are indistinguishable from missing.
            Err(AuthError::NotFound)
        }
    }
}

/// Guard: a resolved human or agent user.
pub struct RequireUser {
    pub ctx: AuthContext,
    pub user: User,
}

/// Guard: admin role.
pub struct RequireAdmin(pub AuthContext);

#[derive(Debug)]
pub enum AuthError {
    Unauthenticated,
    Forbidden,
    NotFound,
    NoUser,
    Internal,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            AuthError::NoUser => (StatusCode::UNAUTHORIZED, "No user onboarded"),
            AuthError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    let header = parts.headers.get(COOKIE)?.to_str().ok()?;
    for pair in header.split(';') {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name {
            return Some(value.to_string());
        }
    }
    None
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn peer_ip(parts: &Parts) -> Option<IpAddr> {
    parts
        .extensions
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip())
}

/// Shared resolution used by the HTTP extractor and the WebSocket upgrade.
pub fn resolve_auth(
    state: &AppState,
    session_token: Option<&str>,
    bearer: Option<&str>,
    peer: Option<IpAddr>,
) -> Result<AuthContext, AuthError> {
    let now = Utc::now();

    // 1. Browser session cookie.
    if let Some(token) = session_token {
        let hash = hash_token(token);
        if let Some(session) = state
            .store
            .get_user_session_by_hash(&hash)
            .map_err(|_| AuthError::Internal)?
        {
            if constant_time_eq(&session.token_hash, &hash) && session.is_valid(now) {
                if let Err(e) = state.store.touch_user_session(&session.id, now) {
                    tracing::warn!("Failed to touch session last_active_at: {e}");
                }
                let role = state
                    .store
                    .get_workspace_member(&session.workspace_id, &session.user_id)
                    .map_err(|_| AuthError::Internal)?
                    .map_or(Role::Member, |m| m.role);
                return Ok(AuthContext {
                    user_id: Some(session.user_id),
                    workspace_id: session.workspace_id,
                    role,
                });
            }
        }
    }

    // 2. Workspace API key. Only `tk_` tokens are keys; anything else in
    //    the Authorization header falls through to the next source.
    if let Some(token) = bearer.filter(|t| t.starts_with("tk_")) {
        let hash = hash_token(token);
        if let Some(key) = state
            .store
            .get_api_key_by_hash(&hash)
            .map_err(|_| AuthError::Internal)?
        {
            if constant_time_eq(&key.key_hash, &hash) && key.is_valid(now) {
                if let Err(e) = state.store.touch_api_key(&key.id, now) {
                    tracing::warn!("Failed to touch api key last_used_at: {e}");
                }
                return Ok(AuthContext {
                    user_id: None,
                    workspace_id: key.workspace_id,
                    role: Role::Admin,
                });
            }
        }
        return Err(AuthError::Unauthenticated);
    }

    // 3. Localhost bypass, unless the hub is exposed to the LAN.
    if !state.config.network && peer.is_some_and(|ip| ip.is_loopback()) {
        let human = state
            .store
            .get_workspace_human(DEFAULT_WORKSPACE_ID)
            .map_err(|_| AuthError::Internal)?;
        return Ok(AuthContext {
            user_id: human.map(|u| u.id),
            workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
            role: Role::Admin,
        });
    }

    Err(AuthError::Unauthenticated)
}

impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = cookie_value(parts, SESSION_COOKIE);
        let bearer = bearer_token(parts);
        resolve_auth(state, session.as_deref(), bearer.as_deref(), peer_ip(parts))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let ctx = AuthContext::from_request_parts(parts, state).await?;
        let user_id = ctx.user_id.clone().ok_or(AuthError::NoUser)?;
        let user = state
            .store
            .get_user(&user_id)
            .map_err(|_| AuthError::Internal)?
            .ok_or(AuthError::NoUser)?;
        Ok(RequireUser { ctx, user })
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let ctx = AuthContext::from_request_parts(parts, state).await?;
        if ctx.role != Role::Admin {
            return Err(AuthError::Forbidden);
        }
        Ok(RequireAdmin(ctx))
    }
}
