//! Feature request endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::dto::{CreateFeatureRequest, VoteRequest};
use super::response::{ApiError, StoreOptionExt, StoreResultExt};
use super::AppState;
use crate::auth::{AuthContext, RequireUser};
use crate::events::Event;
use crate::types::{FeatureRequest, FeatureVote};

#[derive(Debug, Deserialize)]
pub struct ListFeaturesParams {
    #[serde(default)]
    pub status: Option<String>,
}

fn feature_json(feature: &FeatureRequest, vote_count: i64) -> Value {
    let mut value = serde_json::to_value(feature).unwrap_or_default();
    value["vote_count"] = json!(vote_count);
    value
}

pub async fn list_features(
    _ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListFeaturesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let features = state
        .store
        .list_features(params.status.as_deref())
        .api_err("Failed to list features")?;
    let out: Vec<Value> = features
        .iter()
        .map(|(feature, votes)| feature_json(feature, *votes))
        .collect();
    Ok(Json(out))
}

pub async fn create_feature(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFeatureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }
    if req.description.trim().is_empty() {
        return Err(ApiError::bad_request("description is required"));
    }

    let feature = FeatureRequest {
        id: Uuid::new_v4().to_string(),
        title: req.title,
        description: req.description,
        status: "open".to_string(),
        reason: None,
        created_by: auth.user.id,
        created_at: Utc::now(),
        updated_at: None,
    };
    state.store.create_feature(&feature).api_err("Failed to create feature")?;
    state.ws.broadcast(&Event::feature_update(
        &auth.ctx.workspace_id,
        &feature,
        0,
        "created",
    ));
    Ok((StatusCode::CREATED, Json(feature_json(&feature, 0))))
}

pub async fn vote_feature(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.vote != 1 && req.vote != -1 {
        return Err(ApiError::bad_request("vote must be +1 or -1"));
    }
    let feature = state
        .store
        .get_feature(&id)
        .api_err("Failed to load feature")?
        .or_not_found("Feature not found")?;

    state
        .store
        .upsert_feature_vote(&FeatureVote {
            feature_id: feature.id.clone(),
            user_id: auth.user.id,
            vote: req.vote,
        })
        .api_err("Failed to vote")?;
    let vote_count = state
        .store
        .feature_vote_count(&feature.id)
        .api_err("Failed to count votes")?;
    state.ws.broadcast(&Event::feature_update(
        &auth.ctx.workspace_id,
        &feature,
        vote_count,
        "voted",
    ));
    Ok(Json(feature_json(&feature, vote_count)))
}
