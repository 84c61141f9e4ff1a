//! Workspace-scoped message search. The text filter and the channel
//! filter apply together, and `%`/`_` in the query match literally.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use super::dto::SearchParams;
use super::response::{ApiError, StoreResultExt};
use super::AppState;
use crate::auth::AuthContext;

const SEARCH_LIMIT: i64 = 50;

pub async fn search(
    ctx: AuthContext,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.q.is_empty() {
        return Err(ApiError::bad_request("q is required"));
    }

    let hits = state
        .store
        .search_messages(
            &ctx.workspace_id,
            &params.q,
            params.channel.as_deref(),
            SEARCH_LIMIT,
        )
        .api_err("Search failed")?;

    let out: Vec<Value> = hits
        .iter()
        .map(|(message, channel_name)| {
            let mut value = serde_json::to_value(message).unwrap_or_default();
            value["channel_name"] = json!(channel_name);
            value
        })
        .collect();
    Ok(Json(out))
}
