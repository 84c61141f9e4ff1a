//! The `/mcp` endpoint: JSON-RPC 2.0 over HTTP, with per-client sessions.
//!
//! `initialize` allocates a session and returns its id in the
//! `mcp-session-id` header; every later request must echo it. Responses are
//! plain JSON, or a single SSE `message` event when the client asks for
//! `text/event-stream`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use super::protocol::*;
use super::session::McpSession;
use super::tools;
use crate::server::AppState;

pub async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.mcp.prune_idle();

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = JsonRpcResponse::error(Value::Null, -32700, &format!("Parse error: {e}"));
            return respond(&headers, None, response);
        }
    };

    // Notifications carry no id and get no body back.
    if request.id.is_none() {
        return StatusCode::ACCEPTED.into_response();
    }
    let id = request.id.clone().unwrap_or(Value::Null);

    if request.method == "initialize" {
        let session = state.mcp.create();
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            capabilities: json!({ "tools": {} }),
            server_info: ServerInfo {
                name: "talkto",
                version: env!("CARGO_PKG_VERSION"),
            },
        };
        let response = JsonRpcResponse::success(id, serde_json::to_value(result).unwrap());
        return respond(&headers, Some(&session.id), response);
    }

    let Some(session) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|id| state.mcp.get(id))
    else {
        let response =
            JsonRpcResponse::error(id, -32000, "Missing or unknown mcp-session-id; initialize first");
        return respond(&headers, None, response);
    };

    // Frames within one session are handled one at a time.
    let _frame_guard = session.frame_lock.lock().await;

    let response = handle_request(&state, &session, request, id).await;
    let session_id = session.id.clone();
    respond(&headers, Some(&session_id), response)
}

async fn handle_request(
    state: &Arc<AppState>,
    session: &McpSession,
    request: JsonRpcRequest,
    id: Value,
) -> JsonRpcResponse {
    match request.method.as_str() {
        "tools/list" => {
            let tools = tools::tool_definitions();
            JsonRpcResponse::success(id, json!({ "tools": tools }))
        }
        "tools/call" => {
            let params: ToolCallParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, &format!("Invalid params: {e}"));
                }
            };
            let result =
                tools::call_tool(state, session, &params.name, &params.arguments).await;
            JsonRpcResponse::success(id, tool_result(&result))
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        _ => JsonRpcResponse::error(id, -32601, "Method not found"),
    }
}

fn respond(headers: &HeaderMap, session_id: Option<&str>, response: JsonRpcResponse) -> Response {
    let wants_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    let payload = serde_json::to_string(&response).expect("response serializes");

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(session_id) = session_id {
        builder = builder.header(SESSION_HEADER, session_id);
    }

    if wants_sse {
        builder
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-store")
            .body(format!("event: message\ndata: {payload}\n\n").into())
            .unwrap()
    } else {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload.into())
            .unwrap()
    }
}
