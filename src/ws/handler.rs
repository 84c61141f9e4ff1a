//! The `/ws` endpoint: authenticate at upgrade, then shuttle frames.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{resolve_auth, AuthError};
use crate::events::Event;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Client → server control frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Ping,
    Subscribe { channel_ids: Vec<String> },
    Unsubscribe { channel_ids: Vec<String> },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    // `?token=` carries a browser session token; the Authorization header
    // carries an agent API key. The identity freezes into the client record.
    let ctx = resolve_auth(&state, query.token.as_deref(), bearer.as_deref(), Some(addr.ip()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, ctx.workspace_id, ctx.user_id)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    workspace_id: String,
    user_id: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = state.ws.accept(tx, workspace_id, user_id);

    tracing::debug!("ws client {} connected", client_id);

    // Single writer task per connection keeps delivery FIFO.
    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };

        if !state.ws.allow_frame(client_id) {
            state.ws.send_to(client_id, &Event::error("rate limit exceeded"));
            continue;
        }

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Ping) => {
                state.ws.send_to(client_id, &Event::pong());
            }
            Ok(ClientFrame::Subscribe { channel_ids }) => {
                state.ws.subscribe(client_id, &channel_ids);
                state.ws.send_to(client_id, &Event::subscribed(&channel_ids));
            }
            Ok(ClientFrame::Unsubscribe { channel_ids }) => {
                state.ws.unsubscribe(client_id, &channel_ids);
                state.ws.send_to(client_id, &Event::unsubscribed(&channel_ids));
            }
            Err(e) => {
                tracing::debug!("ws client {} sent invalid frame: {}", client_id, e);
                state.ws.send_to(client_id, &Event::error("invalid frame"));
            }
        }
    }

    state.ws.remove(client_id);
    send_task.abort();
    tracing::debug!("ws client {} disconnected", client_id);
}
