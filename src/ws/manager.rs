//! WebSocket subscription manager: workspace-scoped broadcast with
//! channel-targeted filtering and per-client rate limiting.
//!
//! Delivery to one client is FIFO: each connection owns an unbounded
//! channel drained by a single writer task, so events arrive in
//! `broadcast()` call order. A send failure marks the client dead; dead
//! clients are dropped at the end of the broadcast iteration.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::events::Event;

/// Sliding-window limit on inbound control frames.
const RATE_LIMIT_FRAMES: usize = 30;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

struct Client {
    tx: mpsc::UnboundedSender<String>,
    workspace_id: String,
    #[allow(dead_code)]
    user_id: Option<String>,
    /// Empty set = subscribed to everything in the workspace.
    subscribed: HashSet<String>,
    rate_window: VecDeque<Instant>,
}

#[derive(Default)]
pub struct WsManager {
    clients: Mutex<HashMap<u64, Client>>,
    next_id: AtomicU64,
}

impl WsManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the resolved identity is frozen in for its
    /// lifetime.
    pub fn accept(
        &self,
        tx: mpsc::UnboundedSender<String>,
        workspace_id: String,
        user_id: Option<String>,
    ) -> u64 {
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().unwrap().insert(
            client_id,
            Client {
                tx,
                workspace_id,
                user_id,
                subscribed: HashSet::new(),
                rate_window: VecDeque::new(),
            },
        );
        client_id
    }

    pub fn remove(&self, client_id: u64) {
        self.clients.lock().unwrap().remove(&client_id);
    }

    pub fn subscribe(&self, client_id: u64, channel_ids: &[String]) {
        if let Some(client) = self.clients.lock().unwrap().get_mut(&client_id) {
            client.subscribed.extend(channel_ids.iter().cloned());
        }
    }

    pub fn unsubscribe(&self, client_id: u64, channel_ids: &[String]) {
        if let Some(client) = self.clients.lock().unwrap().get_mut(&client_id) {
            for id in channel_ids {
                client.subscribed.remove(id);
            }
        }
    }

    /// Check the sliding window for one inbound frame. Returns false when
    /// the frame must be dropped.
    pub fn allow_frame(&self, client_id: u64) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let Some(client) = clients.get_mut(&client_id) else {
            return false;
        };
        let now = Instant::now();
        while client
            .rate_window
            .front()
            .is_some_and(|t| now.duration_since(*t) > RATE_LIMIT_WINDOW)
        {
            client.rate_window.pop_front();
        }
        if client.rate_window.len() >= RATE_LIMIT_FRAMES {
            return false;
        }
        client.rate_window.push_back(now);
        true
    }

    /// Send directly to one client (acks, rate-limit errors).
    pub fn send_to(&self, client_id: u64, event: &Event) {
        let payload = serde_json::to_string(event).expect("event serializes");
        let mut clients = self.clients.lock().unwrap();
        let dead = clients
            .get(&client_id)
            .is_some_and(|client| client.tx.send(payload).is_err());
        if dead {
            clients.remove(&client_id);
        }
    }

    /// Fan an event out to every client in its workspace (or all clients
    /// when the event is unscoped). `new_message` events additionally
    /// respect channel subscriptions.
    pub fn broadcast(&self, event: &Event) {
        let payload = serde_json::to_string(event).expect("event serializes");
        let mut clients = self.clients.lock().unwrap();
        let mut dead = Vec::new();

        for (client_id, client) in clients.iter() {
            if let Some(workspace_id) = &event.workspace_id {
                if &client.workspace_id != workspace_id {
                    continue;
                }
            }
            if event.kind == "new_message" {
                if let Some(channel_id) = &event.channel_id {
                    if !client.subscribed.is_empty() && !client.subscribed.contains(channel_id) {
                        continue;
                    }
                }
            }
            if client.tx.send(payload.clone()).is_err() {
                dead.push(*client_id);
            }
        }

        for client_id in dead {
            clients.remove(&client_id);
        }
    }

    /// Narrow echo to subscribers of one channel.
    pub fn broadcast_to_channel(&self, channel_id: &str, event: &Event, exclude: Option<u64>) {
        let payload = serde_json::to_string(event).expect("event serializes");
        let mut clients = self.clients.lock().unwrap();
        let mut dead = Vec::new();

        for (client_id, client) in clients.iter() {
            if Some(*client_id) == exclude {
                continue;
            }
            if let Some(workspace_id) = &event.workspace_id {
                if &client.workspace_id != workspace_id {
                    continue;
                }
            }
            if !client.subscribed.is_empty() && !client.subscribed.contains(channel_id) {
                continue;
            }
            if client.tx.send(payload.clone()).is_err() {
                dead.push(*client_id);
            }
        }

        for client_id in dead {
            clients.remove(&client_id);
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}
