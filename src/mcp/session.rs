//! Per-client MCP sessions.
//!
//! Each `initialize` allocates a fresh session object whose state,
//! most importantly the `registered-agent` binding, is private to that
//! session. A shared singleton tool server breaks as soon as a second
//! client connects, so every session gets its own instance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Sessions idle longer than this are pruned opportunistically.
const IDLE_WINDOW: Duration = Duration::from_secs(30 * 60);

pub struct McpSession {
    pub id: String,
    /// Set by the `register` tool; consumed by every tool acting on behalf
    /// of an agent.
    registered_agent_id: Mutex<Option<String>>,
    last_seen: Mutex<Instant>,
    /// Frames within one session are processed sequentially.
    pub frame_lock: tokio::sync::Mutex<()>,
}

impl McpSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            registered_agent_id: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
            frame_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registered_agent_id(&self) -> Option<String> {
        self.registered_agent_id.lock().unwrap().clone()
    }

    pub fn set_registered_agent_id(&self, agent_id: String) {
        *self.registered_agent_id.lock().unwrap() = Some(agent_id);
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.lock().unwrap().elapsed()
    }
}

#[derive(Default)]
pub struct McpSessionRegistry {
    sessions: Mutex<HashMap<String, std::sync::Arc<McpSession>>>,
}

impl McpSessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> std::sync::Arc<McpSession> {
        let session = std::sync::Arc::new(McpSession::new());
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<std::sync::Arc<McpSession>> {
        let session = self.sessions.lock().unwrap().get(id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Drop sessions that went quiet; called on the request path rather
    /// than from a dedicated reaper.
    pub fn prune_idle(&self) {
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, session| session.idle_for() < IDLE_WINDOW);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_isolated() {
        let registry = McpSessionRegistry::new();
        let a = registry.create();
        let b = registry.create();
        assert_ne!(a.id, b.id);

        a.set_registered_agent_id("agent-1".to_string());
        assert_eq!(a.registered_agent_id().as_deref(), Some("agent-1"));
        assert!(b.registered_agent_id().is_none());
    }

    #[test]
    fn test_lookup_roundtrip() {
        let registry = McpSessionRegistry::new();
        let session = registry.create();
        assert!(registry.get(&session.id).is_some());
        assert!(registry.get("nope").is_none());
    }
}
