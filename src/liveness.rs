//! Ghost detection: a periodic sweep classifying each agent as reachable
//! or not. An agent with external credentials is a ghost when its provider
//! session no longer exists (or its server is down); an agent without
//! credentials is judged by its most recent OS session's pid. The sweep
//! builds a fresh map and swaps it in whole, so readers never observe a
//! partially updated state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::invoke::SessionSdk;
use crate::store::Store;
use crate::types::Agent;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct GhostCache {
    map: RwLock<Arc<HashMap<String, bool>>>,
}

impl GhostCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown agents (registered since the last sweep) default to not
    /// ghost.
    #[must_use]
    pub fn is_ghost(&self, agent_id: &str) -> bool {
        self.map
            .read()
            .unwrap()
            .get(agent_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn replace(&self, map: HashMap<String, bool>) {
        *self.map.write().unwrap() = Arc::new(map);
    }
}

fn is_pid_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    if cfg!(target_os = "linux") {
        std::path::Path::new("/proc").join(pid.to_string()).exists()
    } else {
        // No cheap probe available; assume alive rather than flag a
        // healthy agent.
        true
    }
}

/// Session lists fetched once per server per sweep; `None` marks a server
/// that did not answer.
type SessionListCache = HashMap<String, Option<HashSet<String>>>;

async fn sessions_for(
    sdk: &dyn SessionSdk,
    cache: &mut SessionListCache,
    server_url: &str,
) -> Option<HashSet<String>> {
    if let Some(cached) = cache.get(server_url) {
        return cached.clone();
    }
    let fetched = match sdk.list_sessions(server_url).await {
        Ok(sessions) => Some(sessions.into_iter().map(|s| s.id).collect()),
        Err(e) => {
            tracing::debug!("liveness probe of {} failed: {}", server_url, e);
            None
        }
    };
    cache.insert(server_url.to_string(), fetched.clone());
    fetched
}

async fn classify(
    agent: &Agent,
    store: &dyn Store,
    sdk: &dyn SessionSdk,
    session_cache: &mut SessionListCache,
) -> bool {
    if agent.agent_type == "system" {
        return false;
    }

    if let (Some(server_url), Some(provider_session_id)) =
        (&agent.server_url, &agent.provider_session_id)
    {
        return match sessions_for(sdk, session_cache, server_url).await {
            Some(sessions) => !sessions.contains(provider_session_id),
            None => true,
        };
    }

    match store.latest_agent_session(&agent.id) {
        Ok(Some(session)) => !session.is_active || !is_pid_alive(session.pid),
        Ok(None) => true,
        Err(e) => {
            tracing::error!("session lookup failed for '{}': {}", agent.agent_name, e);
            true
        }
    }
}

pub async fn run_sweep(store: &dyn Store, sdk: &dyn SessionSdk) -> HashMap<String, bool> {
    let agents = match store.list_all_agents() {
        Ok(agents) => agents,
        Err(e) => {
            tracing::error!("liveness sweep could not list agents: {}", e);
            return HashMap::new();
        }
    };

    let mut session_cache = SessionListCache::new();
    let mut map = HashMap::with_capacity(agents.len());
    for agent in &agents {
        let ghost = classify(agent, store, sdk, &mut session_cache).await;
        map.insert(agent.id.clone(), ghost);
    }
    map
}

/// Background sweeper; never exits, never panics the task.
pub fn spawn_sweeper(
    store: Arc<dyn Store>,
    sdk: Arc<dyn SessionSdk>,
    cache: Arc<GhostCache>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let map = run_sweep(store.as_ref(), sdk.as_ref()).await;
            cache.replace(map);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::invoke::{Part, SdkSession};
    use crate::store::SqliteStore;
    use crate::types::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    /// Stub SDK: a fixed map of server → session ids; unknown servers are
    /// unreachable.
    struct StubSdk {
        servers: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl SessionSdk for StubSdk {
        async fn list_sessions(&self, base_url: &str) -> Result<Vec<SdkSession>> {
            match self.servers.get(base_url) {
                Some(ids) => Ok(ids
                    .iter()
                    .map(|id| SdkSession {
                        id: id.clone(),
                        directory: None,
                        title: None,
                    })
                    .collect()),
                None => Err(Error::Internal("unreachable".to_string())),
            }
        }

        async fn create_session(&self, _base_url: &str) -> Result<String> {
            Ok("stub-session".to_string())
        }

        async fn prompt_session(
            &self,
            _base_url: &str,
            _session_id: &str,
            _text: &str,
        ) -> Result<Vec<Part>> {
            Ok(vec![])
        }
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::new(":memory:").unwrap();
        store.initialize().unwrap();
        store
    }

    fn make_agent(
        store: &SqliteStore,
        name: &str,
        agent_type: &str,
        server_url: Option<&str>,
        provider_session_id: Option<&str>,
    ) -> Agent {
        let id = Uuid::new_v4().to_string();
        store
            .create_user(&User {
                id: id.clone(),
                name: name.to_string(),
                user_type: UserType::Agent,
                display_name: None,
                about: None,
                agent_instructions: None,
                email: None,
                avatar_url: None,
                created_at: Utc::now(),
            })
            .unwrap();
        let agent = Agent {
            id,
            agent_name: name.to_string(),
            agent_type: agent_type.to_string(),
            project_path: "/tmp/p".to_string(),
            project_name: "p".to_string(),
            status: AgentStatus::Online,
            description: None,
            personality: None,
            current_task: None,
            gender: None,
            server_url: server_url.map(str::to_string),
            provider_session_id: provider_session_id.map(str::to_string),
            workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
        };
        store.create_agent(&agent).unwrap();
        agent
    }

    fn start_session(store: &SqliteStore, agent: &Agent, pid: i64) {
        store
            .start_agent_session(&AgentSession {
                id: Uuid::new_v4().to_string(),
                agent_id: agent.id.clone(),
                pid,
                tty: String::new(),
                is_active: true,
                started_at: Utc::now(),
                ended_at: None,
                last_heartbeat: Utc::now(),
            })
            .unwrap();
    }

    fn stub(servers: &[(&str, &[&str])]) -> StubSdk {
        StubSdk {
            servers: servers
                .iter()
                .map(|(url, ids)| {
                    (url.to_string(), ids.iter().map(|s| s.to_string()).collect())
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_system_agent_never_ghost() {
        let store = store();
        let agent = make_agent(&store, "overseer", "system", None, None);
        let sdk = stub(&[]);
        let mut cache = SessionListCache::new();
        assert!(!classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_live_provider_session() {
        let store = store();
        let agent =
            make_agent(&store, "a1", "opencode", Some("http://x:4096"), Some("ses_live"));
        let sdk = stub(&[("http://x:4096", &["ses_live", "ses_other"])]);
        let mut cache = SessionListCache::new();
        assert!(!classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_missing_provider_session_is_ghost() {
        let store = store();
        let agent =
            make_agent(&store, "a1", "opencode", Some("http://x:4096"), Some("ses_gone"));
        let sdk = stub(&[("http://x:4096", &["ses_other"])]);
        let mut cache = SessionListCache::new();
        assert!(classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_ghost() {
        let store = store();
        let agent =
            make_agent(&store, "a1", "opencode", Some("http://down:1"), Some("ses_x"));
        let sdk = stub(&[]);
        let mut cache = SessionListCache::new();
        assert!(classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_no_credentials_no_session_is_ghost() {
        let store = store();
        let agent = make_agent(&store, "a1", "opencode", None, None);
        let sdk = stub(&[]);
        let mut cache = SessionListCache::new();
        assert!(classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_no_credentials_alive_pid_not_ghost() {
        let store = store();
        let agent = make_agent(&store, "a1", "opencode", None, None);
        start_session(&store, &agent, std::process::id() as i64);
        let sdk = stub(&[]);
        let mut cache = SessionListCache::new();
        assert!(!classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_no_credentials_dead_pid_is_ghost() {
        let store = store();
        let agent = make_agent(&store, "a1", "opencode", None, None);
        start_session(&store, &agent, 0);
        let sdk = stub(&[]);
        let mut cache = SessionListCache::new();
        assert!(classify(&agent, &store, &sdk, &mut cache).await);
    }

    #[tokio::test]
    async fn test_sweep_swaps_whole_map() {
        let store = store();
        make_agent(&store, "a1", "opencode", Some("http://x:4096"), Some("ses_live"));
        let sdk = stub(&[("http://x:4096", &["ses_live"])]);

        let cache = GhostCache::new();
        cache.replace(run_sweep(&store, &sdk).await);

        let agent = store.get_agent_by_name("a1").unwrap().unwrap();
        assert!(!cache.is_ghost(&agent.id));
        // The seeded creator is classified too (system → not ghost).
        let creator = store.get_agent_by_name(CREATOR_NAME).unwrap();
        if let Some(creator) = creator {
            assert!(!cache.is_ghost(&creator.id));
        }
    }

    #[test]
    fn test_pid_probe() {
        assert!(is_pid_alive(std::process::id() as i64));
        assert!(!is_pid_alive(0));
        assert!(!is_pid_alive(-1));
    }
}
