//! Credential auto-discovery: when an agent has no stored
//! `(server_url, provider_session_id)`, scan the well-known local session
//! server ports and pick the session whose working directory best matches
//! the agent's project path.

use super::opencode::{SdkSession, SessionSdk};

/// Ports OpenCode-style servers bind by default.
const DISCOVERY_PORTS: std::ops::RangeInclusive<u16> = 4096..=4106;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    Child = 1,
    Parent = 2,
    Exact = 3,
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Rank how a session's directory relates to the project path.
/// Exact match beats a session rooted above the project (parent), which
/// beats one rooted below it (child).
fn rank_directory(session_dir: &str, project_path: &str) -> Option<MatchRank> {
    let dir = normalize(session_dir);
    let project = normalize(project_path);

    if dir == project {
        Some(MatchRank::Exact)
    } else if project.starts_with(&format!("{dir}/")) {
        Some(MatchRank::Parent)
    } else if dir.starts_with(&format!("{project}/")) {
        Some(MatchRank::Child)
    } else {
        None
    }
}

fn best_session(sessions: &[SdkSession], project_path: &str) -> Option<(MatchRank, String)> {
    sessions
        .iter()
        .filter_map(|s| {
            let dir = s.directory.as_deref()?;
            rank_directory(dir, project_path).map(|rank| (rank, s.id.clone()))
        })
        .max_by_key(|(rank, _)| *rank)
}

/// Scan local servers for a session matching `project_path`. Returns
/// `(server_url, session_id)`; the caller persists them on the agent row.
pub async fn auto_discover(sdk: &dyn SessionSdk, project_path: &str) -> Option<(String, String)> {
    let mut best: Option<(MatchRank, String, String)> = None;

    for port in DISCOVERY_PORTS {
        let base_url = format!("http://127.0.0.1:{port}");
        let sessions = match sdk.list_sessions(&base_url).await {
            Ok(sessions) => sessions,
            Err(_) => continue,
        };
        if let Some((rank, session_id)) = best_session(&sessions, project_path) {
            let better = best.as_ref().map_or(true, |(current, _, _)| rank > *current);
            if better {
                best = Some((rank, base_url.clone(), session_id));
                if rank == MatchRank::Exact {
                    break;
                }
            }
        }
    }

    best.map(|(rank, server_url, session_id)| {
        tracing::info!(
            "auto-discovered session {} on {} ({:?} match for {})",
            session_id,
            server_url,
            rank,
            project_path
        );
        (server_url, session_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, dir: &str) -> SdkSession {
        SdkSession {
            id: id.to_string(),
            directory: Some(dir.to_string()),
            title: None,
        }
    }

    #[test]
    fn test_rank_exact() {
        assert_eq!(rank_directory("/home/p/app", "/home/p/app"), Some(MatchRank::Exact));
    }

    #[test]
    fn test_rank_trailing_slash_normalized() {
        assert_eq!(rank_directory("/home/p/app/", "/home/p/app"), Some(MatchRank::Exact));
        assert_eq!(rank_directory("/home/p/app", "/home/p/app/"), Some(MatchRank::Exact));
    }

    #[test]
    fn test_rank_parent_and_child() {
        assert_eq!(rank_directory("/home/p", "/home/p/app"), Some(MatchRank::Parent));
        assert_eq!(rank_directory("/home/p/app/sub", "/home/p/app"), Some(MatchRank::Child));
    }

    #[test]
    fn test_rank_rejects_sibling_prefix() {
        // "/home/p/app2" shares a string prefix but is unrelated.
        assert_eq!(rank_directory("/home/p/app2", "/home/p/app"), None);
        assert_eq!(rank_directory("/elsewhere", "/home/p/app"), None);
    }

    #[test]
    fn test_best_session_prefers_exact_over_parent() {
        let sessions = vec![
            session("parent", "/home/p"),
            session("exact", "/home/p/app"),
            session("child", "/home/p/app/sub"),
        ];
        let (rank, id) = best_session(&sessions, "/home/p/app").unwrap();
        assert_eq!(rank, MatchRank::Exact);
        assert_eq!(id, "exact");
    }

    #[test]
    fn test_best_session_prefers_parent_over_child() {
        let sessions = vec![
            session("child", "/home/p/app/sub"),
            session("parent", "/home/p"),
        ];
        let (rank, id) = best_session(&sessions, "/home/p/app").unwrap();
        assert_eq!(rank, MatchRank::Parent);
        assert_eq!(id, "parent");
    }

    #[test]
    fn test_best_session_no_match() {
        let sessions = vec![session("other", "/unrelated")];
        assert!(best_session(&sessions, "/home/p/app").is_none());
    }
}
