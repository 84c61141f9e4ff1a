use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schema::SCHEMA;
use super::{ChannelAnalytics, SenderCount, Store};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_datetime(&v))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn format_datetime_opt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(format_datetime)
}

fn mentions_to_json(mentions: &Option<Vec<String>>) -> Option<String> {
    mentions
        .as_ref()
        .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "[]".to_string()))
}

fn mentions_from_json(raw: Option<String>) -> Option<Vec<String>> {
    raw.and_then(|v| serde_json::from_str(&v).ok())
}

/// Escape `%`, `_`, and the escape character itself so a user query matches
/// literally inside a LIKE pattern.
fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

const USER_COLS: &str = "id, name, type, display_name, about, agent_instructions, email, \
                         avatar_url, created_at";

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        user_type: UserType::from_str(&row.get::<_, String>(2)?)
            .unwrap_or(UserType::Human),
        display_name: row.get(3)?,
        about: row.get(4)?,
        agent_instructions: row.get(5)?,
        email: row.get(6)?,
        avatar_url: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

const AGENT_COLS: &str = "id, agent_name, agent_type, project_path, project_name, status, \
                          description, personality, current_task, gender, server_url, \
                          provider_session_id, workspace_id";

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        agent_type: row.get(2)?,
        project_path: row.get(3)?,
        project_name: row.get(4)?,
        status: AgentStatus::from_str(&row.get::<_, String>(5)?)
            .unwrap_or(AgentStatus::Offline),
        description: row.get(6)?,
        personality: row.get(7)?,
        current_task: row.get(8)?,
        gender: row.get(9)?,
        server_url: row.get(10)?,
        provider_session_id: row.get(11)?,
        workspace_id: row.get(12)?,
    })
}

const CHANNEL_COLS: &str = "id, name, type, topic, project_path, workspace_id, created_by, \
                            created_at, is_archived, archived_at";

fn row_to_channel(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: ChannelType::from_str(&row.get::<_, String>(2)?)
            .unwrap_or(ChannelType::Custom),
        topic: row.get(3)?,
        project_path: row.get(4)?,
        workspace_id: row.get(5)?,
        created_by: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        is_archived: row.get::<_, i64>(8)? != 0,
        archived_at: parse_datetime_opt(row.get(9)?),
    })
}

const MESSAGE_COLS: &str = "m.id, m.channel_id, m.sender_id, m.content, m.mentions, m.parent_id, \
                            m.is_pinned, m.pinned_at, m.pinned_by, m.edited_at, m.created_at";

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        mentions: mentions_from_json(row.get(4)?),
        parent_id: row.get(5)?,
        is_pinned: row.get::<_, i64>(6)? != 0,
        pinned_at: parse_datetime_opt(row.get(7)?),
        pinned_by: row.get(8)?,
        edited_at: parse_datetime_opt(row.get(9)?),
        created_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn row_to_message_with_sender(row: &Row) -> rusqlite::Result<MessageWithSender> {
    Ok(MessageWithSender {
        message: row_to_message(row)?,
        sender_name: row.get(11)?,
    })
}

const KEY_COLS: &str = "id, workspace_id, key_hash, key_prefix, name, created_by, created_at, \
                        expires_at, revoked_at, last_used_at";

fn row_to_api_key(row: &Row) -> rusqlite::Result<WorkspaceApiKey> {
    Ok(WorkspaceApiKey {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        key_hash: row.get(2)?,
        key_prefix: row.get(3)?,
        name: row.get(4)?,
        created_by: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        expires_at: parse_datetime_opt(row.get(7)?),
        revoked_at: parse_datetime_opt(row.get(8)?),
        last_used_at: parse_datetime_opt(row.get(9)?),
    })
}

const INVITE_COLS: &str = "id, workspace_id, token, role, max_uses, use_count, expires_at, \
                           created_at, revoked_at";

fn row_to_invite(row: &Row) -> rusqlite::Result<WorkspaceInvite> {
    Ok(WorkspaceInvite {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        token: row.get(2)?,
        role: Role::from_str(&row.get::<_, String>(3)?).unwrap_or(Role::Member),
        max_uses: row.get(4)?,
        use_count: row.get(5)?,
        expires_at: parse_datetime_opt(row.get(6)?),
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        revoked_at: parse_datetime_opt(row.get(8)?),
    })
}

const WORKSPACE_COLS: &str = "id, name, slug, type, description, onboarding_prompt, \
                              human_welcome, created_by, created_at";

fn row_to_workspace(row: &Row) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        workspace_type: WorkspaceType::from_str(&row.get::<_, String>(3)?)
            .unwrap_or(WorkspaceType::Personal),
        description: row.get(4)?,
        onboarding_prompt: row.get(5)?,
        human_welcome: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

/// Add a column if a pre-existing table lacks it. Migrations are additive
/// and idempotent.
fn ensure_column(conn: &Connection, table: &str, column: &str, definition: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(std::result::Result::ok)
        .any(|name| name == column);
    if !exists {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;

        // Databases that predate workspaces: add the scoping columns, then
        // stamp everything into the default workspace.
        ensure_column(&conn, "channels", "workspace_id", "TEXT")?;
        ensure_column(&conn, "agents", "workspace_id", "TEXT")?;

        let now = format_datetime(&Utc::now());
        let default_exists: bool = conn
            .query_row(
                "SELECT 1 FROM workspaces WHERE id = ?1",
                params![DEFAULT_WORKSPACE_ID],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !default_exists {
            conn.execute(
                "INSERT INTO workspaces (id, name, slug, type, description, created_by, created_at)
                 VALUES (?1, 'Default', 'default', 'personal', 'Local workspace', 'system', ?2)",
                params![DEFAULT_WORKSPACE_ID, now],
            )?;
        }
        conn.execute(
            "UPDATE channels SET workspace_id = ?1 WHERE workspace_id IS NULL",
            params![DEFAULT_WORKSPACE_ID],
        )?;
        conn.execute(
            "UPDATE agents SET workspace_id = ?1 WHERE workspace_id IS NULL",
            params![DEFAULT_WORKSPACE_ID],
        )?;
        // The lone pre-workspace human becomes the default admin.
        conn.execute(
            "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, role, joined_at)
             SELECT ?1, id, 'admin', ?2 FROM users
             WHERE type = 'human'
               AND id NOT IN (SELECT user_id FROM workspace_members)",
            params![DEFAULT_WORKSPACE_ID, now],
        )?;

        Ok(())
    }

    fn health_check(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // Workspace operations

    fn create_workspace(&self, ws: &Workspace) -> Result<()> {
        self.conn().execute(
            "INSERT INTO workspaces (id, name, slug, type, description, onboarding_prompt,
                                     human_welcome, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ws.id,
                ws.name,
                ws.slug,
                ws.workspace_type.as_str(),
                ws.description,
                ws.onboarding_prompt,
                ws.human_welcome,
                ws.created_by,
                format_datetime(&ws.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        self.conn()
            .query_row(
                &format!("SELECT {WORKSPACE_COLS} FROM workspaces WHERE id = ?1"),
                params![id],
                row_to_workspace,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        self.conn()
            .query_row(
                &format!("SELECT {WORKSPACE_COLS} FROM workspaces WHERE slug = ?1"),
                params![slug],
                row_to_workspace,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {WORKSPACE_COLS} FROM workspaces ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_workspace)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn list_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKSPACE_COLS} FROM workspaces w
             JOIN workspace_members m ON m.workspace_id = w.id
             WHERE m.user_id = ?1 ORDER BY w.created_at"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_workspace)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    // Workspace membership

    fn add_workspace_member(&self, member: &WorkspaceMember) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                member.workspace_id,
                member.user_id,
                member.role.as_str(),
                format_datetime(&member.joined_at),
            ],
        )?;
        Ok(())
    }

    fn get_workspace_member(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Option<WorkspaceMember>> {
        self.conn()
            .query_row(
                "SELECT workspace_id, user_id, role, joined_at FROM workspace_members
                 WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
                |row| {
                    Ok(WorkspaceMember {
                        workspace_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: Role::from_str(&row.get::<_, String>(2)?).unwrap_or(Role::Member),
                        joined_at: parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_workspace_members(&self, workspace_id: &str) -> Result<Vec<(WorkspaceMember, User)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT m.workspace_id, m.user_id, m.role, m.joined_at, {USER_COLS_PREFIXED}
             FROM workspace_members m JOIN users u ON u.id = m.user_id
             WHERE m.workspace_id = ?1 ORDER BY m.joined_at",
            USER_COLS_PREFIXED = "u.id, u.name, u.type, u.display_name, u.about, \
                                  u.agent_instructions, u.email, u.avatar_url, u.created_at"
        ))?;
        let rows = stmt.query_map(params![workspace_id], |row| {
            let member = WorkspaceMember {
                workspace_id: row.get(0)?,
                user_id: row.get(1)?,
                role: Role::from_str(&row.get::<_, String>(2)?).unwrap_or(Role::Member),
                joined_at: parse_datetime(&row.get::<_, String>(3)?),
            };
            let user = User {
                id: row.get(4)?,
                name: row.get(5)?,
                user_type: UserType::from_str(&row.get::<_, String>(6)?)
                    .unwrap_or(UserType::Human),
                display_name: row.get(7)?,
                about: row.get(8)?,
                agent_instructions: row.get(9)?,
                email: row.get(10)?,
                avatar_url: row.get(11)?,
                created_at: parse_datetime(&row.get::<_, String>(12)?),
            };
            Ok((member, user))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            &format!("INSERT INTO users ({USER_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                user.id,
                user.name,
                user.user_type.as_str(),
                user.display_name,
                user.about,
                user.agent_instructions,
                user.email,
                user.avatar_url,
                format_datetime(&user.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET name = ?1, display_name = ?2, about = ?3,
                              agent_instructions = ?4, email = ?5, avatar_url = ?6
             WHERE id = ?7",
            params![
                user.name,
                user.display_name,
                user.about,
                user.agent_instructions,
                user.email,
                user.avatar_url,
                user.id,
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::Conflict("user still has messages".to_string())
                }
                other => Error::from(other),
            })?;
        Ok(rows > 0)
    }

    fn get_workspace_human(&self, workspace_id: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {cols} FROM users u
                     JOIN workspace_members m ON m.user_id = u.id
                     WHERE m.workspace_id = ?1 AND u.type = 'human'
                     ORDER BY u.created_at LIMIT 1",
                    cols = "u.id, u.name, u.type, u.display_name, u.about, \
                            u.agent_instructions, u.email, u.avatar_url, u.created_at"
                ),
                params![workspace_id],
                row_to_user,
            )
            .optional()
            .map_err(Error::from)
    }

    // Agent operations

    fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO agents ({AGENT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                agent.id,
                agent.agent_name,
                agent.agent_type,
                agent.project_path,
                agent.project_name,
                agent.status.as_str(),
                agent.description,
                agent.personality,
                agent.current_task,
                agent.gender,
                agent.server_url,
                agent.provider_session_id,
                agent.workspace_id,
            ],
        )?;
        Ok(())
    }

    fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.conn()
            .query_row(
                &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
                params![id],
                row_to_agent,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_agent_by_name(&self, agent_name: &str) -> Result<Option<Agent>> {
        self.conn()
            .query_row(
                &format!("SELECT {AGENT_COLS} FROM agents WHERE agent_name = ?1"),
                params![agent_name],
                row_to_agent,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_agents(&self, workspace_id: &str) -> Result<Vec<Agent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {AGENT_COLS} FROM agents WHERE workspace_id = ?1 ORDER BY agent_name"
        ))?;
        let rows = stmt.query_map(params![workspace_id], row_to_agent)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn list_all_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {AGENT_COLS} FROM agents ORDER BY agent_name"))?;
        let rows = stmt.query_map([], row_to_agent)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn update_agent(&self, agent: &Agent) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE agents SET agent_type = ?1, project_path = ?2, project_name = ?3,
                               status = ?4, description = ?5, personality = ?6,
                               current_task = ?7, gender = ?8, server_url = ?9,
                               provider_session_id = ?10
             WHERE id = ?11",
            params![
                agent.agent_type,
                agent.project_path,
                agent.project_name,
                agent.status.as_str(),
                agent.description,
                agent.personality,
                agent.current_task,
                agent.gender,
                agent.server_url,
                agent.provider_session_id,
                agent.id,
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE agents SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    fn set_agent_credentials(
        &self,
        id: &str,
        server_url: Option<&str>,
        provider_session_id: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE agents SET server_url = ?1, provider_session_id = ?2 WHERE id = ?3",
            params![server_url, provider_session_id, id],
        )?;
        Ok(())
    }

    // Agent sessions

    fn start_agent_session(&self, session: &AgentSession) -> Result<()> {
        let conn = self.conn();
        // At most one active session per agent.
        conn.execute(
            "UPDATE agent_sessions SET is_active = 0, ended_at = ?1
             WHERE agent_id = ?2 AND is_active = 1",
            params![format_datetime(&session.started_at), session.agent_id],
        )?;
        conn.execute(
            "INSERT INTO agent_sessions (id, agent_id, pid, tty, is_active, started_at,
                                         ended_at, last_heartbeat)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                session.agent_id,
                session.pid,
                session.tty,
                session.is_active as i64,
                format_datetime(&session.started_at),
                format_datetime_opt(&session.ended_at),
                format_datetime(&session.last_heartbeat),
            ],
        )?;
        Ok(())
    }

    fn latest_agent_session(&self, agent_id: &str) -> Result<Option<AgentSession>> {
        self.conn()
            .query_row(
                "SELECT id, agent_id, pid, tty, is_active, started_at, ended_at, last_heartbeat
                 FROM agent_sessions WHERE agent_id = ?1
                 ORDER BY started_at DESC, rowid DESC LIMIT 1",
                params![agent_id],
                |row| {
                    Ok(AgentSession {
                        id: row.get(0)?,
                        agent_id: row.get(1)?,
                        pid: row.get(2)?,
                        tty: row.get(3)?,
                        is_active: row.get::<_, i64>(4)? != 0,
                        started_at: parse_datetime(&row.get::<_, String>(5)?),
                        ended_at: parse_datetime_opt(row.get(6)?),
                        last_heartbeat: parse_datetime(&row.get::<_, String>(7)?),
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn touch_agent_heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE agent_sessions SET last_heartbeat = ?1 WHERE agent_id = ?2 AND is_active = 1",
            params![format_datetime(&at), agent_id],
        )?;
        Ok(rows > 0)
    }

    fn end_agent_sessions(&self, agent_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE agent_sessions SET is_active = 0, ended_at = ?1
             WHERE agent_id = ?2 AND is_active = 1",
            params![format_datetime(&at), agent_id],
        )?;
        Ok(())
    }

    // Channel operations

    fn create_channel(&self, channel: &Channel) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO channels ({cols})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                cols = "id, name, type, topic, project_path, workspace_id, created_by, \
                        created_at, is_archived, archived_at"
            ),
            params![
                channel.id,
                channel.name,
                channel.channel_type.as_str(),
                channel.topic,
                channel.project_path,
                channel.workspace_id,
                channel.created_by,
                format_datetime(&channel.created_at),
                channel.is_archived as i64,
                format_datetime_opt(&channel.archived_at),
            ],
        )?;
        Ok(())
    }

    fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        self.conn()
            .query_row(
                &format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = ?1"),
                params![id],
                row_to_channel,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_channel_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<Channel>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {CHANNEL_COLS} FROM channels WHERE workspace_id = ?1 AND name = ?2"
                ),
                params![workspace_id, name],
                row_to_channel,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_channels(&self, workspace_id: &str) -> Result<Vec<Channel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLS} FROM channels WHERE workspace_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![workspace_id], row_to_channel)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn archive_channel(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE channels SET is_archived = 1, archived_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_channel(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let message_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if message_count > 0 {
            return Err(Error::Conflict(
                "channel still has messages; archive it instead".to_string(),
            ));
        }
        let rows = conn.execute("DELETE FROM channels WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn channel_analytics(&self, id: &str) -> Result<ChannelAnalytics> {
        let conn = self.conn();
        let (message_count, last_activity): (i64, Option<String>) = conn.query_row(
            "SELECT COUNT(*), MAX(created_at) FROM messages WHERE channel_id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let member_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT u.name, COUNT(*) AS n FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1
             GROUP BY m.sender_id ORDER BY n DESC LIMIT 5",
        )?;
        let top_senders = stmt
            .query_map(params![id], |row| {
                Ok(SenderCount {
                    sender_name: row.get(0)?,
                    message_count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ChannelAnalytics {
            message_count,
            member_count,
            last_activity_at: parse_datetime_opt(last_activity),
            top_senders,
        })
    }

    // Channel membership

    fn add_channel_member(&self, member: &ChannelMember) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![
                member.channel_id,
                member.user_id,
                format_datetime(&member.joined_at),
            ],
        )?;
        Ok(rows > 0)
    }

    // Message operations

    fn create_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, channel_id, sender_id, content, mentions, parent_id,
                                   is_pinned, pinned_at, pinned_by, edited_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id,
                message.channel_id,
                message.sender_id,
                message.content,
                mentions_to_json(&message.mentions),
                message.parent_id,
                message.is_pinned as i64,
                format_datetime_opt(&message.pinned_at),
                message.pinned_by,
                format_datetime_opt(&message.edited_at),
                format_datetime(&message.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages m WHERE m.id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_message_with_sender(&self, id: &str) -> Result<Option<MessageWithSender>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLS}, u.name FROM messages m
                     JOIN users u ON u.id = m.sender_id WHERE m.id = ?1"
                ),
                params![id],
                row_to_message_with_sender,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MessageWithSender>> {
        let conn = self.conn();

        let cursor: Option<(String, i64)> = match before {
            Some(id) => conn
                .query_row(
                    "SELECT created_at, rowid FROM messages WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?,
            None => None,
        };

        let mut out = Vec::new();
        match cursor {
            Some((created_at, rowid)) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLS}, u.name FROM messages m
                     JOIN users u ON u.id = m.sender_id
                     WHERE m.channel_id = ?1
                       AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.rowid < ?3))
                     ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![channel_id, created_at, rowid, limit],
                    row_to_message_with_sender,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLS}, u.name FROM messages m
                     JOIN users u ON u.id = m.sender_id
                     WHERE m.channel_id = ?1
                     ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2"
                ))?;
                let rows =
                    stmt.query_map(params![channel_id, limit], row_to_message_with_sender)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    fn recent_context(
        &self,
        channel_id: &str,
        exclude_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageWithSender>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS}, u.name FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1 AND m.id != ?2
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?3"
        ))?;
        let mut rows = stmt
            .query_map(params![channel_id, exclude_id, limit], row_to_message_with_sender)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.reverse(); // oldest first
        Ok(rows)
    }

    fn agent_inbox(&self, agent: &Agent, limit: i64) -> Result<Vec<MessageWithSender>> {
        let conn = self.conn();
        let mut out: Vec<MessageWithSender> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        // Mentions of this agent, newest first.
        {
            let needle = format!("%\"{}\"%", agent.agent_name);
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS}, u.name FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 JOIN channels c ON c.id = m.channel_id
                 WHERE c.workspace_id = ?1 AND m.mentions LIKE ?2
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![agent.workspace_id, needle, limit],
                row_to_message_with_sender,
            )?;
            for row in rows {
                let msg = row?;
                if seen.insert(msg.message.id.clone()) {
                    out.push(msg);
                }
            }
        }

        // Project channel.
        if (out.len() as i64) < limit {
            let project_channel = format!("#project-{}", agent.project_name);
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS}, u.name FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 JOIN channels c ON c.id = m.channel_id
                 WHERE c.workspace_id = ?1 AND c.name = ?2
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![agent.workspace_id, project_channel, limit],
                row_to_message_with_sender,
            )?;
            for row in rows {
                let msg = row?;
                if (out.len() as i64) >= limit {
                    break;
                }
                if seen.insert(msg.message.id.clone()) {
                    out.push(msg);
                }
            }
        }

        // Remaining joined channels.
        if (out.len() as i64) < limit {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS}, u.name FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 JOIN channel_members cm ON cm.channel_id = m.channel_id
                 WHERE cm.user_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![agent.id, limit], row_to_message_with_sender)?;
            for row in rows {
                let msg = row?;
                if (out.len() as i64) >= limit {
                    break;
                }
                if seen.insert(msg.message.id.clone()) {
                    out.push(msg);
                }
            }
        }

        Ok(out)
    }

    fn edit_message(&self, id: &str, content: &str, at: DateTime<Utc>) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
            params![content, format_datetime(&at), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_message(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        // Reactions cascade via the FK, but SQLite only honours it with
        // foreign_keys on; be explicit so the invariant survives pragmas.
        conn.execute("DELETE FROM message_reactions WHERE message_id = ?1", params![id])?;
        let rows = conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn set_message_pinned(
        &self,
        id: &str,
        pinned: bool,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn();
        let exists: Option<bool> = conn
            .query_row("SELECT 1 FROM messages WHERE id = ?1", params![id], |_| Ok(true))
            .optional()?;
        if exists.is_none() {
            return Err(Error::NotFound);
        }
        if pinned {
            conn.execute(
                "UPDATE messages SET is_pinned = 1, pinned_at = ?1, pinned_by = ?2
                 WHERE id = ?3 AND is_pinned = 0",
                params![format_datetime(&at), by, id],
            )?;
        } else {
            conn.execute(
                "UPDATE messages SET is_pinned = 0, pinned_at = NULL, pinned_by = NULL
                 WHERE id = ?1 AND is_pinned = 1",
                params![id],
            )?;
        }
        Ok(pinned)
    }

    fn list_pinned_messages(&self, channel_id: &str) -> Result<Vec<MessageWithSender>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS}, u.name FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1 AND m.is_pinned = 1
             ORDER BY m.pinned_at DESC"
        ))?;
        let rows = stmt.query_map(params![channel_id], row_to_message_with_sender)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn search_messages(
        &self,
        workspace_id: &str,
        query: &str,
        channel_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(MessageWithSender, String)>> {
        let conn = self.conn();
        let pattern = format!("%{}%", escape_like(query));

        let sql = format!(
            "SELECT {MESSAGE_COLS}, u.name, c.name FROM messages m
             JOIN users u ON u.id = m.sender_id
             JOIN channels c ON c.id = m.channel_id
             WHERE c.workspace_id = ?1
               AND m.content LIKE ?2 ESCAPE '\\'
               AND (?3 IS NULL OR c.name = ?3)
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![workspace_id, pattern, channel_name, limit], |row| {
            Ok((row_to_message_with_sender(row)?, row.get::<_, String>(12)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    // Reactions

    fn toggle_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id, user_id, emoji],
        )?;
        if removed > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, user_id, emoji, format_datetime(&Utc::now())],
        )?;
        Ok(true)
    }

    fn list_reactions(&self, message_id: &str) -> Result<Vec<MessageReaction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions
             WHERE message_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![message_id], |row| {
            Ok(MessageReaction {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
                created_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    // Read receipts

    fn mark_read(&self, user_id: &str, channel_id: &str, at: DateTime<Utc>) -> Result<()> {
        // last_read_at never regresses.
        self.conn().execute(
            "INSERT INTO read_receipts (user_id, channel_id, last_read_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, channel_id) DO UPDATE SET
                 last_read_at = excluded.last_read_at
             WHERE excluded.last_read_at > read_receipts.last_read_at",
            params![user_id, channel_id, format_datetime(&at)],
        )?;
        Ok(())
    }

    fn get_read_receipt(&self, user_id: &str, channel_id: &str) -> Result<Option<ReadReceipt>> {
        self.conn()
            .query_row(
                "SELECT user_id, channel_id, last_read_at FROM read_receipts
                 WHERE user_id = ?1 AND channel_id = ?2",
                params![user_id, channel_id],
                |row| {
                    Ok(ReadReceipt {
                        user_id: row.get(0)?,
                        channel_id: row.get(1)?,
                        last_read_at: parse_datetime(&row.get::<_, String>(2)?),
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn unread_count(&self, user_id: &str, channel_id: &str) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.channel_id = ?1
                   AND m.created_at > COALESCE(
                       (SELECT last_read_at FROM read_receipts
                        WHERE user_id = ?2 AND channel_id = ?1),
                       '')",
                params![channel_id, user_id],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    // Feature requests

    fn create_feature(&self, feature: &FeatureRequest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO feature_requests (id, title, description, status, reason, created_by,
                                           created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                feature.id,
                feature.title,
                feature.description,
                feature.status,
                feature.reason,
                feature.created_by,
                format_datetime(&feature.created_at),
                format_datetime_opt(&feature.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_feature(&self, id: &str) -> Result<Option<FeatureRequest>> {
        self.conn()
            .query_row(
                "SELECT id, title, description, status, reason, created_by, created_at, updated_at
                 FROM feature_requests WHERE id = ?1",
                params![id],
                |row| {
                    Ok(FeatureRequest {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        status: row.get(3)?,
                        reason: row.get(4)?,
                        created_by: row.get(5)?,
                        created_at: parse_datetime(&row.get::<_, String>(6)?),
                        updated_at: parse_datetime_opt(row.get(7)?),
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_features(&self, status: Option<&str>) -> Result<Vec<(FeatureRequest, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT f.id, f.title, f.description, f.status, f.reason, f.created_by,
                    f.created_at, f.updated_at, COALESCE(SUM(v.vote), 0) AS vote_count
             FROM feature_requests f
             LEFT JOIN feature_votes v ON v.feature_id = f.id
             WHERE (?1 IS NULL OR f.status = ?1)
             GROUP BY f.id ORDER BY f.created_at DESC",
        )?;
        let rows = stmt.query_map(params![status], |row| {
            Ok((
                FeatureRequest {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    status: row.get(3)?,
                    reason: row.get(4)?,
                    created_by: row.get(5)?,
                    created_at: parse_datetime(&row.get::<_, String>(6)?),
                    updated_at: parse_datetime_opt(row.get(7)?),
                },
                row.get::<_, i64>(8)?,
            ))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn upsert_feature_vote(&self, vote: &FeatureVote) -> Result<()> {
        self.conn().execute(
            "INSERT INTO feature_votes (feature_id, user_id, vote) VALUES (?1, ?2, ?3)
             ON CONFLICT (feature_id, user_id) DO UPDATE SET vote = excluded.vote",
            params![vote.feature_id, vote.user_id, vote.vote],
        )?;
        Ok(())
    }

    fn feature_vote_count(&self, feature_id: &str) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COALESCE(SUM(vote), 0) FROM feature_votes WHERE feature_id = ?1",
                params![feature_id],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    // API keys

    fn create_api_key(&self, key: &WorkspaceApiKey) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO workspace_api_keys ({KEY_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                key.id,
                key.workspace_id,
                key.key_hash,
                key.key_prefix,
                key.name,
                key.created_by,
                format_datetime(&key.created_at),
                format_datetime_opt(&key.expires_at),
                format_datetime_opt(&key.revoked_at),
                format_datetime_opt(&key.last_used_at),
            ],
        )?;
        Ok(())
    }

    fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<WorkspaceApiKey>> {
        self.conn()
            .query_row(
                &format!("SELECT {KEY_COLS} FROM workspace_api_keys WHERE key_hash = ?1"),
                params![key_hash],
                row_to_api_key,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_api_keys(&self, workspace_id: &str) -> Result<Vec<WorkspaceApiKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLS} FROM workspace_api_keys WHERE workspace_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![workspace_id], row_to_api_key)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn revoke_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE workspace_api_keys SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
            params![format_datetime(&at), id],
        )?;
        Ok(rows > 0)
    }

    fn touch_api_key(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE workspace_api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        Ok(())
    }

    // Invites

    fn create_invite(&self, invite: &WorkspaceInvite) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO workspace_invites ({INVITE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                invite.id,
                invite.workspace_id,
                invite.token,
                invite.role.as_str(),
                invite.max_uses,
                invite.use_count,
                format_datetime_opt(&invite.expires_at),
                format_datetime(&invite.created_at),
                format_datetime_opt(&invite.revoked_at),
            ],
        )?;
        Ok(())
    }

    fn get_invite_by_token(&self, token: &str) -> Result<Option<WorkspaceInvite>> {
        self.conn()
            .query_row(
                &format!("SELECT {INVITE_COLS} FROM workspace_invites WHERE token = ?1"),
                params![token],
                row_to_invite,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_invites(&self, workspace_id: &str) -> Result<Vec<WorkspaceInvite>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INVITE_COLS} FROM workspace_invites WHERE workspace_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![workspace_id], row_to_invite)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }

    fn revoke_invite(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE workspace_invites SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
            params![format_datetime(&at), id],
        )?;
        Ok(rows > 0)
    }

    fn increment_invite_use(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE workspace_invites SET use_count = use_count + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // Browser sessions

    fn create_user_session(&self, session: &UserSession) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_sessions (id, user_id, token_hash, workspace_id, created_at,
                                        expires_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.user_id,
                session.token_hash,
                session.workspace_id,
                format_datetime(&session.created_at),
                format_datetime(&session.expires_at),
                format_datetime_opt(&session.last_active_at),
            ],
        )?;
        Ok(())
    }

    fn get_user_session_by_hash(&self, token_hash: &str) -> Result<Option<UserSession>> {
        self.conn()
            .query_row(
                "SELECT id, user_id, token_hash, workspace_id, created_at, expires_at,
                        last_active_at
                 FROM user_sessions WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(UserSession {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        token_hash: row.get(2)?,
                        workspace_id: row.get(3)?,
                        created_at: parse_datetime(&row.get::<_, String>(4)?),
                        expires_at: parse_datetime(&row.get::<_, String>(5)?),
                        last_active_at: parse_datetime_opt(row.get(6)?),
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    fn revoke_user_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM user_sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn touch_user_session(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE user_sessions SET last_active_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn store() -> SqliteStore {
        let store = SqliteStore::new(":memory:").unwrap();
        store.initialize().unwrap();
        store
    }

    fn make_user(store: &SqliteStore, name: &str, user_type: UserType) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            user_type,
            display_name: None,
            about: None,
            agent_instructions: None,
            email: None,
            avatar_url: None,
            created_at: Utc::now(),
        };
        store.create_user(&user).unwrap();
        user
    }

    fn make_channel(store: &SqliteStore, name: &str) -> Channel {
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            channel_type: ChannelType::Custom,
            topic: None,
            project_path: None,
            workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
            created_by: "system".to_string(),
            created_at: Utc::now(),
            is_archived: false,
            archived_at: None,
        };
        store.create_channel(&channel).unwrap();
        channel
    }

    fn post(store: &SqliteStore, channel: &Channel, sender: &User, content: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            channel_id: channel.id.clone(),
            sender_id: sender.id.clone(),
            content: content.to_string(),
            mentions: None,
            parent_id: None,
            is_pinned: false,
            pinned_at: None,
            pinned_by: None,
            edited_at: None,
            created_at: Utc::now(),
        };
        store.create_message(&message).unwrap();
        message
    }

    #[test]
    fn test_messages_stay_in_their_channel() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let a = make_channel(&store, "#a");
        let b = make_channel(&store, "#b");
        post(&store, &a, &user, "in a");
        post(&store, &b, &user, "in b");

        let messages = store.list_messages(&a.id, None, 50).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.content, "in a");
    }

    #[test]
    fn test_cursor_pagination() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        for i in 0..5 {
            post(&store, &channel, &user, &format!("m{i}"));
        }
        let first_page = store.list_messages(&channel.id, None, 2).unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].message.content, "m4");

        let cursor = &first_page[1].message.id;
        let second_page = store.list_messages(&channel.id, Some(cursor), 2).unwrap();
        assert_eq!(second_page[0].message.content, "m2");
        assert_eq!(second_page[1].message.content, "m1");
    }

    #[test]
    fn test_reaction_toggle_round_trip() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        let message = post(&store, &channel, &user, "hi");

        assert!(store.toggle_reaction(&message.id, &user.id, "👍").unwrap());
        assert_eq!(store.list_reactions(&message.id).unwrap().len(), 1);
        assert!(!store.toggle_reaction(&message.id, &user.id, "👍").unwrap());
        assert!(store.list_reactions(&message.id).unwrap().is_empty());
    }

    #[test]
    fn test_pin_is_idempotent() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        let message = post(&store, &channel, &user, "hi");

        store.set_message_pinned(&message.id, true, &user.id, Utc::now()).unwrap();
        let first = store.get_message(&message.id).unwrap().unwrap();
        store.set_message_pinned(&message.id, true, &user.id, Utc::now()).unwrap();
        let second = store.get_message(&message.id).unwrap().unwrap();

        assert!(second.is_pinned);
        assert_eq!(first.pinned_at, second.pinned_at);
    }

    #[test]
    fn test_edit_preserves_identity_and_sets_edited_at() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        let message = post(&store, &channel, &user, "before");

        store.edit_message(&message.id, "after", Utc::now()).unwrap();
        let edited = store.get_message(&message.id).unwrap().unwrap();
        assert_eq!(edited.id, message.id);
        assert_eq!(edited.channel_id, message.channel_id);
        assert_eq!(edited.content, "after");
        assert!(edited.edited_at.is_some());
    }

    #[test]
    fn test_delete_message_removes_reactions() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        let message = post(&store, &channel, &user, "hi");
        store.toggle_reaction(&message.id, &user.id, "🎉").unwrap();

        assert!(store.delete_message(&message.id).unwrap());
        assert!(store.list_reactions(&message.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_channel_with_messages_conflicts() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        post(&store, &channel, &user, "hi");

        assert!(matches!(store.delete_channel(&channel.id), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#general");
        post(&store, &channel, &user, "a_b");
        post(&store, &channel, &user, "axb");
        post(&store, &channel, &user, "cat");

        let hits = store.search_messages(DEFAULT_WORKSPACE_ID, "_", None, 50).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.message.content, "a_b");

        let hits = store.search_messages(DEFAULT_WORKSPACE_ID, "%", None, 50).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_applies_channel_filter() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let general = make_channel(&store, "#general");
        let random = make_channel(&store, "#random");
        post(&store, &general, &user, "banana");
        post(&store, &random, &user, "banana");

        let hits = store
            .search_messages(DEFAULT_WORKSPACE_ID, "banana", Some("#general"), 50)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "#general");
    }

    #[test]
    fn test_read_receipts_never_regress() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let channel = make_channel(&store, "#a");
        let later = Utc::now();
        let earlier = later - Duration::hours(1);

        store.mark_read(&user.id, &channel.id, later).unwrap();
        store.mark_read(&user.id, &channel.id, earlier).unwrap();

        let receipt = store.get_read_receipt(&user.id, &channel.id).unwrap().unwrap();
        assert_eq!(receipt.last_read_at.timestamp(), later.timestamp());
    }

    #[test]
    fn test_one_active_agent_session_per_agent() {
        let store = store();
        let user = make_user(&store, "agent", UserType::Agent);
        let agent = Agent {
            id: user.id.clone(),
            agent_name: "plucky-sparrow".to_string(),
            agent_type: "opencode".to_string(),
            project_path: "/tmp/p".to_string(),
            project_name: "p".to_string(),
            status: AgentStatus::Online,
            description: None,
            personality: None,
            current_task: None,
            gender: None,
            server_url: None,
            provider_session_id: None,
            workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
        };
        store.create_agent(&agent).unwrap();

        for i in 0..3 {
            store
                .start_agent_session(&AgentSession {
                    id: format!("session-{i}"),
                    agent_id: agent.id.clone(),
                    pid: 0,
                    tty: String::new(),
                    is_active: true,
                    started_at: Utc::now(),
                    ended_at: None,
                    last_heartbeat: Utc::now(),
                })
                .unwrap();
        }

        let conn = store.conn();
        let active: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM agent_sessions WHERE agent_id = ?1 AND is_active = 1",
                params![agent.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(active, 1);
    }

    #[test]
    fn test_feature_vote_upsert() {
        let store = store();
        let user = make_user(&store, "op", UserType::Human);
        let feature = FeatureRequest {
            id: Uuid::new_v4().to_string(),
            title: "Task Board".to_string(),
            description: "Shared tasks".to_string(),
            status: "open".to_string(),
            reason: None,
            created_by: user.id.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        store.create_feature(&feature).unwrap();

        let vote = FeatureVote {
            feature_id: feature.id.clone(),
            user_id: user.id.clone(),
            vote: 1,
        };
        store.upsert_feature_vote(&vote).unwrap();
        assert_eq!(store.feature_vote_count(&feature.id).unwrap(), 1);

        store.upsert_feature_vote(&FeatureVote { vote: -1, ..vote }).unwrap();
        assert_eq!(store.feature_vote_count(&feature.id).unwrap(), -1);
    }

    #[test]
    fn test_workspace_backfill_is_idempotent() {
        let store = store();
        store.initialize().unwrap();
        store.initialize().unwrap();
        let ws = store.get_workspace(DEFAULT_WORKSPACE_ID).unwrap().unwrap();
        assert_eq!(ws.slug, "default");
    }
}
