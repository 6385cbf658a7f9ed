//! Persistence (§6.1): the `Store` trait consumed by Room Service, HUD
//! Builder, and Action Executor, plus a `SqliteStore` reference
//! implementation. Schema evolution follows the teacher's `db.rs` style:
//! idempotent `CREATE TABLE IF NOT EXISTS` plus `ALTER TABLE ... ADD COLUMN`
//! calls whose "duplicate column" errors are swallowed with `.ok()`.
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{CoreError, CoreResult};
use crate::models::{Agent, AgentKind, AgentStatus, Attention, Membership, Message, MessageKind, MonitorAllocations};
use crate::serializer::WireFormat;

pub trait Store: Send + Sync {
    fn get_agent(&self, id: i64) -> CoreResult<Option<Agent>>;
    fn save_agent(&self, agent: &Agent) -> CoreResult<()>;
    fn delete_agent(&self, id: i64) -> CoreResult<()>;
    fn list_agents(&self) -> CoreResult<Vec<Agent>>;
    fn list_ai_agents(&self) -> CoreResult<Vec<Agent>>;
    fn get_architect(&self) -> CoreResult<Option<Agent>>;

    fn get_membership(&self, agent_id: i64, room_id: i64) -> CoreResult<Option<Membership>>;
    fn list_memberships_for_agent(&self, agent_id: i64) -> CoreResult<Vec<Membership>>;
    fn list_members_of_room(&self, room_id: i64) -> CoreResult<Vec<Membership>>;
    fn save_membership(&self, membership: &Membership) -> CoreResult<()>;
    fn delete_membership(&self, agent_id: i64, room_id: i64) -> CoreResult<()>;

    fn next_sequence(&self) -> CoreResult<i64>;
    fn save_message(&self, message: &Message) -> CoreResult<()>;
    fn list_messages_for_room(&self, room_id: i64) -> CoreResult<Vec<Message>>;
    fn list_messages_for_room_since(&self, room_id: i64, seq: i64) -> CoreResult<Vec<Message>>;
    fn clear_messages_for_room(&self, room_id: i64) -> CoreResult<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                background_prompt TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'persona',
                model TEXT NOT NULL DEFAULT '',
                token_budget INTEGER NOT NULL DEFAULT 8000,
                allocations TEXT NOT NULL DEFAULT '{}',
                heartbeat_interval_secs REAL NOT NULL DEFAULT 10.0,
                room_wpm INTEGER NOT NULL DEFAULT 60,
                sleep_until TEXT,
                status TEXT NOT NULL DEFAULT 'idle',
                may_create_agents INTEGER NOT NULL DEFAULT 0,
                knowledge TEXT NOT NULL DEFAULT '{}',
                billboard TEXT,
                is_architect INTEGER NOT NULL DEFAULT 0,
                over_budget INTEGER NOT NULL DEFAULT 0,
                wire_format TEXT NOT NULL DEFAULT 'toon'
            );

            CREATE TABLE IF NOT EXISTS memberships (
                agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                room_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                joined_at TEXT NOT NULL,
                joined_at_seq INTEGER NOT NULL DEFAULT 0,
                last_seen_seq INTEGER NOT NULL DEFAULT 0,
                last_response_at TEXT,
                last_response_word_count INTEGER NOT NULL DEFAULT 0,
                attention TEXT NOT NULL DEFAULT 'dynamic',
                PRIMARY KEY (agent_id, room_id)
            );
            CREATE INDEX IF NOT EXISTS idx_memberships_room ON memberships(room_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                room_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                sender_id INTEGER,
                sender_name TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                seq INTEGER NOT NULL UNIQUE,
                kind TEXT NOT NULL DEFAULT 'text',
                reply_to TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_room_seq ON messages(room_id, seq);

            CREATE TABLE IF NOT EXISTS sequence_counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                next_value INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO sequence_counter (id, next_value) VALUES (1, 1);
            ",
        )?;

        // Additive, idempotent migrations in the teacher's style: ignore
        // "duplicate column" failures so re-running migrate() is always safe.
        conn.execute_batch("ALTER TABLE agents ADD COLUMN over_budget INTEGER NOT NULL DEFAULT 0;").ok();
        conn.execute_batch("ALTER TABLE agents ADD COLUMN wire_format TEXT NOT NULL DEFAULT 'toon';").ok();

        Ok(())
    }
}

fn kind_to_str(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Persona => "persona",
        AgentKind::Bot => "bot",
    }
}

fn kind_from_str(s: &str) -> AgentKind {
    match s {
        "bot" => AgentKind::Bot,
        _ => AgentKind::Persona,
    }
}

fn status_to_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Idle => "idle",
        AgentStatus::Thinking => "thinking",
        AgentStatus::Typing => "typing",
        AgentStatus::Sleeping => "sleeping",
    }
}

fn status_from_str(s: &str) -> AgentStatus {
    match s {
        "thinking" => AgentStatus::Thinking,
        "typing" => AgentStatus::Typing,
        "sleeping" => AgentStatus::Sleeping,
        _ => AgentStatus::Idle,
    }
}

fn kind_msg_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::System => "system",
        MessageKind::Image => "image",
        MessageKind::Starter => "starter",
    }
}

fn kind_msg_from_str(s: &str) -> MessageKind {
    match s {
        "system" => MessageKind::System,
        "image" => MessageKind::Image,
        "starter" => MessageKind::Starter,
        _ => MessageKind::Text,
    }
}

fn wire_format_to_str(format: WireFormat) -> &'static str {
    match format {
        WireFormat::VerboseJson => "verbose_json",
        WireFormat::AbbreviatedJson => "abbreviated_json",
        WireFormat::Toon => "toon",
    }
}

fn wire_format_from_str(s: &str) -> WireFormat {
    match s {
        "verbose_json" => WireFormat::VerboseJson,
        "abbreviated_json" => WireFormat::AbbreviatedJson,
        _ => WireFormat::Toon,
    }
}

fn attention_to_string(attention: Attention) -> String {
    match attention {
        Attention::Fixed(pct) => pct.to_string(),
        Attention::Dynamic => "dynamic".to_string(),
    }
}

fn attention_from_str(s: &str) -> Attention {
    if s == "dynamic" {
        Attention::Dynamic
    } else {
        s.parse::<f64>().map(Attention::Fixed).unwrap_or(Attention::Dynamic)
    }
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    let allocations_json: String = row.get("allocations")?;
    let allocations: MonitorAllocations = serde_json::from_str(&allocations_json).unwrap_or(MonitorAllocations {
        knowledge_pct: 30,
        recent_actions_pct: 10,
        rooms_pct: 60,
    });
    let knowledge_json: String = row.get("knowledge")?;
    let knowledge = serde_json::from_str(&knowledge_json).unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
    let sleep_until: Option<String> = row.get("sleep_until")?;
    let kind_str: String = row.get("kind")?;
    let status_str: String = row.get("status")?;
    let wire_format_str: String = row.get("wire_format")?;

    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        background_prompt: row.get("background_prompt")?,
        kind: kind_from_str(&kind_str),
        model: row.get("model")?,
        token_budget: row.get("token_budget")?,
        wire_format: wire_format_from_str(&wire_format_str),
        allocations,
        heartbeat_interval_secs: row.get("heartbeat_interval_secs")?,
        room_wpm: row.get("room_wpm")?,
        sleep_until: sleep_until.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        status: status_from_str(&status_str),
        may_create_agents: row.get::<_, i64>("may_create_agents")? != 0,
        knowledge,
        billboard: row.get("billboard")?,
        is_architect: row.get::<_, i64>("is_architect")? != 0,
        over_budget: row.get::<_, i64>("over_budget")? != 0,
    })
}

fn row_to_membership(row: &rusqlite::Row) -> rusqlite::Result<Membership> {
    let joined_at: String = row.get("joined_at")?;
    let last_response_at: Option<String> = row.get("last_response_at")?;
    let attention_str: String = row.get("attention")?;
    Ok(Membership {
        agent_id: row.get("agent_id")?,
        room_id: row.get("room_id")?,
        joined_at: DateTime::parse_from_rfc3339(&joined_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        joined_at_seq: row.get("joined_at_seq")?,
        last_seen_seq: row.get("last_seen_seq")?,
        last_response_at: last_response_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        last_response_word_count: row.get::<_, i64>("last_response_word_count")? as usize,
        attention: attention_from_str(&attention_str),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let created_at: String = row.get("created_at")?;
    let kind_str: String = row.get("kind")?;
    Ok(Message {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        sender_id: row.get("sender_id")?,
        sender_name: row.get("sender_name")?,
        content: row.get("content")?,
        created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        seq: row.get("seq")?,
        kind: kind_msg_from_str(&kind_str),
        reply_to: row.get("reply_to")?,
    })
}

impl Store for SqliteStore {
    fn get_agent(&self, id: i64) -> CoreResult<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], row_to_agent)
            .optional()
            .map_err(CoreError::from)
    }

    fn save_agent(&self, agent: &Agent) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agents (id, name, background_prompt, kind, model, token_budget, allocations,
                heartbeat_interval_secs, room_wpm, sleep_until, status, may_create_agents, knowledge,
                billboard, is_architect, over_budget, wire_format)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, background_prompt = excluded.background_prompt, kind = excluded.kind,
                model = excluded.model, token_budget = excluded.token_budget, allocations = excluded.allocations,
                heartbeat_interval_secs = excluded.heartbeat_interval_secs, room_wpm = excluded.room_wpm,
                sleep_until = excluded.sleep_until, status = excluded.status, may_create_agents = excluded.may_create_agents,
                knowledge = excluded.knowledge, billboard = excluded.billboard, is_architect = excluded.is_architect,
                over_budget = excluded.over_budget, wire_format = excluded.wire_format",
            params![
                agent.id,
                agent.name,
                agent.background_prompt,
                kind_to_str(agent.kind),
                agent.model,
                agent.token_budget,
                serde_json::to_string(&agent.allocations).unwrap_or_default(),
                agent.heartbeat_interval_secs,
                agent.room_wpm,
                agent.sleep_until.map(|d| d.to_rfc3339()),
                status_to_str(agent.status),
                agent.may_create_agents as i64,
                serde_json::to_string(&agent.knowledge).unwrap_or_default(),
                agent.billboard,
                agent.is_architect as i64,
                agent.over_budget as i64,
                wire_format_to_str(agent.wire_format),
            ],
        )?;
        Ok(())
    }

    fn delete_agent(&self, id: i64) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_agents(&self) -> CoreResult<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM agents ORDER BY id")?;
        let rows = stmt.query_map([], row_to_agent)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    fn list_ai_agents(&self) -> CoreResult<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM agents WHERE is_architect = 0 ORDER BY id")?;
        let rows = stmt.query_map([], row_to_agent)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    fn get_architect(&self) -> CoreResult<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM agents WHERE is_architect = 1", [], row_to_agent)
            .optional()
            .map_err(CoreError::from)
    }

    fn get_membership(&self, agent_id: i64, room_id: i64) -> CoreResult<Option<Membership>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM memberships WHERE agent_id = ?1 AND room_id = ?2",
            params![agent_id, room_id],
            row_to_membership,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn list_memberships_for_agent(&self, agent_id: i64) -> CoreResult<Vec<Membership>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM memberships WHERE agent_id = ?1")?;
        let rows = stmt.query_map(params![agent_id], row_to_membership)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    fn list_members_of_room(&self, room_id: i64) -> CoreResult<Vec<Membership>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM memberships WHERE room_id = ?1")?;
        let rows = stmt.query_map(params![room_id], row_to_membership)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    fn save_membership(&self, membership: &Membership) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memberships (agent_id, room_id, joined_at, joined_at_seq, last_seen_seq,
                last_response_at, last_response_word_count, attention)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(agent_id, room_id) DO UPDATE SET
                last_seen_seq = excluded.last_seen_seq, last_response_at = excluded.last_response_at,
                last_response_word_count = excluded.last_response_word_count, attention = excluded.attention",
            params![
                membership.agent_id,
                membership.room_id,
                membership.joined_at.to_rfc3339(),
                membership.joined_at_seq,
                membership.last_seen_seq,
                membership.last_response_at.map(|d| d.to_rfc3339()),
                membership.last_response_word_count as i64,
                attention_to_string(membership.attention),
            ],
        )?;
        Ok(())
    }

    fn delete_membership(&self, agent_id: i64, room_id: i64) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memberships WHERE agent_id = ?1 AND room_id = ?2", params![agent_id, room_id])?;
        Ok(())
    }

    fn next_sequence(&self) -> CoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let seq: i64 = conn.query_row("UPDATE sequence_counter SET next_value = next_value + 1 WHERE id = 1 RETURNING next_value - 1", [], |row| row.get(0))?;
        Ok(seq)
    }

    fn save_message(&self, message: &Message) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (id, room_id, sender_id, sender_name, content, created_at, seq, kind, reply_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.room_id,
                message.sender_id,
                message.sender_name,
                message.content,
                message.created_at.to_rfc3339(),
                message.seq,
                kind_msg_to_str(message.kind),
                message.reply_to,
            ],
        )?;
        Ok(())
    }

    fn list_messages_for_room(&self, room_id: i64) -> CoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM messages WHERE room_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![room_id], row_to_message)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    fn list_messages_for_room_since(&self, room_id: i64, seq: i64) -> CoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM messages WHERE room_id = ?1 AND seq >= ?2 ORDER BY seq")?;
        let rows = stmt.query_map(params![room_id, seq], row_to_message)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    fn clear_messages_for_room(&self, room_id: i64) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE room_id = ?1", params![room_id])?;
        Ok(())
    }
}
