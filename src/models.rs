//! Core data model (§3). The source identifies an agent with the room it
//! owns; per the Design Notes (§9) we model both as one aggregate keyed by
//! the agent's id and expose a thin room-view where code wants to read
//! room-only attributes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serializer::WireFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Persona,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Typing,
    Sleeping,
}

/// Per-monitor allocation percentages (§4.4). Validated non-negative on construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorAllocations {
    pub knowledge_pct: u32,
    pub recent_actions_pct: u32,
    pub rooms_pct: u32,
}

impl MonitorAllocations {
    pub fn defaults(cfg: &crate::config::OrchestratorConfig) -> Self {
        Self {
            knowledge_pct: cfg.default_knowledge_pct,
            recent_actions_pct: cfg.default_recent_actions_pct,
            rooms_pct: cfg.default_rooms_pct,
        }
    }
}

/// An agent *is* a room: `room_id == agent.id`. See `RoomView`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub background_prompt: String,
    pub kind: AgentKind,
    pub model: String,
    pub token_budget: i64,
    /// The wire format this agent's HUD is serialized in and its replies
    /// are parsed from (§4.3).
    pub wire_format: WireFormat,
    pub allocations: MonitorAllocations,
    /// Clamped to [1.0, 10.0] on every write (§3 invariants).
    pub heartbeat_interval_secs: f64,
    /// Clamped to [10, 200] on every write.
    pub room_wpm: i32,
    pub sleep_until: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    pub may_create_agents: bool,
    pub knowledge: serde_json::Value,
    pub billboard: Option<String>,
    /// Exactly one agent in the population has this set (§3 invariants).
    pub is_architect: bool,
    /// Set when auto-shrink fails to bring HUD usage under `token_budget` (§4.4, §7).
    pub over_budget: bool,
}

impl Agent {
    pub fn new(id: i64, name: impl Into<String>, kind: AgentKind, cfg: &crate::config::OrchestratorConfig) -> Self {
        Self {
            id,
            name: name.into(),
            background_prompt: String::new(),
            kind,
            model: String::new(),
            token_budget: 8_000,
            wire_format: WireFormat::Toon,
            allocations: MonitorAllocations::defaults(cfg),
            heartbeat_interval_secs: cfg.max_heartbeat_secs,
            room_wpm: 60,
            sleep_until: None,
            status: AgentStatus::Idle,
            may_create_agents: false,
            knowledge: serde_json::Value::Object(serde_json::Map::new()),
            billboard: None,
            is_architect: false,
            over_budget: false,
        }
    }

    /// The room id this agent owns. Always equal to `id` (§3).
    pub fn room_id(&self) -> i64 {
        self.id
    }

    pub fn set_heartbeat_interval(&mut self, secs: f64, cfg: &crate::config::OrchestratorConfig) {
        self.heartbeat_interval_secs = cfg.clamp_heartbeat(secs);
    }

    pub fn set_room_wpm(&mut self, wpm: i32) {
        self.room_wpm = wpm.clamp(10, 200);
    }

    pub fn is_pollable(&self, now: DateTime<Utc>) -> bool {
        match self.sleep_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

/// A thin read-only view onto the room-only attributes of an agent, per the
/// Design Note on cyclic agent/room identity (§9).
#[derive(Debug, Clone, Copy)]
pub struct RoomView<'a> {
    pub room_id: i64,
    pub owner: &'a Agent,
}

impl<'a> RoomView<'a> {
    pub fn of(agent: &'a Agent) -> Self {
        Self {
            room_id: agent.id,
            owner: agent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attention {
    Fixed(f64),
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct Membership {
    pub agent_id: i64,
    pub room_id: i64,
    pub joined_at: DateTime<Utc>,
    /// Snapshot of the room's tail sequence at join time, so the HUD never replays
    /// pre-join history (§4.8 join()).
    pub joined_at_seq: i64,
    pub last_seen_seq: i64,
    pub last_response_at: Option<DateTime<Utc>>,
    pub last_response_word_count: usize,
    pub attention: Attention,
}

impl Membership {
    pub fn is_self_room(&self) -> bool {
        self.agent_id == self.room_id
    }

    pub fn new_self(agent_id: i64, now: DateTime<Utc>, tail_seq: i64) -> Self {
        Self {
            agent_id,
            room_id: agent_id,
            joined_at: now,
            joined_at_seq: tail_seq,
            last_seen_seq: tail_seq,
            last_response_at: None,
            last_response_word_count: 0,
            attention: Attention::Fixed(100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    System,
    Image,
    Starter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: i64,
    pub sender_id: Option<i64>,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic, strictly increasing across the entire store (§3 invariants).
    pub seq: i64,
    pub kind: MessageKind,
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new_system(id: String, room_id: i64, content: impl Into<String>, created_at: DateTime<Utc>, seq: i64) -> Self {
        Self {
            id,
            room_id,
            sender_id: None,
            sender_name: "system".to_string(),
            content: content.into(),
            created_at,
            seq,
            kind: MessageKind::System,
            reply_to: None,
        }
    }
}

/// One entry in an agent's recent-action ring (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentActionEntry {
    pub kind: String,
    pub params: serde_json::Value,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}
