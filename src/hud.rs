//! HUD Builder (§4.5): assembles the composite document sent to an agent
//! each tick — system/meta/agents/agent_rooms/warnings — and records the
//! token accounting the rest of the pipeline needs (over-budget detection,
//! auto-shrink, warnings).
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::budgeter::{self, Monitor, MonitorBudgets};
use crate::config::OrchestratorConfig;
use crate::models::{Agent, AgentKind, Attention, Membership, Message, RecentActionEntry};
use crate::token_estimator::{estimate_tokens_str, estimate_tokens_value};

/// Directive text handed to every agent verbatim, regardless of kind. Kept
/// short: the bulk of behavioral guidance lives in `meta.instructions`,
/// which varies by agent kind.
pub const SYSTEM_DIRECTIVES: &str = "You are one participant among many autonomous agents. Compare a message's sender_agent_id to your own id in this section to recognize your own past messages.";

/// Prepended to `SYSTEM_DIRECTIVES` only for agents whose `wire_format` is
/// TOON, so agents reading JSON never pay for an explainer they don't need.
const TOON_PARSING_INSTRUCTIONS: &str = "This document is written in TOON (Token-Oriented Object Notation): `name{f1,f2}: v1,v2` for a single object, `name[N]{f1,f2}:` followed by indented comma rows for a homogeneous array of objects, and `[v1,v2,v3]` for a scalar array. Your reply must use the same format.";

/// Batched replies are always JSON (§C.1), so the TOON explainer — which
/// promises a TOON reply — would be actively wrong there even for an agent
/// whose own wire format is TOON.
fn system_directives(wire_format: crate::serializer::WireFormat, batched: bool) -> String {
    if !batched && wire_format == crate::serializer::WireFormat::Toon {
        format!("{TOON_PARSING_INSTRUCTIONS}\n\n{SYSTEM_DIRECTIVES}")
    } else {
        SYSTEM_DIRECTIVES.to_string()
    }
}

/// One room's raw inputs to the HUD builder, prior to attention-based
/// trimming. `messages` is the full in-memory tail available to trim from;
/// trimming to each room's share of the rooms monitor happens here.
pub struct RoomInput {
    pub room_id: i64,
    pub membership: Membership,
    pub messages: Vec<Message>,
    pub members: Vec<i64>,
    pub billboard: Option<String>,
    pub room_wpm: i32,
}

pub struct HudInputs<'a> {
    pub agent: &'a Agent,
    pub rooms: Vec<RoomInput>,
    pub recent_actions: &'a [RecentActionEntry],
    pub now: DateTime<Utc>,
    pub cfg: &'a OrchestratorConfig,
    /// Set when this HUD is one segment of a batched-mode call (§4.7):
    /// response-format instructions then always describe the batched
    /// `agents: [{agent_id, actions}]` envelope, regardless of the agent's
    /// own configured wire format.
    pub batched: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HudStats {
    pub total_tokens: usize,
    pub knowledge_tokens: usize,
    pub recent_actions_tokens: usize,
    pub rooms_tokens: usize,
    pub room_budgets: MonitorBudgets,
    pub truncated_room_ids: Vec<i64>,
    pub truncated_recent_actions: bool,
}

pub struct HudDocument {
    pub value: Value,
    pub stats: HudStats,
    /// The directives string actually used for this document (TOON-prefixed
    /// when the agent's wire format is TOON) — what callers should pass as
    /// `instructions` to the LLM provider.
    pub instructions: String,
}

/// Flat `{name, inputs}` descriptors; entries gated by permission are
/// omitted entirely rather than included-but-rejected (§4.5).
pub fn action_catalog(agent: &Agent) -> Vec<Value> {
    let mut catalog = vec![
        json!({"name": "knowledge.set", "inputs": ["path", "value"]}),
        json!({"name": "knowledge.delete", "inputs": ["path"]}),
        json!({"name": "knowledge.append", "inputs": ["path", "value"]}),
        json!({"name": "message", "inputs": ["room_id", "content"]}),
        json!({"name": "room.leave", "inputs": ["room_id"]}),
        json!({"name": "room.billboard", "inputs": ["message"]}),
        json!({"name": "room.billboard.clear", "inputs": []}),
        json!({"name": "room.wpm", "inputs": ["wpm"]}),
        json!({"name": "identity.name", "inputs": ["name"]}),
        json!({"name": "timing.sleep", "inputs": ["until"]}),
    ];
    if agent.may_create_agents {
        catalog.push(json!({"name": "agent.create", "inputs": ["name", "background_prompt", "agent_type", "in_room_id"]}));
        catalog.push(json!({"name": "agent.alter", "inputs": ["agent_id", "name", "background_prompt", "model"]}));
        catalog.push(json!({"name": "agent.retire", "inputs": ["agent_id"]}));
    }
    catalog.push(json!({"name": "agent.wake", "inputs": ["agent_id"]}));
    catalog
}

fn behavioral_instructions(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Persona => {
            "Respond in character, as a persona with its own voice and goals. Use message to speak in a room, knowledge.* to remember durable facts about yourself or the world, and timing.sleep when you have nothing to contribute right now."
        }
        AgentKind::Bot => {
            "Act as a task-oriented agent. Prefer concise, deterministic actions; use knowledge.* for state you need across ticks and message only when a reply is warranted."
        }
    }
}

/// Batched replies are always plain JSON shaped as `{agents: [{agent_id,
/// actions}]}`, one entry per agent in the batch, independent of any single
/// agent's configured wire format (§C.1).
fn response_format_instructions(batched: bool) -> Value {
    if batched {
        json!({
            "type": "json",
            "description": "Reply with an object whose \"agents\" field is an array of {agent_id, actions}, one entry per agent addressed in this call.",
            "example": {"agents": [{"agent_id": 1, "actions": [{"type": "message", "room_id": 1, "content": "hello"}]}]}
        })
    } else {
        json!({
            "type": "json_or_toon",
            "description": "Reply with an object whose \"actions\" field is an array of action objects, each shaped per available_actions.",
            "example": {"actions": [{"type": "message", "room_id": 1, "content": "hello"}]}
        })
    }
}

fn meta_section(agent: &Agent, now: DateTime<Utc>, batched: bool) -> Value {
    json!({
        "current_time": now.to_rfc3339(),
        "instructions": behavioral_instructions(agent.kind),
        "available_actions": action_catalog(agent),
        "response_format": response_format_instructions(batched),
    })
}

/// Dynamic rooms split the attention left over after fixed allocations
/// evenly; overcommitted fixed totals are not renormalized (§4.5).
fn room_percent(membership: &Membership, fixed_total: f64, dynamic_count: usize) -> f64 {
    match membership.attention {
        Attention::Fixed(pct) => pct,
        Attention::Dynamic => ((100.0 - fixed_total).max(0.0)) / dynamic_count.max(1) as f64,
    }
}

struct TrimmedRoom {
    value: Value,
    tokens: usize,
    truncated: bool,
}

fn trim_room(input: &RoomInput, room_budget: usize, overhead_reserve: usize) -> TrimmedRoom {
    let available = room_budget.saturating_sub(overhead_reserve);
    let mut eligible: Vec<&Message> = input
        .messages
        .iter()
        .filter(|m| m.seq >= input.membership.joined_at_seq)
        .collect();
    eligible.sort_by_key(|m| std::cmp::Reverse(m.seq));

    let mut admitted = Vec::new();
    let mut used = 0usize;
    let mut truncated = false;
    for message in eligible {
        let shaped = message_shape(message);
        let cost = estimate_tokens_value(&shaped);
        if used + cost > available {
            truncated = true;
            continue;
        }
        used += cost;
        admitted.push(shaped);
    }
    admitted.reverse();

    let mut obj = Map::new();
    obj.insert("agent_id".to_string(), json!(input.room_id));
    obj.insert("members".to_string(), json!(input.members));
    obj.insert("messages".to_string(), Value::Array(admitted));
    if let Some(billboard) = &input.billboard {
        obj.insert("billboard".to_string(), json!(billboard));
    }

    let value = Value::Object(obj);
    let tokens = estimate_tokens_value(&value);
    TrimmedRoom { value, tokens, truncated }
}

fn message_shape(message: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert("id".to_string(), json!(message.id));
    obj.insert("timestamp".to_string(), json!(message.created_at.to_rfc3339()));
    obj.insert("sender_agent_id".to_string(), json!(message.sender_id));
    obj.insert("sender_name".to_string(), json!(message.sender_name));
    obj.insert("content".to_string(), json!(message.content));
    obj.insert("type".to_string(), json!(message.kind));
    if let Some(reply_to) = &message.reply_to {
        obj.insert("reply_to".to_string(), json!(reply_to));
    }
    Value::Object(obj)
}

fn trim_recent_actions(entries: &[RecentActionEntry], budget: usize) -> (Value, usize, bool) {
    let mut used = 0usize;
    let mut admitted = Vec::new();
    let mut truncated = false;
    for entry in entries.iter().rev() {
        let shaped = json!({
            "kind": entry.kind,
            "params": entry.params,
            "outcome": entry.outcome,
            "timestamp": entry.timestamp.to_rfc3339(),
        });
        let cost = estimate_tokens_value(&shaped);
        if used + cost > budget {
            truncated = true;
            continue;
        }
        used += cost;
        admitted.push(shaped);
    }
    admitted.reverse();
    (Value::Array(admitted), used, truncated)
}

/// Assemble the full HUD document for one agent's tick.
pub fn build(inputs: HudInputs<'_>) -> HudDocument {
    let HudInputs { agent, rooms, recent_actions, now, cfg, batched } = inputs;

    let directives = system_directives(agent.wire_format, batched);
    let meta = meta_section(agent, now, batched);
    let directives_tokens = estimate_tokens_str(&directives);
    let meta_tokens = estimate_tokens_value(&meta);
    let base_hud_cost = directives_tokens + meta_tokens;

    let monitor_budgets = budgeter::budgets(agent, base_hud_cost);

    let (recent_actions_value, recent_actions_tokens, recent_actions_truncated) = trim_recent_actions(recent_actions, monitor_budgets.recent_actions);

    let knowledge_tokens = estimate_tokens_value(&agent.knowledge);

    let fixed_total: f64 = rooms
        .iter()
        .filter_map(|r| match r.membership.attention {
            Attention::Fixed(pct) => Some(pct),
            Attention::Dynamic => None,
        })
        .sum();
    let dynamic_count = rooms.iter().filter(|r| r.membership.attention == Attention::Dynamic).count();

    let mut truncated_room_ids = Vec::new();
    let mut rooms_tokens = 0usize;
    let mut agent_rooms = Vec::with_capacity(rooms.len());
    for room in &rooms {
        let pct = room_percent(&room.membership, fixed_total, dynamic_count);
        let room_budget = (monitor_budgets.rooms as f64 * pct / 100.0).floor() as usize;
        let trimmed = trim_room(room, room_budget, cfg.room_overhead_reserve_tokens);
        rooms_tokens += trimmed.tokens;
        if trimmed.truncated {
            truncated_room_ids.push(room.room_id);
        }
        agent_rooms.push(trimmed.value);
    }

    let agents_entry = json!({
        "id": agent.id,
        "name": agent.name,
        "model": agent.model,
        "seed": agent.background_prompt,
        "knowledge": agent.knowledge,
        "recent_actions": recent_actions_value,
    });

    let total_tokens = directives_tokens + meta_tokens + knowledge_tokens + recent_actions_tokens + rooms_tokens;
    let free = (agent.token_budget - total_tokens as i64).max(0);

    let system = json!({
        "directives": directives,
        "your_agent_id": agent.id,
        "memory": {"total": agent.token_budget, "free": free},
    });

    let mut warnings = Vec::new();
    push_monitor_warning(&mut warnings, "knowledge", knowledge_tokens, monitor_budgets.knowledge, cfg);
    push_monitor_warning(&mut warnings, "recent_actions", recent_actions_tokens, monitor_budgets.recent_actions, cfg);
    push_monitor_warning(&mut warnings, "rooms", rooms_tokens, monitor_budgets.rooms, cfg);
    if !truncated_room_ids.is_empty() {
        warnings.push(format!("message history truncated in rooms {truncated_room_ids:?}"));
    }
    if recent_actions_truncated {
        warnings.push("recent-action history truncated".to_string());
    }
    if total_tokens as i64 > agent.token_budget * cfg.critical_threshold_pct as i64 / 100 {
        warnings.push("total HUD usage exceeds critical threshold".to_string());
    }

    let mut doc = Map::new();
    if !warnings.is_empty() {
        doc.insert("warnings".to_string(), json!(warnings));
    }
    doc.insert("system".to_string(), system);
    doc.insert("meta".to_string(), meta);
    doc.insert("agents".to_string(), json!([agents_entry]));
    doc.insert("agent_rooms".to_string(), Value::Array(agent_rooms));

    HudDocument {
        value: Value::Object(doc),
        stats: HudStats {
            total_tokens,
            knowledge_tokens,
            recent_actions_tokens,
            rooms_tokens,
            room_budgets: monitor_budgets,
            truncated_room_ids,
            truncated_recent_actions: recent_actions_truncated,
        },
        instructions: directives,
    }
}

fn push_monitor_warning(warnings: &mut Vec<String>, name: &str, used: usize, budget: usize, cfg: &OrchestratorConfig) {
    let fraction = budgeter::usage_fraction(used, budget);
    if fraction >= cfg.critical_threshold_pct as f64 / 100.0 {
        warnings.push(format!("{name} monitor at {:.0}% of budget (critical)", fraction * 100.0));
    } else if fraction >= cfg.warning_threshold_pct as f64 / 100.0 {
        warnings.push(format!("{name} monitor at {:.0}% of budget", fraction * 100.0));
    }
}

/// Exposed so the Action Executor's `validate_change` gate can see current
/// knowledge usage without rebuilding a whole HUD (§4.4).
pub fn knowledge_tokens_used(agent: &Agent) -> usize {
    estimate_tokens_value(&agent.knowledge)
}

pub use Monitor as BudgetMonitor;
