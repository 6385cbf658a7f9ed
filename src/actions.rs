//! Action Executor (§4.6): validates and applies one tick's parsed action
//! list. Knowledge mutations apply in place during this pass; everything
//! else that crosses an aggregate boundary is queued for the scheduler to
//! execute afterward in a fixed order.
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::OrchestratorConfig;
use crate::knowledge::KnowledgeDoc;
use crate::models::{Agent, RecentActionEntry};

/// What the caller needs to know about other agents/rooms to validate
/// proximity and permission rules without the executor owning the store.
pub trait ActionContext {
    fn is_member_of(&self, agent_id: i64, room_id: i64) -> bool;
    fn shares_room_with(&self, agent_id: i64, other_id: i64) -> bool;
    fn agent_exists(&self, agent_id: i64) -> bool;
    fn target_sleep_until(&self, agent_id: i64) -> Option<DateTime<Utc>>;
    fn allowed_models(&self) -> &[String];
    fn default_model(&self) -> &str;
}

#[derive(Debug, Clone)]
pub enum QueuedEffect {
    AttentionChange { agent_id: i64, room_id: i64, pct: f64 },
    RoomLeave { agent_id: i64, room_id: i64 },
    BillboardSet { agent_id: i64, message: String },
    BillboardClear { agent_id: i64 },
    Wake { agent_id: i64, target_id: i64 },
    MessageSend { agent_id: i64, room_id: i64, content: String },
    AgentCreate {
        agent_id: i64,
        name: String,
        background_prompt: String,
        agent_type: String,
        in_room_id: Option<i64>,
    },
    AgentAlter {
        agent_id: i64,
        target_id: i64,
        name: Option<String>,
        background_prompt: Option<String>,
        model: Option<String>,
    },
    AgentRetire { agent_id: i64, target_id: i64 },
    Sleep { agent_id: i64, until: DateTime<Utc> },
}

/// Fixed execution order from §4.6: attention changes, room leaves,
/// billboard set/clear, wakes, message sends, agent creates, agent alters,
/// agent retires, sleeps.
#[derive(Debug, Default)]
pub struct PendingEffects {
    pub attention_changes: Vec<QueuedEffect>,
    pub room_leaves: Vec<QueuedEffect>,
    pub billboard: Vec<QueuedEffect>,
    pub wakes: Vec<QueuedEffect>,
    pub message_sends: Vec<QueuedEffect>,
    pub agent_creates: Vec<QueuedEffect>,
    pub agent_alters: Vec<QueuedEffect>,
    pub agent_retires: Vec<QueuedEffect>,
    pub sleeps: Vec<QueuedEffect>,
}

impl PendingEffects {
    pub fn in_fixed_order(self) -> Vec<QueuedEffect> {
        let mut out = Vec::new();
        out.extend(self.attention_changes);
        out.extend(self.room_leaves);
        out.extend(self.billboard);
        out.extend(self.wakes);
        out.extend(self.message_sends);
        out.extend(self.agent_creates);
        out.extend(self.agent_alters);
        out.extend(self.agent_retires);
        out.extend(self.sleeps);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.attention_changes.is_empty()
            && self.room_leaves.is_empty()
            && self.billboard.is_empty()
            && self.wakes.is_empty()
            && self.message_sends.is_empty()
            && self.agent_creates.is_empty()
            && self.agent_alters.is_empty()
            && self.agent_retires.is_empty()
            && self.sleeps.is_empty()
    }
}

/// Apply one tick's actions against `agent` (mutated in place for knowledge
/// and identity/wpm/sleep fields that belong solely to this agent), recording
/// one recent-action entry per action and queueing everything else.
pub fn apply_actions(agent: &mut Agent, actions: &[Value], ctx: &impl ActionContext, cfg: &OrchestratorConfig, now: DateTime<Utc>) -> (PendingEffects, Vec<RecentActionEntry>) {
    let mut effects = PendingEffects::default();
    let mut log = Vec::with_capacity(actions.len());

    for raw in actions {
        let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty());
        let discriminator = raw.get("type").and_then(non_empty).or_else(|| raw.get("action").and_then(non_empty));
        let Some(name) = discriminator else {
            log.push(entry("malformed", raw.clone(), "error: missing action type", now));
            continue;
        };

        if agent.over_budget && !name.starts_with("knowledge.") {
            log.push(entry(name, raw.clone(), "error: BLOCKED - over budget", now));
            continue;
        }

        let outcome = dispatch(agent, name, raw, ctx, cfg, now, &mut effects);
        log.push(entry(name, raw.clone(), &outcome, now));
    }

    (effects, log)
}

fn entry(kind: &str, params: Value, outcome: &str, now: DateTime<Utc>) -> RecentActionEntry {
    RecentActionEntry {
        kind: kind.to_string(),
        params,
        outcome: outcome.to_string(),
        timestamp: now,
    }
}

fn dispatch(agent: &mut Agent, name: &str, raw: &Value, ctx: &impl ActionContext, cfg: &OrchestratorConfig, now: DateTime<Utc>, effects: &mut PendingEffects) -> String {
    match name {
        "knowledge.set" => knowledge_set(agent, raw),
        "knowledge.delete" => knowledge_delete(agent, raw),
        "knowledge.append" => knowledge_append(agent, raw),
        "message" => message(agent, raw, ctx, effects),
        "room.leave" => room_leave(agent, raw, effects),
        "room.billboard" => room_billboard(agent, raw, effects),
        "room.billboard.clear" => {
            effects.billboard.push(QueuedEffect::BillboardClear { agent_id: agent.id });
            "queued".to_string()
        }
        "room.wpm" => room_wpm(agent, raw),
        "identity.name" => identity_name(agent, raw),
        "timing.sleep" => timing_sleep(raw, effects, agent.id),
        "agent.create" => agent_create(agent, raw, ctx, effects),
        "agent.alter" => agent_alter(agent, raw, ctx, effects),
        "agent.retire" => agent_retire(agent, raw, ctx, effects),
        "agent.wake" => agent_wake(agent, raw, ctx, effects),
        other => format!("error: unknown action '{other}'"),
    }
}

fn str_field<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field).and_then(Value::as_str)
}

fn i64_field(raw: &Value, field: &str) -> Option<i64> {
    raw.get(field).and_then(Value::as_i64)
}

fn knowledge_set(agent: &mut Agent, raw: &Value) -> String {
    let Some(path) = str_field(raw, "path") else {
        return "error: missing path".to_string();
    };
    let value = raw.get("value").cloned().unwrap_or(Value::Null);
    let mut doc = KnowledgeDoc::new(&mut agent.knowledge);
    match doc.set(path, value) {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

fn knowledge_delete(agent: &mut Agent, raw: &Value) -> String {
    let Some(path) = str_field(raw, "path") else {
        return "error: missing path".to_string();
    };
    let mut doc = KnowledgeDoc::new(&mut agent.knowledge);
    match doc.delete(path) {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

fn knowledge_append(agent: &mut Agent, raw: &Value) -> String {
    let Some(path) = str_field(raw, "path") else {
        return "error: missing path".to_string();
    };
    let value = raw.get("value").cloned().unwrap_or(Value::Null);
    let mut doc = KnowledgeDoc::new(&mut agent.knowledge);
    match doc.append(path, value) {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

fn message(agent: &Agent, raw: &Value, ctx: &impl ActionContext, effects: &mut PendingEffects) -> String {
    let Some(room_id) = i64_field(raw, "room_id") else {
        return "error: missing room_id".to_string();
    };
    let Some(content) = str_field(raw, "content") else {
        return "error: missing content".to_string();
    };
    if !ctx.is_member_of(agent.id, room_id) {
        return "error: not a member of that room".to_string();
    }
    effects.message_sends.push(QueuedEffect::MessageSend {
        agent_id: agent.id,
        room_id,
        content: content.to_string(),
    });
    "queued".to_string()
}

fn room_leave(agent: &Agent, raw: &Value, effects: &mut PendingEffects) -> String {
    let Some(room_id) = i64_field(raw, "room_id") else {
        return "error: missing room_id".to_string();
    };
    if room_id == agent.id {
        return "error: cannot leave own room".to_string();
    }
    effects.room_leaves.push(QueuedEffect::RoomLeave { agent_id: agent.id, room_id });
    "queued".to_string()
}

fn room_billboard(agent: &Agent, raw: &Value, effects: &mut PendingEffects) -> String {
    let Some(message) = str_field(raw, "message") else {
        return "error: missing message".to_string();
    };
    effects.billboard.push(QueuedEffect::BillboardSet {
        agent_id: agent.id,
        message: message.to_string(),
    });
    "queued".to_string()
}

fn room_wpm(agent: &mut Agent, raw: &Value) -> String {
    let Some(wpm) = raw.get("wpm").and_then(Value::as_i64) else {
        return "error: missing wpm".to_string();
    };
    agent.set_room_wpm(wpm as i32);
    "ok".to_string()
}

fn identity_name(agent: &mut Agent, raw: &Value) -> String {
    let Some(new_name) = str_field(raw, "name") else {
        return "error: missing name".to_string();
    };
    if new_name.is_empty() || new_name.chars().count() > 50 {
        return "error: name must be 1-50 characters".to_string();
    }
    agent.name = new_name.to_string();
    "ok".to_string()
}

fn timing_sleep(raw: &Value, effects: &mut PendingEffects, agent_id: i64) -> String {
    let Some(until_str) = str_field(raw, "until") else {
        return "error: missing until".to_string();
    };
    match DateTime::parse_from_rfc3339(until_str) {
        Ok(until) => {
            effects.sleeps.push(QueuedEffect::Sleep {
                agent_id,
                until: until.with_timezone(&Utc),
            });
            "queued".to_string()
        }
        Err(_) => "error: until is not a valid ISO 8601 datetime".to_string(),
    }
}

fn agent_create(agent: &Agent, raw: &Value, ctx: &impl ActionContext, effects: &mut PendingEffects) -> String {
    if !agent.may_create_agents {
        return "error: missing permission to create agents".to_string();
    }
    let Some(name) = str_field(raw, "name").filter(|s| !s.is_empty()) else {
        return "error: name must be non-empty".to_string();
    };
    let Some(background_prompt) = str_field(raw, "background_prompt").filter(|s| !s.is_empty()) else {
        return "error: background_prompt must be non-empty".to_string();
    };
    let agent_type = str_field(raw, "agent_type").unwrap_or("persona").to_string();
    let model = str_field(raw, "model").map(str::to_string).unwrap_or_else(|| ctx.default_model().to_string());
    if !ctx.allowed_models().iter().any(|m| m == &model) {
        return format!("error: model '{model}' is not in the allow-list");
    }
    let in_room_id = i64_field(raw, "in_room_id");
    effects.agent_creates.push(QueuedEffect::AgentCreate {
        agent_id: agent.id,
        name: name.to_string(),
        background_prompt: background_prompt.to_string(),
        agent_type,
        in_room_id,
    });
    "queued".to_string()
}

fn requires_shared_room_permission(agent: &Agent, target_id: i64, ctx: &impl ActionContext) -> Option<String> {
    if !agent.may_create_agents {
        return Some("error: missing permission".to_string());
    }
    if target_id == agent.id {
        return Some("error: target must not be self".to_string());
    }
    if !ctx.agent_exists(target_id) {
        return Some("error: target agent does not exist".to_string());
    }
    if !ctx.shares_room_with(agent.id, target_id) {
        return Some("error: acting agent and target share no room".to_string());
    }
    None
}

fn agent_alter(agent: &Agent, raw: &Value, ctx: &impl ActionContext, effects: &mut PendingEffects) -> String {
    let Some(target_id) = i64_field(raw, "agent_id") else {
        return "error: missing agent_id".to_string();
    };
    if let Some(err) = requires_shared_room_permission(agent, target_id, ctx) {
        return err;
    }
    effects.agent_alters.push(QueuedEffect::AgentAlter {
        agent_id: agent.id,
        target_id,
        name: str_field(raw, "name").map(str::to_string),
        background_prompt: str_field(raw, "background_prompt").map(str::to_string),
        model: str_field(raw, "model").map(str::to_string),
    });
    "queued".to_string()
}

fn agent_retire(agent: &Agent, raw: &Value, ctx: &impl ActionContext, effects: &mut PendingEffects) -> String {
    let Some(target_id) = i64_field(raw, "agent_id") else {
        return "error: missing agent_id".to_string();
    };
    if let Some(err) = requires_shared_room_permission(agent, target_id, ctx) {
        return err;
    }
    effects.agent_retires.push(QueuedEffect::AgentRetire { agent_id: agent.id, target_id });
    "queued".to_string()
}

fn agent_wake(agent: &Agent, raw: &Value, ctx: &impl ActionContext, effects: &mut PendingEffects) -> String {
    let Some(target_id) = i64_field(raw, "agent_id") else {
        return "error: missing agent_id".to_string();
    };
    if !ctx.shares_room_with(agent.id, target_id) {
        return "error: acting agent and target share no room".to_string();
    }
    match ctx.target_sleep_until(target_id) {
        Some(_) => {
            effects.wakes.push(QueuedEffect::Wake { agent_id: agent.id, target_id });
            "queued".to_string()
        }
        None => "error: target is not currently sleeping".to_string(),
    }
}

/// Heartbeat decay after a successful tick: nudge the interval back toward
/// the configured maximum by a fixed step (§4.6).
pub fn apply_decay(agent: &mut Agent, cfg: &OrchestratorConfig) {
    let nudged = agent.heartbeat_interval_secs + cfg.decay_step_secs;
    agent.set_heartbeat_interval(nudged.min(cfg.max_heartbeat_secs), cfg);
}

/// Reaction feedback: nudge another agent's interval up (slower) or down
/// (faster) by a fixed step, clamped (§4.6, optional implicit input).
pub fn apply_reaction_nudge(target: &mut Agent, positive: bool, cfg: &OrchestratorConfig) {
    let delta = if positive { -cfg.reaction_nudge_step_secs } else { cfg.reaction_nudge_step_secs };
    let nudged = target.heartbeat_interval_secs + delta;
    target.set_heartbeat_interval(nudged, cfg);
}
