//! Scheduler (§4.7): a background loop that tracks each agent's next-due
//! timestamp, fires agents individually or batched by model, and
//! coordinates the status transitions and decay between ticks.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{error, info, warn};

use crate::actions::{self, ActionContext, PendingEffects, QueuedEffect};
use crate::budgeter;
use crate::config::OrchestratorConfig;
use crate::hud::{self, HudInputs, RoomInput};
use crate::llm::LlmProvider;
use crate::models::{Agent, AgentStatus};
use crate::persistence::Store;
use crate::recent_actions::RecentActionLog;
use crate::room_service::{NoopCallbacks, RoomService};
use crate::serializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Individual,
    Batched,
}

struct StoreActionContext<'a> {
    store: &'a dyn Store,
    cfg: &'a OrchestratorConfig,
}

impl ActionContext for StoreActionContext<'_> {
    fn is_member_of(&self, agent_id: i64, room_id: i64) -> bool {
        matches!(self.store.get_membership(agent_id, room_id), Ok(Some(_)))
    }

    fn shares_room_with(&self, agent_id: i64, other_id: i64) -> bool {
        crate::room_service::shares_room_with(self.store, agent_id, other_id).unwrap_or(false)
    }

    fn agent_exists(&self, agent_id: i64) -> bool {
        matches!(self.store.get_agent(agent_id), Ok(Some(_)))
    }

    fn target_sleep_until(&self, agent_id: i64) -> Option<DateTime<Utc>> {
        self.store.get_agent(agent_id).ok().flatten().and_then(|a| a.sleep_until).filter(|until| *until > Utc::now())
    }

    fn allowed_models(&self) -> &[String] {
        &self.cfg.allowed_models
    }

    fn default_model(&self) -> &str {
        &self.cfg.default_model
    }
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmProvider>,
    cfg: OrchestratorConfig,
    mode: SchedulerMode,
    recent_actions: Mutex<RecentActionLog>,
    due: Mutex<HashMap<i64, DateTime<Utc>>>,
    running: Mutex<HashSet<i64>>,
    stop_flag: AtomicBool,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LlmProvider>, cfg: OrchestratorConfig, mode: SchedulerMode) -> Arc<Self> {
        let capacity = cfg.recent_action_ring_capacity;
        Arc::new(Self {
            store,
            llm,
            cfg,
            mode,
            recent_actions: Mutex::new(RecentActionLog::new(capacity)),
            due: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            stop_flag: AtomicBool::new(false),
        })
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// The outer loop. Nothing short of a panic in this function is fatal:
    /// a failed tick is logged and the loop sleeps briefly before retrying
    /// (§7).
    pub async fn run(self: Arc<Self>) {
        while !self.is_stopped() {
            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed, continuing");
                tokio::time::sleep(std::time::Duration::from_millis(self.cfg.scheduler_tick_ms)).await;
                continue;
            }
            tokio::time::sleep(std::time::Duration::from_millis(self.cfg.scheduler_tick_ms)).await;
        }
        info!("scheduler stopped");
    }

    fn pollable_agents(&self) -> crate::error::CoreResult<Vec<Agent>> {
        let now = Utc::now();
        let mut out = Vec::new();
        for agent in self.store.list_agents()? {
            if !agent.is_pollable(now) {
                continue;
            }
            if self.store.list_memberships_for_agent(agent.id)?.is_empty() {
                continue;
            }
            out.push(agent);
        }
        Ok(out)
    }

    async fn tick(&self) -> crate::error::CoreResult<()> {
        let now = Utc::now();
        let pollable = self.pollable_agents()?;
        let pollable_ids: HashSet<i64> = pollable.iter().map(|a| a.id).collect();

        {
            let mut due = self.due.lock().unwrap();
            due.retain(|id, _| pollable_ids.contains(id));
            for agent in &pollable {
                due.entry(agent.id).or_insert_with(|| {
                    let stagger = rand::thread_rng().gen_range(self.cfg.initial_stagger_min_secs..=self.cfg.initial_stagger_max_secs);
                    now + chrono::Duration::milliseconds((stagger * 1000.0) as i64)
                });
            }
        }

        let window = chrono::Duration::milliseconds((self.cfg.pull_forward_window_secs * 1000.0) as i64);
        let fire_now: Vec<i64> = {
            let due = self.due.lock().unwrap();
            let running = self.running.lock().unwrap();
            let mut base: Vec<i64> = due.iter().filter(|(id, t)| **t <= now && !running.contains(*id)).map(|(id, _)| *id).collect();
            base.sort_by_key(|id| due[id]);
            if let Some(&first_due) = base.first().map(|id| &due[id]) {
                let promoted: Vec<i64> = due
                    .iter()
                    .filter(|(id, t)| !running.contains(*id) && !base.contains(id) && **t > now && **t <= first_due + window)
                    .map(|(id, _)| *id)
                    .collect();
                base.extend(promoted);
            }
            base
        };

        if fire_now.is_empty() {
            return Ok(());
        }

        {
            let mut running = self.running.lock().unwrap();
            for id in &fire_now {
                running.insert(*id);
            }
        }

        match self.mode {
            SchedulerMode::Individual => {
                for agent in pollable.iter().filter(|a| fire_now.contains(&a.id)) {
                    self.reschedule(agent, now);
                    self.dispatch_individual(agent.id);
                }
            }
            SchedulerMode::Batched => {
                let firing: Vec<&Agent> = pollable.iter().filter(|a| fire_now.contains(&a.id)).collect();
                let mut groups: HashMap<String, Vec<i64>> = HashMap::new();
                for agent in &firing {
                    groups.entry(agent.model.clone()).or_default().push(agent.id);
                    self.reschedule(agent, now);
                }
                for (model, ids) in groups {
                    self.dispatch_batch(model, ids);
                }
            }
        }

        Ok(())
    }

    fn reschedule(&self, agent: &Agent, now: DateTime<Utc>) {
        let jitter = self.cfg.interval_jitter_fraction * agent.heartbeat_interval_secs;
        let next = agent.heartbeat_interval_secs + rand::thread_rng().gen_range(-jitter..=jitter);
        let next = self.cfg.clamp_heartbeat(next);
        let mut due = self.due.lock().unwrap();
        due.insert(agent.id, now + chrono::Duration::milliseconds((next * 1000.0) as i64));
    }

    fn dispatch_individual(self: &Arc<Self>, agent_id: i64) {
        // Individual mode is modeled synchronously here for the workflow;
        // production deployments spawn this onto `tokio::spawn` per agent.
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_one_tick(agent_id).await {
                warn!(agent_id, error = %e, "tick failed, agent retried next due time");
            }
            scheduler.running.lock().unwrap().remove(&agent_id);
        });
    }

    fn dispatch_batch(self: &Arc<Self>, model: String, agent_ids: Vec<i64>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_batch_tick(&model, &agent_ids).await {
                warn!(model, error = %e, "batch tick failed");
            }
            let mut running = scheduler.running.lock().unwrap();
            for id in &agent_ids {
                running.remove(id);
            }
        });
    }

    fn gather_room_inputs(&self, agent_id: i64) -> crate::error::CoreResult<Vec<RoomInput>> {
        let mut rooms = Vec::new();
        for membership in self.store.list_memberships_for_agent(agent_id)? {
            let room_id = membership.room_id;
            let owner = self.store.get_agent(room_id)?;
            let messages = self.store.list_messages_for_room(room_id)?;
            let members = self.store.list_members_of_room(room_id)?.into_iter().map(|m| m.agent_id).collect();
            let (billboard, room_wpm) = owner.map(|o| (o.billboard, o.room_wpm)).unwrap_or((None, 60));
            rooms.push(RoomInput {
                room_id,
                membership,
                messages,
                members,
                billboard,
                room_wpm,
            });
        }
        Ok(rooms)
    }

    /// One full cycle for a single agent: build HUD, call the LLM, apply
    /// actions, execute queued effects, persist, decay.
    async fn run_one_tick(self: &Arc<Self>, agent_id: i64) -> crate::error::CoreResult<()> {
        let Some(mut agent) = self.store.get_agent(agent_id)? else {
            return Ok(());
        };

        let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
        svc.set_status(agent.id, AgentStatus::Thinking)?;

        let result = self.think_and_act(&mut agent).await;

        svc.set_status(agent.id, AgentStatus::Idle)?;
        self.store.save_agent(&agent)?;
        result
    }

    async fn think_and_act(self: &Arc<Self>, agent: &mut Agent) -> crate::error::CoreResult<()> {
        let now = Utc::now();
        let rooms = self.gather_room_inputs(agent.id)?;
        let recent_snapshot = self.recent_actions.lock().unwrap().snapshot(agent.id);

        let hud = hud::build(HudInputs {
            agent,
            rooms,
            recent_actions: &recent_snapshot,
            now,
            cfg: &self.cfg,
            batched: false,
        });

        if hud.stats.total_tokens as i64 > agent.token_budget {
            let outcome = budgeter::auto_shrink(agent, hud.stats.total_tokens, &self.cfg);
            agent.over_budget = outcome.still_over;
        } else {
            agent.over_budget = false;
        }

        let document = serializer::serialize_hud(&hud.value, agent.wire_format);

        let response = match self.llm.send(&agent.model, &hud.instructions, &document, None).await {
            Ok(r) => r,
            Err(e) => {
                warn!(agent_id = agent.id, error = %e, "LLM call failed");
                return Ok(());
            }
        };

        let envelope = serializer::parse_reply(&response.text, agent.wire_format);
        let ctx = StoreActionContext { store: self.store.as_ref(), cfg: &self.cfg };
        let (effects, log) = actions::apply_actions(agent, &envelope.actions, &ctx, &self.cfg, now);

        {
            let mut recent = self.recent_actions.lock().unwrap();
            for entry in log {
                recent.record(agent.id, entry.kind, entry.params, entry.outcome, entry.timestamp);
            }
        }

        self.execute_effects(effects).await?;
        actions::apply_decay(agent, &self.cfg);
        Ok(())
    }

    /// Execute queued mutations in the fixed order from §4.6.
    async fn execute_effects(self: &Arc<Self>, effects: PendingEffects) -> crate::error::CoreResult<()> {
        let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
        for effect in effects.in_fixed_order() {
            if self.is_stopped() {
                break;
            }
            match effect {
                QueuedEffect::AttentionChange { .. } => {
                    // No action in the current catalog produces this; reserved
                    // for a future attention-setting action.
                }
                QueuedEffect::RoomLeave { agent_id, room_id } => {
                    let _ = svc.leave(agent_id, room_id);
                }
                QueuedEffect::BillboardSet { agent_id, message } => {
                    if let Ok(Some(mut agent)) = self.store.get_agent(agent_id) {
                        agent.billboard = Some(message);
                        let _ = self.store.save_agent(&agent);
                    }
                }
                QueuedEffect::BillboardClear { agent_id } => {
                    if let Ok(Some(mut agent)) = self.store.get_agent(agent_id) {
                        agent.billboard = None;
                        let _ = self.store.save_agent(&agent);
                    }
                }
                QueuedEffect::Wake { target_id, .. } => {
                    if let Ok(Some(mut agent)) = self.store.get_agent(target_id) {
                        agent.sleep_until = None;
                        let _ = self.store.save_agent(&agent);
                    }
                }
                QueuedEffect::MessageSend { agent_id, room_id, content } => {
                    self.send_message(agent_id, room_id, content).await;
                }
                QueuedEffect::AgentCreate { agent_id, name, background_prompt, agent_type, in_room_id } => {
                    let kind = if agent_type == "bot" { crate::models::AgentKind::Bot } else { crate::models::AgentKind::Persona };
                    if let Err(e) = svc.create_agent(&name, &background_prompt, self.cfg.default_model.as_str(), kind, in_room_id, false, &self.cfg) {
                        warn!(agent_id, error = %e, "agent.create effect failed");
                    }
                }
                QueuedEffect::AgentAlter { target_id, name, background_prompt, model, .. } => {
                    if let Ok(Some(mut agent)) = self.store.get_agent(target_id) {
                        if let Some(name) = name {
                            agent.name = name;
                        }
                        if let Some(bg) = background_prompt {
                            agent.background_prompt = bg;
                        }
                        if let Some(model) = model {
                            agent.model = model;
                        }
                        let _ = self.store.save_agent(&agent);
                    }
                }
                QueuedEffect::AgentRetire { target_id, .. } => {
                    let _ = svc.delete_agent(target_id);
                }
                QueuedEffect::Sleep { agent_id, until } => {
                    if let Ok(Some(mut agent)) = self.store.get_agent(agent_id) {
                        agent.sleep_until = Some(until);
                        let _ = self.store.save_agent(&agent);
                    }
                }
            }
        }
        Ok(())
    }

    /// §4.6 message-send ordering: split on blank lines, earn each chunk's
    /// words at the room's WPM since the membership's last response, wait
    /// out the shortfall under `typing` status, then persist and advance
    /// sequencing bookkeeping.
    async fn send_message(self: &Arc<Self>, agent_id: i64, room_id: i64, content: String) {
        let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
        let Ok(Some(mut membership)) = self.store.get_membership(agent_id, room_id) else {
            return;
        };
        let Ok(Some(owner)) = self.store.get_agent(room_id) else {
            return;
        };
        let Ok(Some(sender)) = self.store.get_agent(agent_id) else {
            return;
        };

        for chunk in content.split("\n\n").filter(|c| !c.trim().is_empty()) {
            if self.is_stopped() {
                return;
            }
            let chunk_words = chunk.split_whitespace().count().max(1);
            let elapsed = membership.last_response_at.map(|t| (Utc::now() - t).num_milliseconds().max(0) as f64 / 1000.0).unwrap_or(f64::MAX);
            let earned_words = (elapsed / 60.0 * owner.room_wpm as f64).floor() as usize;

            if earned_words < chunk_words {
                let _ = svc.set_status(agent_id, AgentStatus::Typing);
                let shortfall_words = chunk_words - earned_words;
                let wait_secs = shortfall_words as f64 / owner.room_wpm as f64 * 60.0;
                let mut waited = 0u64;
                let poll_ms = self.cfg.typing_poll_interval_ms;
                while (waited as f64) < wait_secs * 1000.0 {
                    if self.is_stopped() {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(poll_ms)).await;
                    waited += poll_ms;
                }
            }

            let Ok(seq) = self.store.next_sequence() else { return };
            let id = uuid::Uuid::new_v4().to_string();
            let message = crate::models::Message {
                id,
                room_id,
                sender_id: Some(agent_id),
                sender_name: sender.name.clone(),
                content: chunk.to_string(),
                created_at: Utc::now(),
                seq,
                kind: crate::models::MessageKind::Text,
                reply_to: None,
            };
            if self.store.save_message(&message).is_err() {
                return;
            }
            membership.last_seen_seq = seq;
            membership.last_response_at = Some(Utc::now());
            membership.last_response_word_count = chunk_words;
            let _ = self.store.save_membership(&membership);
        }
    }

    async fn run_batch_tick(self: &Arc<Self>, model: &str, agent_ids: &[i64]) -> crate::error::CoreResult<()> {
        // Batched mode groups due agents by model and issues one LLM call
        // per group; each agent still gets its own HUD segment and reply
        // parse, bundled as `per_agent_actions` in a single document.
        let mut segments = Vec::new();
        let mut agents_by_id: HashMap<i64, Agent> = HashMap::new();
        for &agent_id in agent_ids {
            let Some(mut agent) = self.store.get_agent(agent_id)? else { continue };
            let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
            svc.set_status(agent.id, AgentStatus::Thinking)?;

            let now = Utc::now();
            let rooms = self.gather_room_inputs(agent.id)?;
            let recent_snapshot = self.recent_actions.lock().unwrap().snapshot(agent.id);
            let hud = hud::build(HudInputs {
                agent: &agent,
                rooms,
                recent_actions: &recent_snapshot,
                now,
                cfg: &self.cfg,
                batched: true,
            });
            if hud.stats.total_tokens as i64 > agent.token_budget {
                let outcome = budgeter::auto_shrink(&mut agent, hud.stats.total_tokens, &self.cfg);
                agent.over_budget = outcome.still_over;
            } else {
                agent.over_budget = false;
            }
            segments.push(serde_json::json!({"agent_id": agent.id, "hud": hud.value}));
            agents_by_id.insert(agent.id, agent);
        }

        if segments.is_empty() {
            return Ok(());
        }

        let batched_document = serde_json::json!({"agents": segments}).to_string();
        let response = match self.llm.send(model, hud::SYSTEM_DIRECTIVES, &batched_document, None).await {
            Ok(r) => r,
            Err(e) => {
                warn!(model, error = %e, "batched LLM call failed");
                for (_, agent) in agents_by_id {
                    let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
                    let _ = svc.set_status(agent.id, AgentStatus::Idle);
                }
                return Ok(());
            }
        };

        let envelope = serializer::parse_reply(&response.text, crate::serializer::WireFormat::VerboseJson);
        let now = Utc::now();
        for (agent_id, actions_for_agent) in envelope.per_agent_actions {
            let Some(mut agent) = agents_by_id.remove(&agent_id) else { continue };
            let ctx = StoreActionContext { store: self.store.as_ref(), cfg: &self.cfg };
            let (effects, log) = actions::apply_actions(&mut agent, &actions_for_agent, &ctx, &self.cfg, now);
            {
                let mut recent = self.recent_actions.lock().unwrap();
                for entry in log {
                    recent.record(agent.id, entry.kind, entry.params, entry.outcome, entry.timestamp);
                }
            }
            self.execute_effects(effects).await?;
            actions::apply_decay(&mut agent, &self.cfg);
            let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
            let _ = svc.set_status(agent.id, AgentStatus::Idle);
            self.store.save_agent(&agent)?;
        }
        // Any agent the reply didn't address still returns to idle.
        for (_, agent) in agents_by_id {
            let svc = RoomService::new(self.store.as_ref(), &NoopCallbacks);
            let _ = svc.set_status(agent.id, AgentStatus::Idle);
            self.store.save_agent(&agent)?;
        }
        Ok(())
    }
}
