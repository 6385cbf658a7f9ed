//! Room Service (§4.8): maintains agent↔room memberships. An agent *is* a
//! room (`agent.id == room.id`); join/leave/create/delete mutate the shared
//! store and fan out synchronous callbacks on every membership, status, or
//! room change.
use chrono::Utc;

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{Agent, AgentKind, AgentStatus, Attention, Membership, Message, MessageKind};
use crate::persistence::Store;

pub trait RoomServiceCallbacks: Send + Sync {
    fn on_membership_change(&self, _agent_id: i64, _room_id: i64) {}
    fn on_status_change(&self, _agent_id: i64, _status: AgentStatus) {}
    fn on_room_change(&self, _room_id: i64) {}
}

/// A callback sink that does nothing; the default for contexts (tests,
/// single-agent setups) with no external listeners.
pub struct NoopCallbacks;
impl RoomServiceCallbacks for NoopCallbacks {}

pub struct RoomService<'a> {
    store: &'a dyn Store,
    callbacks: &'a dyn RoomServiceCallbacks,
}

impl<'a> RoomService<'a> {
    pub fn new(store: &'a dyn Store, callbacks: &'a dyn RoomServiceCallbacks) -> Self {
        Self { store, callbacks }
    }

    fn next_agent_id(&self) -> CoreResult<i64> {
        let agents = self.store.list_agents()?;
        Ok(agents.iter().map(|a| a.id).max().unwrap_or(0) + 1)
    }

    /// Persist a new agent, create its self-membership, and optionally join
    /// an existing room.
    pub fn create_agent(&self, name: &str, background_prompt: &str, model: &str, kind: AgentKind, in_room_id: Option<i64>, may_create_agents: bool, cfg: &OrchestratorConfig) -> CoreResult<Agent> {
        let id = self.next_agent_id()?;
        let now = Utc::now();
        let mut agent = Agent::new(id, name, kind, cfg);
        agent.background_prompt = background_prompt.to_string();
        agent.model = model.to_string();
        agent.may_create_agents = may_create_agents;
        self.store.save_agent(&agent)?;

        let self_attention = if in_room_id.is_some() { 50.0 } else { 100.0 };
        let self_seq = self.store.next_sequence()? - 1;
        let mut self_membership = Membership::new_self(id, now, self_seq.max(0));
        self_membership.attention = Attention::Fixed(self_attention);
        self.store.save_membership(&self_membership)?;
        self.callbacks.on_membership_change(id, id);

        if let Some(room_id) = in_room_id {
            self.join_with_attention(id, room_id, Attention::Fixed(50.0))?;
        }

        Ok(agent)
    }

    /// Idempotent: an existing membership is returned as-is. `attention`
    /// defaults to dynamic for plain `join`; `create_agent` passes a fixed
    /// share explicitly.
    pub fn join(&self, agent_id: i64, room_id: i64) -> CoreResult<Membership> {
        self.join_with_attention(agent_id, room_id, Attention::Dynamic)
    }

    fn join_with_attention(&self, agent_id: i64, room_id: i64, attention: Attention) -> CoreResult<Membership> {
        if let Some(existing) = self.store.get_membership(agent_id, room_id)? {
            return Ok(existing);
        }
        if self.store.get_agent(room_id)?.is_none() {
            return Err(CoreError::RoomNotFound(room_id));
        }
        let now = Utc::now();
        let tail_seq = self.store.next_sequence()? - 1;
        let mut membership = Membership::new_self(agent_id, now, tail_seq.max(0));
        membership.room_id = room_id;
        membership.attention = attention;
        self.store.save_membership(&membership)?;
        self.callbacks.on_membership_change(agent_id, room_id);
        self.emit_system_message(room_id, format!("agent {agent_id} has joined"))?;
        self.callbacks.on_room_change(room_id);
        Ok(membership)
    }

    /// Leaving one's own self-room is forbidden (§3, §8 invariant 1).
    pub fn leave(&self, agent_id: i64, room_id: i64) -> CoreResult<()> {
        if agent_id == room_id {
            return Err(CoreError::Config("cannot leave own room".to_string()));
        }
        self.store.delete_membership(agent_id, room_id)?;
        self.callbacks.on_membership_change(agent_id, room_id);
        self.emit_system_message(room_id, format!("agent {agent_id} has left"))?;
        self.callbacks.on_room_change(room_id);
        Ok(())
    }

    /// Forbidden for the Architect (§4.8); cascades the agent's self-room
    /// membership plus every other member's membership in it, then the
    /// agent record.
    pub fn delete_agent(&self, id: i64) -> CoreResult<()> {
        let agent = self.store.get_agent(id)?.ok_or(CoreError::AgentNotFound(id))?;
        if agent.is_architect {
            return Err(CoreError::Config("cannot delete the Architect".to_string()));
        }
        for membership in self.store.list_members_of_room(id)? {
            self.store.delete_membership(membership.agent_id, id)?;
            self.callbacks.on_membership_change(membership.agent_id, id);
        }
        for membership in self.store.list_memberships_for_agent(id)? {
            self.store.delete_membership(id, membership.room_id)?;
            self.callbacks.on_membership_change(id, membership.room_id);
        }
        self.store.delete_agent(id)?;
        self.callbacks.on_room_change(id);
        Ok(())
    }

    pub fn set_status(&self, agent_id: i64, status: AgentStatus) -> CoreResult<()> {
        let mut agent = self.store.get_agent(agent_id)?.ok_or(CoreError::AgentNotFound(agent_id))?;
        agent.status = status;
        self.store.save_agent(&agent)?;
        self.callbacks.on_status_change(agent_id, status);
        Ok(())
    }

    fn emit_system_message(&self, room_id: i64, content: String) -> CoreResult<()> {
        let seq = self.store.next_sequence()?;
        let id = uuid::Uuid::new_v4().to_string();
        let message = Message::new_system(id, room_id, content, Utc::now(), seq);
        self.store.save_message(&message)
    }

    pub fn emit_system_message_to(&self, room_id: i64, content: impl Into<String>) -> CoreResult<()> {
        self.emit_system_message(room_id, content.into())
    }
}

/// Whether `a` is a member of any room `b` is also a member of, for the
/// `ActionContext` proximity checks (§4.6).
pub fn shares_room_with(store: &dyn Store, a: i64, b: i64) -> CoreResult<bool> {
    let rooms_a: std::collections::HashSet<i64> = store.list_memberships_for_agent(a)?.into_iter().map(|m| m.room_id).collect();
    Ok(store.list_memberships_for_agent(b)?.into_iter().any(|m| rooms_a.contains(&m.room_id)))
}
