//! Recent-action ring (§3): a bounded, process-lifetime log of what an
//! agent's actions produced, surfaced in the HUD's `agents[].recent_actions`
//! section. Lost on process restart by design — it is not persisted.
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::RecentActionEntry;

#[derive(Debug, Default)]
pub struct RecentActionLog {
    capacity: usize,
    per_agent: HashMap<i64, VecDeque<RecentActionEntry>>,
}

impl RecentActionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            per_agent: HashMap::new(),
        }
    }

    /// Record one outcome, evicting the oldest entry if the ring is full.
    pub fn record(&mut self, agent_id: i64, kind: impl Into<String>, params: Value, outcome: impl Into<String>, timestamp: DateTime<Utc>) {
        let ring = self.per_agent.entry(agent_id).or_default();
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(RecentActionEntry {
            kind: kind.into(),
            params,
            outcome: outcome.into(),
            timestamp,
        });
    }

    /// Entries for an agent, oldest first, as held in the ring.
    pub fn entries(&self, agent_id: i64) -> &[RecentActionEntry] {
        self.per_agent.get(&agent_id).map(|r| r.as_slices().0).unwrap_or(&[])
    }

    /// A `Vec` snapshot for serialization into the HUD document (the ring
    /// itself is not directly iterable in a slice form when it wraps).
    pub fn snapshot(&self, agent_id: i64) -> Vec<RecentActionEntry> {
        self.per_agent.get(&agent_id).map(|r| r.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn forget_agent(&mut self, agent_id: i64) {
        self.per_agent.remove(&agent_id);
    }
}
