//! Memory Budgeter (§4.4): computes per-monitor token budgets from an
//! agent's total budget and allocation percentages, and decides what to
//! shrink when a tick overruns.
use crate::config::OrchestratorConfig;
use crate::models::Agent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorBudgets {
    pub knowledge: usize,
    pub recent_actions: usize,
    pub rooms: usize,
}

/// `A = max(0, T - B)`, split across the three monitors by integer percentage.
pub fn budgets(agent: &Agent, base_hud_cost: usize) -> MonitorBudgets {
    let allocatable = (agent.token_budget - base_hud_cost as i64).max(0) as usize;
    let a = &agent.allocations;
    MonitorBudgets {
        knowledge: allocatable * a.knowledge_pct as usize / 100,
        recent_actions: allocatable * a.recent_actions_pct as usize / 100,
        rooms: allocatable * a.rooms_pct as usize / 100,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monitor {
    Knowledge,
    RecentActions,
    Rooms,
}

/// Permitted iff the new percentage is not a reduction, or (knowledge only)
/// the current knowledge usage still fits under the new, smaller allocation.
/// Knowledge must never be silently truncated (§4.4).
pub fn validate_change(
    agent: &Agent,
    monitor: Monitor,
    new_pct: u32,
    base_hud_cost: usize,
    knowledge_tokens_used: usize,
) -> bool {
    let current = match monitor {
        Monitor::Knowledge => agent.allocations.knowledge_pct,
        Monitor::RecentActions => agent.allocations.recent_actions_pct,
        Monitor::Rooms => agent.allocations.rooms_pct,
    };
    if new_pct >= current {
        return true;
    }
    if monitor != Monitor::Knowledge {
        return false;
    }
    let allocatable = (agent.token_budget - base_hud_cost as i64).max(0) as usize;
    let new_budget = allocatable * new_pct as usize / 100;
    knowledge_tokens_used <= new_budget
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerMonitorUsage {
    pub knowledge: usize,
    pub recent_actions: usize,
    pub rooms: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkOutcome {
    pub changed: bool,
    pub message: Option<String>,
    pub still_over: bool,
}

/// When `total_used > T`: drop `rooms` and `recent_actions` allocations to the
/// configured floor; knowledge is sacred and is never reduced. Mutates
/// `agent.allocations` in place when a change is made.
pub fn auto_shrink(agent: &mut Agent, total_used: usize, cfg: &OrchestratorConfig) -> ShrinkOutcome {
    if total_used as i64 <= agent.token_budget {
        return ShrinkOutcome {
            changed: false,
            message: None,
            still_over: false,
        };
    }

    let floor = cfg.auto_shrink_floor_pct;
    let already_at_floor = agent.allocations.rooms_pct <= floor && agent.allocations.recent_actions_pct <= floor;

    if already_at_floor {
        return ShrinkOutcome {
            changed: false,
            message: None,
            still_over: true,
        };
    }

    agent.allocations.rooms_pct = floor;
    agent.allocations.recent_actions_pct = floor;

    ShrinkOutcome {
        changed: true,
        message: Some(format!(
            "auto-shrink: rooms and recent_actions reduced to {floor}% (knowledge unchanged) — usage {total_used} exceeded budget {}",
            agent.token_budget
        )),
        still_over: true,
    }
}

pub fn usage_fraction(used: usize, budget: usize) -> f64 {
    if budget == 0 {
        if used == 0 { 0.0 } else { f64::INFINITY }
    } else {
        used as f64 / budget as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::models::AgentKind;

    fn agent(cfg: &OrchestratorConfig) -> Agent {
        Agent::new(1, "Alice", AgentKind::Persona, cfg)
    }

    #[test]
    fn budgets_split_by_percentage() {
        let cfg = OrchestratorConfig::default();
        let mut a = agent(&cfg);
        a.token_budget = 1000;
        let b = budgets(&a, 100);
        // allocatable = 900; knowledge 30% = 270, recent_actions 10% = 90, rooms 60% = 540
        assert_eq!(b.knowledge, 270);
        assert_eq!(b.recent_actions, 90);
        assert_eq!(b.rooms, 540);
    }

    #[test]
    fn base_cost_exceeding_budget_yields_zero_allocatable() {
        let cfg = OrchestratorConfig::default();
        let mut a = agent(&cfg);
        a.token_budget = 50;
        let b = budgets(&a, 100);
        assert_eq!(b.knowledge, 0);
        assert_eq!(b.recent_actions, 0);
        assert_eq!(b.rooms, 0);
    }

    #[test]
    fn increasing_allocation_is_always_permitted() {
        let cfg = OrchestratorConfig::default();
        let a = agent(&cfg);
        assert!(validate_change(&a, Monitor::Rooms, 80, 100, 0));
    }

    #[test]
    fn shrinking_knowledge_rejected_if_it_would_truncate() {
        let cfg = OrchestratorConfig::default();
        let mut a = agent(&cfg);
        a.token_budget = 1000;
        // knowledge currently uses 260 tokens; 30% of 900 allocatable = 270, fits.
        assert!(validate_change(&a, Monitor::Knowledge, 30, 100, 260));
        // shrinking to 10% -> 90 tokens, does not fit 260 used.
        assert!(!validate_change(&a, Monitor::Knowledge, 10, 100, 260));
    }

    #[test]
    fn shrinking_non_knowledge_monitor_always_rejected() {
        let cfg = OrchestratorConfig::default();
        let a = agent(&cfg);
        assert!(!validate_change(&a, Monitor::Rooms, 40, 100, 0));
    }

    #[test]
    fn auto_shrink_no_op_when_within_budget() {
        let cfg = OrchestratorConfig::default();
        let mut a = agent(&cfg);
        a.token_budget = 1000;
        let outcome = auto_shrink(&mut a, 900, &cfg);
        assert!(!outcome.changed);
        assert!(!outcome.still_over);
    }

    #[test]
    fn auto_shrink_reduces_rooms_and_recent_actions_not_knowledge() {
        let cfg = OrchestratorConfig::default();
        let mut a = agent(&cfg);
        a.token_budget = 1000;
        let knowledge_before = a.allocations.knowledge_pct;
        let outcome = auto_shrink(&mut a, 1500, &cfg);
        assert!(outcome.changed);
        assert_eq!(a.allocations.knowledge_pct, knowledge_before);
        assert_eq!(a.allocations.rooms_pct, cfg.auto_shrink_floor_pct);
        assert_eq!(a.allocations.recent_actions_pct, cfg.auto_shrink_floor_pct);
    }

    #[test]
    fn auto_shrink_still_over_when_already_at_floor() {
        let cfg = OrchestratorConfig::default();
        let mut a = agent(&cfg);
        a.token_budget = 1000;
        a.allocations.rooms_pct = cfg.auto_shrink_floor_pct;
        a.allocations.recent_actions_pct = cfg.auto_shrink_floor_pct;
        let outcome = auto_shrink(&mut a, 1500, &cfg);
        assert!(!outcome.changed);
        assert!(outcome.still_over);
    }

    #[test]
    fn usage_fraction_handles_zero_budget() {
        assert_eq!(usage_fraction(0, 0), 0.0);
        assert!(usage_fraction(5, 0).is_infinite());
    }
}
