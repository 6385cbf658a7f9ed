// Boundary behaviors (§8): zero-allocatable budget, empty room history, and
// sleep_until pollability at the past/future edge.
use aichat_orchestrator::budgeter;
use aichat_orchestrator::config::OrchestratorConfig;
use aichat_orchestrator::hud::{self, HudInputs, RoomInput};
use aichat_orchestrator::models::{AgentKind, Membership};
use aichat_orchestrator::room_service::{NoopCallbacks, RoomService};
use chrono::{Duration, Utc};

use crate::common::test_store;

#[test]
fn zero_allocatable_budget_still_produces_system_and_meta_and_flags_over_budget() {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut agent = svc.create_agent("Alice", "p", "m", AgentKind::Persona, None, false, &cfg).unwrap();
    // Small enough that directives+meta alone exceed it, forcing every
    // monitor's allocatable share to 0.
    agent.token_budget = 1;

    let hud = hud::build(HudInputs {
        agent: &agent,
        rooms: vec![],
        recent_actions: &[],
        now: Utc::now(),
        cfg: &cfg,
        batched: false,
    });

    assert!(hud.value.get("system").is_some());
    assert!(hud.value.get("meta").is_some());
    assert_eq!(hud.stats.room_budgets.knowledge, 0);
    assert_eq!(hud.stats.room_budgets.recent_actions, 0);
    assert_eq!(hud.stats.room_budgets.rooms, 0);

    // Mirrors the scheduler's own over-budget determination (run_one_tick):
    // total usage past token_budget triggers auto_shrink, and a budget this
    // small can't be shrunk into, so the agent stays over budget.
    let outcome = budgeter::auto_shrink(&mut agent, hud.stats.total_tokens, &cfg);
    assert!(outcome.still_over);
}

#[test]
fn empty_room_history_yields_a_room_entry_with_no_messages() {
    let cfg = OrchestratorConfig::default();
    let store = test_store();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let agent = svc.create_agent("Alice", "p", "m", AgentKind::Persona, None, false, &cfg).unwrap();

    let membership = Membership::new_self(agent.id, Utc::now(), 0);
    let room = RoomInput {
        room_id: agent.id,
        membership,
        messages: vec![],
        members: vec![agent.id],
        billboard: None,
        room_wpm: 60,
    };

    let hud = hud::build(HudInputs {
        agent: &agent,
        rooms: vec![room],
        recent_actions: &[],
        now: Utc::now(),
        cfg: &cfg,
        batched: false,
    });

    let rooms = hud.value["agent_rooms"].as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["messages"].as_array().unwrap().len(), 0);
}

#[test]
fn past_sleep_until_is_pollable_future_sleep_until_is_not() {
    let cfg = OrchestratorConfig::default();
    let store = test_store();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut agent = svc.create_agent("Alice", "p", "m", AgentKind::Persona, None, false, &cfg).unwrap();
    let now = Utc::now();

    agent.sleep_until = Some(now - Duration::seconds(1));
    assert!(agent.is_pollable(now));

    agent.sleep_until = Some(now + Duration::seconds(1));
    assert!(!agent.is_pollable(now));

    agent.sleep_until = None;
    assert!(agent.is_pollable(now));
}
