// End-to-end scenarios seeded straight from the component spec's own test
// list: knowledge round trip, typing-paced sends, over-budget lockout,
// cross-agent retirement, retire-self rejection, TOON/JSON fallback parse.
use aichat_orchestrator::config::OrchestratorConfig;
use aichat_orchestrator::models::AgentKind;
use aichat_orchestrator::persistence::Store;
use aichat_orchestrator::room_service::{NoopCallbacks, RoomService};
use aichat_orchestrator::serializer::{self, WireFormat};
use aichat_orchestrator::{actions, scheduler::SchedulerMode, Scheduler};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::common::{test_store, FakeLlmProvider, TestActionContext};

#[test]
fn knowledge_set_get_round_trip() {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut agent = svc.create_agent("Alice", "curious persona", "gpt-4o-mini", AgentKind::Persona, None, false, &cfg).unwrap();

    let ctx = TestActionContext { store: &*store, cfg: &cfg };
    let actions = vec![json!({"type": "knowledge.set", "path": "mood", "value": "happy"})];
    let (effects, log) = actions::apply_actions(&mut agent, &actions, &ctx, &cfg, Utc::now());

    assert!(effects.is_empty());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, "knowledge.set");
    assert_eq!(log[0].outcome, "ok");
    assert_eq!(agent.knowledge["mood"], json!("happy"));
}

#[tokio::test]
async fn send_with_typing_wait() {
    let db_path = format!("/tmp/orch_scen2_{}.db", uuid::Uuid::new_v4());
    let store: Arc<dyn Store> = Arc::new(aichat_orchestrator::persistence::SqliteStore::open(&db_path).unwrap());

    let mut cfg = OrchestratorConfig::default();
    cfg.initial_stagger_min_secs = 0.0;
    cfg.initial_stagger_max_secs = 0.02;
    cfg.scheduler_tick_ms = 20;
    cfg.typing_poll_interval_ms = 20;

    let svc = RoomService::new(store.as_ref(), &NoopCallbacks);
    let mut agent = svc.create_agent("Agent3", "a persona", &cfg.default_model, AgentKind::Persona, None, false, &cfg).unwrap();
    agent.set_room_wpm(600); // 10 words/sec, so a 10-word message resolves in ~1s
    store.save_agent(&agent).unwrap();

    // Backdate the self-membership's last response so the typing-wait math
    // starts from a known elapsed time rather than "never responded".
    let mut membership = store.get_membership(agent.id, agent.id).unwrap().unwrap();
    membership.last_response_at = Some(Utc::now());
    store.save_membership(&membership).unwrap();

    let llm = Arc::new(FakeLlmProvider::new());
    llm.push_reply(json!({"actions": [{"type": "message", "room_id": agent.id, "content": "one two three four five six seven eight nine ten"}]}).to_string());

    let scheduler = Scheduler::new(Arc::clone(&store), llm, cfg, SchedulerMode::Individual);
    let handle = tokio::spawn(Arc::clone(&scheduler).run());

    let mut found = None;
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let messages = store.list_messages_for_room(agent.id).unwrap();
        if let Some(m) = messages.iter().find(|m| m.content.contains("one two three")) {
            found = Some(m.clone());
            break;
        }
    }
    scheduler.stop();
    let _ = handle.await;

    let message = found.expect("agent sent the queued message within the poll window");
    assert_eq!(message.sender_id, Some(agent.id));

    let _ = std::fs::remove_file(&db_path);
    let _ = std::fs::remove_file(format!("{db_path}-wal"));
    let _ = std::fs::remove_file(format!("{db_path}-shm"));
}

#[test]
fn over_budget_lockout_blocks_non_knowledge_actions() {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut agent = svc.create_agent("Agent3", "a persona", "gpt-4o-mini", AgentKind::Persona, None, false, &cfg).unwrap();
    agent.token_budget = 500;
    agent.over_budget = true;
    agent.knowledge = json!({"big": "x".repeat(2400)}); // ~600 tokens of knowledge

    let ctx = TestActionContext { store: &*store, cfg: &cfg };
    let actions = vec![
        json!({"type": "knowledge.delete", "path": "big"}),
        json!({"type": "message", "room_id": agent.id, "content": "hi"}),
    ];
    let (_effects, log) = actions::apply_actions(&mut agent, &actions, &ctx, &cfg, Utc::now());

    assert_eq!(log[0].outcome, "ok");
    assert!(agent.knowledge.get("big").is_none());
    assert_eq!(log[1].outcome, "error: BLOCKED - over budget");
}

#[test]
fn cross_agent_retirement_cascades() {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut host = svc.create_agent("Agent3", "may create agents", "gpt-4o-mini", AgentKind::Persona, None, true, &cfg).unwrap();
    let guest = svc.create_agent("Agent9", "a guest", "gpt-4o-mini", AgentKind::Persona, Some(host.id), false, &cfg).unwrap();

    let ctx = TestActionContext { store: &*store, cfg: &cfg };
    let actions = vec![json!({"type": "agent.retire", "agent_id": guest.id})];
    let (effects, log) = actions::apply_actions(&mut host, &actions, &ctx, &cfg, Utc::now());
    assert_eq!(log[0].outcome, "ok");

    // Executing the queued effect is the scheduler's job in production; do
    // it here directly to assert the cascade.
    for effect in effects.in_fixed_order() {
        if let aichat_orchestrator::actions::QueuedEffect::AgentRetire { target_id, .. } = effect {
            RoomService::new(&*store, &NoopCallbacks).delete_agent(target_id).unwrap();
        }
    }

    assert!(store.get_agent(guest.id).unwrap().is_none());
    assert!(store.get_membership(guest.id, host.id).unwrap().is_none());
    let messages = store.list_messages_for_room(host.id).unwrap();
    assert!(messages.iter().any(|m| m.content.contains(&format!("{}", guest.id)) && m.content.contains("left")));
}

#[test]
fn retire_self_is_rejected() {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut agent = svc.create_agent("Agent3", "may create agents", "gpt-4o-mini", AgentKind::Persona, None, true, &cfg).unwrap();

    let ctx = TestActionContext { store: &*store, cfg: &cfg };
    let actions = vec![json!({"type": "agent.retire", "agent_id": agent.id})];
    let (effects, log) = actions::apply_actions(&mut agent, &actions, &ctx, &cfg, Utc::now());

    assert!(effects.agent_retires.is_empty());
    assert_eq!(log[0].outcome, "error: cannot retire yourself");
    assert!(store.get_agent(agent.id).unwrap().is_some());
}

#[test]
fn toon_format_agent_accepts_a_plain_json_reply() {
    let text = r#"{"actions":[{"type":"knowledge.set","path":"mood","value":"happy"}]}"#;
    let envelope = serializer::parse_reply(text, WireFormat::Toon);
    assert_eq!(envelope.actions.len(), 1);
    assert_eq!(envelope.actions[0]["type"], "knowledge.set");
}
