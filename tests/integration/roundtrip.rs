// Round-trip/idempotence laws (§8).
use aichat_orchestrator::config::OrchestratorConfig;
use aichat_orchestrator::hud::{self, HudInputs};
use aichat_orchestrator::knowledge::KnowledgeDoc;
use aichat_orchestrator::models::AgentKind;
use aichat_orchestrator::room_service::{NoopCallbacks, RoomService};
use aichat_orchestrator::serializer::{self, WireFormat};
use chrono::Utc;
use serde_json::json;

use crate::common::test_store;

fn sample_hud_value(format: WireFormat) -> serde_json::Value {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let mut agent = svc.create_agent("Alice", "a curious persona", "gpt-4o-mini", AgentKind::Persona, None, false, &cfg).unwrap();
    agent.wire_format = format;
    agent.knowledge = json!({"mood": "curious", "notes": ["first", "second"]});

    hud::build(HudInputs {
        agent: &agent,
        rooms: vec![],
        recent_actions: &[],
        now: Utc::now(),
        cfg: &cfg,
        batched: false,
    })
    .value
}

#[test]
fn verbose_json_round_trips() {
    let doc = sample_hud_value(WireFormat::VerboseJson);
    let wire = serializer::serialize_hud(&doc, WireFormat::VerboseJson);
    let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
    assert_eq!(parsed, doc);
}

#[test]
fn abbreviated_json_round_trips_via_expand() {
    use aichat_orchestrator::serializer::abbrev;

    let doc = sample_hud_value(WireFormat::AbbreviatedJson);
    let wire = serializer::serialize_hud(&doc, WireFormat::AbbreviatedJson);
    let abbreviated: serde_json::Value = serde_json::from_str(&wire).unwrap();
    let expanded = abbrev::expand(&abbreviated);
    assert_eq!(expanded, doc);
}

#[test]
fn toon_round_trips() {
    use aichat_orchestrator::serializer::toon;

    let doc = sample_hud_value(WireFormat::Toon);
    let wire = toon::to_toon(&doc);
    let parsed = toon::from_toon(&wire).expect("valid toon document");
    assert_eq!(parsed, doc);
}

#[test]
fn knowledge_set_then_get_returns_the_value() {
    let mut root = json!({});
    let mut doc = KnowledgeDoc::new(&mut root);
    doc.set("profile.name", json!("Alice")).unwrap();
    assert_eq!(doc.get("profile.name").unwrap(), Some(&json!("Alice")));
}

#[test]
fn knowledge_delete_then_get_returns_absent() {
    let mut root = json!({"mood": "happy"});
    let mut doc = KnowledgeDoc::new(&mut root);
    doc.delete("mood").unwrap();
    assert_eq!(doc.get("mood").unwrap(), None);
}

#[test]
fn knowledge_append_then_get_last_returns_the_appended_value() {
    let mut root = json!({"notes": ["first"]});
    let mut doc = KnowledgeDoc::new(&mut root);
    doc.append("notes", json!("second")).unwrap();
    let notes = doc.get("notes").unwrap().unwrap().as_array().unwrap();
    assert_eq!(notes.last().unwrap(), &json!("second"));
}

#[test]
fn join_is_idempotent() {
    let store = test_store();
    let cfg = OrchestratorConfig::default();
    let svc = RoomService::new(&*store, &NoopCallbacks);
    let host = svc.create_agent("Host", "p", "m", AgentKind::Persona, None, false, &cfg).unwrap();
    let guest = svc.create_agent("Guest", "p", "m", AgentKind::Persona, None, false, &cfg).unwrap();

    let first = svc.join(guest.id, host.id).unwrap();
    let second = svc.join(guest.id, host.id).unwrap();
    assert_eq!(first.joined_at_seq, second.joined_at_seq);
    assert_eq!(first.joined_at, second.joined_at);
}
