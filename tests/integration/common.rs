use std::collections::VecDeque;
use std::sync::Mutex;

use aichat_orchestrator::actions::ActionContext;
use aichat_orchestrator::config::OrchestratorConfig;
use aichat_orchestrator::llm::{LlmError, LlmProvider, LlmResponse};
use aichat_orchestrator::persistence::{SqliteStore, Store};
use aichat_orchestrator::room_service;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Wrapper around `SqliteStore` that auto-deletes the temp DB on drop.
/// Mirrors the teacher's `TestClient`: `Option<SqliteStore>` so the
/// connection is released before the file is removed.
pub struct TestStore {
    store: Option<SqliteStore>,
    db_path: String,
}

impl Drop for TestStore {
    fn drop(&mut self) {
        drop(self.store.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestStore {
    type Target = SqliteStore;
    fn deref(&self) -> &SqliteStore {
        self.store.as_ref().unwrap()
    }
}

pub fn test_store() -> TestStore {
    let db_path = format!("/tmp/orch_test_{}.db", uuid::Uuid::new_v4().to_string().split('-').next().unwrap());
    let store = SqliteStore::open(&db_path).expect("valid sqlite store");
    TestStore { store: Some(store), db_path }
}

/// A hand-written `LlmProvider` test double: queues canned reply bodies and
/// hands them out in order, falling back to an empty action list once
/// exhausted. No mocking framework, matching the teacher's in-process test
/// doubles (`PresenceTracker`, `TypingTracker`).
pub struct FakeLlmProvider {
    replies: Mutex<VecDeque<String>>,
}

impl FakeLlmProvider {
    pub fn new() -> Self {
        Self { replies: Mutex::new(VecDeque::new()) }
    }

    pub fn push_reply(&self, body: impl Into<String>) {
        self.replies.lock().unwrap().push_back(body.into());
    }
}

#[async_trait]
impl LlmProvider for FakeLlmProvider {
    async fn send(&self, _model: &str, _instructions: &str, _input: &str, _previous_response_id: Option<&str>) -> Result<LlmResponse, LlmError> {
        let text = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| r#"{"actions":[]}"#.to_string());
        Ok(LlmResponse { text, response_id: None, tokens_used: Some(1) })
    }
}

/// A `Store`-backed `ActionContext`, mirroring the scheduler's own
/// (private) `StoreActionContext` so action-executor tests see the same
/// membership/proximity rules the scheduler would apply.
pub struct TestActionContext<'a> {
    pub store: &'a dyn Store,
    pub cfg: &'a OrchestratorConfig,
}

impl ActionContext for TestActionContext<'_> {
    fn is_member_of(&self, agent_id: i64, room_id: i64) -> bool {
        matches!(self.store.get_membership(agent_id, room_id), Ok(Some(_)))
    }

    fn shares_room_with(&self, agent_id: i64, other_id: i64) -> bool {
        room_service::shares_room_with(self.store, agent_id, other_id).unwrap_or(false)
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
