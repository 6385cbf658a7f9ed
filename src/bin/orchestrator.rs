//! Binary entry point. Loads configuration from the environment, opens the
//! SQLite store, wires up an LLM provider, and runs the scheduler until
//! ctrl-c.
use std::env;
use std::sync::Arc;

use aichat_orchestrator::config::OrchestratorConfig;
use aichat_orchestrator::llm::{LlmProvider, ReqwestLlmProvider};
use aichat_orchestrator::persistence::{SqliteStore, Store};
use aichat_orchestrator::scheduler::{Scheduler, SchedulerMode};
use aichat_orchestrator::{logging, models};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let cfg = OrchestratorConfig::from_env();

    let db_path = env::var("ORCH_DB_PATH").unwrap_or_else(|_| "orchestrator.sqlite3".to_string());
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path)?);
    ensure_architect(store.as_ref(), &cfg)?;

    let endpoint = env::var("ORCH_LLM_ENDPOINT").unwrap_or_else(|_| "https://api.openai.com/v1/responses".to_string());
    let api_key = env::var("ORCH_LLM_API_KEY").unwrap_or_default();
    let llm: Arc<dyn LlmProvider> = Arc::new(ReqwestLlmProvider::new(endpoint, api_key, &cfg)?);

    let mode = match env::var("ORCH_SCHEDULER_MODE").as_deref() {
        Ok("batched") => SchedulerMode::Batched,
        _ => SchedulerMode::Individual,
    };

    info!(?mode, db_path, "starting orchestrator");

    let scheduler = Scheduler::new(store, llm, cfg, mode);
    let run_handle = tokio::spawn(Arc::clone(&scheduler).run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "unable to listen for shutdown signal"),
    }

    scheduler.stop();
    let _ = run_handle.await;
    Ok(())
}

/// The population always has exactly one architect agent (§3 invariants).
/// On a fresh store, seed it so the scheduler has something pollable.
fn ensure_architect(store: &dyn Store, cfg: &OrchestratorConfig) -> Result<(), Box<dyn std::error::Error>> {
    if store.get_architect()?.is_some() {
        return Ok(());
    }
    let id = store.list_agents()?.iter().map(|a| a.id).max().unwrap_or(0) + 1;
    let mut architect = models::Agent::new(id, "Architect", models::AgentKind::Persona, cfg);
    architect.is_architect = true;
    architect.may_create_agents = true;
    architect.model = cfg.default_model.clone();
    store.save_agent(&architect)?;
    let membership = models::Membership::new_self(id, chrono::Utc::now(), 0);
    store.save_membership(&membership)?;
    Ok(())
}
