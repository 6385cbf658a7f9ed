//! A polling/HUD/action orchestrator for a population of LLM-driven chat
//! agents. Each agent *is* a room it owns; the scheduler ticks agents
//! (individually or in model-grouped batches), hands each one a
//! token-budgeted view of its rooms and knowledge, and applies whatever
//! actions the reply carries back through a validate-then-apply pipeline.
pub mod actions;
pub mod budgeter;
pub mod config;
pub mod error;
pub mod hud;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod recent_actions;
pub mod room_service;
pub mod scheduler;
pub mod serializer;
pub mod token_estimator;

pub use config::OrchestratorConfig;
pub use error::{CoreError, CoreResult};
pub use scheduler::{Scheduler, SchedulerMode};
