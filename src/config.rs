//! Orchestrator-wide configuration. Shape mirrors the teacher's
//! `rate_limit::RateLimitConfig`: a `Default` impl carrying the spec's
//! defaults, overridden by environment variables read once at startup.
use std::env;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default per-monitor allocation percentages (§4.4): knowledge, recent_actions, rooms.
    pub default_knowledge_pct: u32,
    pub default_recent_actions_pct: u32,
    pub default_rooms_pct: u32,
    /// Auto-shrink floor for rooms/recent_actions (§4.4). Knowledge is sacred and never shrunk.
    pub auto_shrink_floor_pct: u32,
    /// Warning/critical thresholds as a fraction of a monitor's or the HUD's budget (§4.5).
    pub warning_threshold_pct: u32,
    pub critical_threshold_pct: u32,
    /// Fixed per-room overhead reserve subtracted from a room's budget before admitting
    /// messages (§4.5).
    pub room_overhead_reserve_tokens: usize,
    /// Capacity of the recent-action ring per agent (§3).
    pub recent_action_ring_capacity: usize,
    /// Scheduler jitter bounds (§4.7): initial stagger window and per-tick interval jitter.
    pub initial_stagger_min_secs: f64,
    pub initial_stagger_max_secs: f64,
    pub interval_jitter_fraction: f64,
    /// Pull-forward window (§4.7 step 5).
    pub pull_forward_window_secs: f64,
    /// Heartbeat interval decay step applied after each successful tick (§4.6).
    pub decay_step_secs: f64,
    pub min_heartbeat_secs: f64,
    pub max_heartbeat_secs: f64,
    /// Reaction-induced interval nudge step (§4.6, optional feedback).
    pub reaction_nudge_step_secs: f64,
    /// LLM call timeout and retry policy (§6.2).
    pub llm_call_timeout_secs: u64,
    pub llm_retry_base_delay_ms: u64,
    pub llm_retry_max_attempts: u32,
    /// Typing-wait poll granularity (§5).
    pub typing_poll_interval_ms: u64,
    /// Scheduler outer loop wake granularity (§4.7 step, ≤100ms).
    pub scheduler_tick_ms: u64,
    /// Allow-list enforced by `agent.create` (§4.6 Gate 2) and the model
    /// that action falls back to when none is given.
    pub allowed_models: Vec<String>,
    pub default_model: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_knowledge_pct: 30,
            default_recent_actions_pct: 10,
            default_rooms_pct: 60,
            auto_shrink_floor_pct: 5,
            warning_threshold_pct: 75,
            critical_threshold_pct: 90,
            room_overhead_reserve_tokens: 200,
            recent_action_ring_capacity: 20,
            initial_stagger_min_secs: 0.5,
            initial_stagger_max_secs: 2.0,
            interval_jitter_fraction: 0.2,
            pull_forward_window_secs: 1.5,
            decay_step_secs: 0.1,
            min_heartbeat_secs: 1.0,
            max_heartbeat_secs: 10.0,
            reaction_nudge_step_secs: 0.5,
            llm_call_timeout_secs: 30,
            llm_retry_base_delay_ms: 500,
            llm_retry_max_attempts: 5,
            typing_poll_interval_ms: 500,
            scheduler_tick_ms: 100,
            allowed_models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string(), "claude-sonnet".to_string()],
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Build from environment variables, falling back to spec defaults.
    /// Each override is parsed defensively, matching the teacher's
    /// `if let Ok(val) = env::var(..) && let Ok(n) = val.parse() { .. }` idiom.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("ORCH_RECENT_ACTION_RING_CAPACITY")
            && let Ok(n) = val.parse::<usize>()
        {
            config.recent_action_ring_capacity = n;
        }
        if let Ok(val) = env::var("ORCH_WARNING_THRESHOLD_PCT")
            && let Ok(n) = val.parse::<u32>()
        {
            config.warning_threshold_pct = n;
        }
        if let Ok(val) = env::var("ORCH_CRITICAL_THRESHOLD_PCT")
            && let Ok(n) = val.parse::<u32>()
        {
            config.critical_threshold_pct = n;
        }
        if let Ok(val) = env::var("ORCH_AUTO_SHRINK_FLOOR_PCT")
            && let Ok(n) = val.parse::<u32>()
        {
            config.auto_shrink_floor_pct = n;
        }
        if let Ok(val) = env::var("ORCH_LLM_CALL_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.llm_call_timeout_secs = n;
        }
        if let Ok(val) = env::var("ORCH_LLM_RETRY_MAX_ATTEMPTS")
            && let Ok(n) = val.parse::<u32>()
        {
            config.llm_retry_max_attempts = n;
        }
        if let Ok(val) = env::var("ORCH_SCHEDULER_TICK_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.scheduler_tick_ms = n;
        }
        if let Ok(val) = env::var("ORCH_PULL_FORWARD_WINDOW_SECS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.pull_forward_window_secs = n;
        }
        if let Ok(val) = env::var("ORCH_ALLOWED_MODELS") {
            config.allowed_models = val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(val) = env::var("ORCH_DEFAULT_MODEL") {
            config.default_model = val;
        }

        config
    }

    pub fn clamp_heartbeat(&self, secs: f64) -> f64 {
        secs.clamp(self.min_heartbeat_secs, self.max_heartbeat_secs)
    }
}
