//! Structured logging init. The teacher reaches for `println!`/`eprintln!`;
//! a scheduler juggling many concurrently-ticking agents needs leveled,
//! filterable output instead, so this crate standardizes on `tracing`.
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber once. Honors `RUST_LOG`, defaulting to
/// `info` for this crate and `warn` for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
