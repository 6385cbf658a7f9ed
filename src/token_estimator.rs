//! Token Estimator (§4.2): a single deterministic, cheap function. Called
//! tens of times per HUD build, so it must stay allocation-light.

/// `⌊chars/4⌋ + 1` for non-empty strings, 0 for the empty string.
pub fn estimate_tokens_str(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    s.chars().count() / 4 + 1
}

/// Estimate tokens for a structured value via its canonical JSON rendering.
pub fn estimate_tokens_value(value: &serde_json::Value) -> usize {
    estimate_tokens_str(&value.to_string())
}
