//! Serializer (§4.3): renders a HUD document in one of three wire forms and
//! parses agent replies from the same set. Parsing never raises — failure
//! yields an empty action list and an empty response list (§4.3, §7).
pub mod abbrev;
pub mod toon;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    VerboseJson,
    AbbreviatedJson,
    Toon,
}

/// Render a HUD document (already assembled as a JSON object by the HUD
/// builder) in the requested wire format.
pub fn serialize_hud(doc: &Value, format: WireFormat) -> String {
    match format {
        WireFormat::VerboseJson => serde_json::to_string_pretty(doc).unwrap_or_default(),
        WireFormat::AbbreviatedJson => {
            let abbreviated = abbrev::abbreviate(doc);
            serde_json::to_string_pretty(&abbreviated).unwrap_or_default()
        }
        WireFormat::Toon => toon::to_toon(doc),
    }
}

/// A parsed reply envelope: either a flat action list, or (in batched mode)
/// a per-agent action list keyed by agent id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyEnvelope {
    pub actions: Vec<Value>,
    pub per_agent_actions: Vec<(i64, Vec<Value>)>,
}

/// Parse an agent's raw reply text. Accepts JSON or TOON depending on the
/// agent's configured output format; if TOON parsing fails, a JSON fallback
/// is attempted (first as the whole text, then by extracting the largest
/// `{...}` substring). Never raises: a fully unparseable reply yields an
/// empty envelope (§4.3, §7 "Malformed reply").
pub fn parse_reply(text: &str, format: WireFormat) -> ReplyEnvelope {
    let value = match format {
        WireFormat::Toon => toon::from_toon(text).ok().or_else(|| parse_json_fallback(text)),
        WireFormat::VerboseJson | WireFormat::AbbreviatedJson => parse_json_fallback(text),
    };

    let Some(value) = value else {
        return ReplyEnvelope::default();
    };
    let value = abbrev::expand(&value);
    envelope_from_value(&value)
}

fn parse_json_fallback(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    extract_largest_brace_block(text).and_then(|s| serde_json::from_str(&s).ok())
}

/// Extract the largest balanced `{...}` substring, tolerating braces inside
/// quoted strings.
fn extract_largest_brace_block(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut best: Option<(usize, usize)> = None;
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push(i),
            '}' => {
                if let Some(start) = stack.pop()
                    && stack.is_empty()
                {
                    let len = i - start;
                    let better = match best {
                        Some((bs, be)) => len > be - bs,
                        None => true,
                    };
                    if better {
                        best = Some((start, i));
                    }
                }
            }
            _ => {}
        }
    }

    best.map(|(s, e)| chars[s..=e].iter().collect())
}

fn envelope_from_value(value: &Value) -> ReplyEnvelope {
    let mut envelope = ReplyEnvelope::default();
    let Some(obj) = value.as_object() else {
        return envelope;
    };
    if let Some(Value::Array(actions)) = obj.get("actions") {
        envelope.actions = actions.clone();
    }
    if let Some(Value::Array(agents)) = obj.get("agents") {
        for entry in agents {
            let Some(entry_obj) = entry.as_object() else { continue };
            let Some(agent_id) = entry_obj.get("agent_id").and_then(Value::as_i64) else { continue };
            let actions = match entry_obj.get("actions") {
                Some(Value::Array(a)) => a.clone(),
                _ => Vec::new(),
            };
            envelope.per_agent_actions.push((agent_id, actions));
        }
    }
    envelope
}
