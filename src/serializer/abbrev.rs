//! Abbreviated-key JSON (§4.3 item 2): same structure as verbose JSON with a
//! fixed, reversible short-key dictionary. The dictionary is total over
//! every key the HUD builder emits and bijective.
use serde_json::{Map, Value};

/// (full key, abbreviation). Every key the HUD builder or the action
/// catalog/reply schema emits appears exactly once; every abbreviation is
/// likewise unique, so the map is reversible in both directions.
const DICTIONARY: &[(&str, &str)] = &[
    ("system", "sys"),
    ("directives", "dir"),
    ("your_agent_id", "yid"),
    ("memory", "mem"),
    ("total", "tot"),
    ("free", "fre"),
    ("meta", "met"),
    ("current_time", "now"),
    ("instructions", "ins"),
    ("available_actions", "cat"),
    ("name", "nm"),
    ("inputs", "inp"),
    ("response_format", "rfmt"),
    ("type", "typ"),
    ("description", "dsc"),
    ("example", "ex"),
    ("agents", "ags"),
    ("id", "id"),
    ("model", "mdl"),
    ("seed", "sd"),
    ("knowledge", "kn"),
    ("recent_actions", "ra"),
    ("kind", "knd"),
    ("params", "prm"),
    ("outcome", "oc"),
    ("timestamp", "ts"),
    ("agent_rooms", "arm"),
    ("agent_id", "aid"),
    ("members", "mbr"),
    ("messages", "msgs"),
    ("billboard", "bb"),
    ("warnings", "wrn"),
    ("sender_agent_id", "said"),
    ("sender_name", "snm"),
    ("content", "cnt"),
    ("reply_to", "rpl"),
    ("path", "pth"),
    ("value", "val"),
    ("room_id", "rid"),
    ("wpm", "wpm"),
    ("until", "unt"),
    ("background_prompt", "bgp"),
    ("agent_type", "atyp"),
    ("in_room_id", "irid"),
    ("actions", "act"),
];

fn abbreviate_key(key: &str) -> String {
    DICTIONARY
        .iter()
        .find(|(full, _)| *full == key)
        .map(|(_, short)| short.to_string())
        .unwrap_or_else(|| key.to_string())
}

fn expand_key(key: &str) -> String {
    DICTIONARY
        .iter()
        .find(|(_, short)| *short == key)
        .map(|(full, _)| full.to_string())
        .unwrap_or_else(|| key.to_string())
}

pub fn abbreviate(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(abbreviate_key(k), abbreviate(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(abbreviate).collect()),
        other => other.clone(),
    }
}

pub fn expand(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(expand_key(k), expand(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(expand).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn dictionary_keys_are_unique() {
        let keys: HashSet<&str> = DICTIONARY.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), DICTIONARY.len());
    }

    #[test]
    fn dictionary_abbreviations_are_unique() {
        let shorts: HashSet<&str> = DICTIONARY.iter().map(|(_, v)| *v).collect();
        assert_eq!(shorts.len(), DICTIONARY.len());
    }

    #[test]
    fn abbreviate_then_expand_round_trips() {
        let doc = json!({
            "system": {"your_agent_id": 3, "memory": {"total": 100, "free": 50}},
            "agents": [{"id": 3, "name": "Alice", "recent_actions": []}]
        });
        let round_tripped = expand(&abbreviate(&doc));
        assert_eq!(round_tripped, doc);
    }

    #[test]
    fn unknown_keys_pass_through_unabbreviated() {
        assert_eq!(abbreviate_key("totally_unknown_key"), "totally_unknown_key");
    }
}
