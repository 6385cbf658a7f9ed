//! TOON (Token-Oriented Object Notation) serializer/parser (§4.3 item 3,
//! §6.4). A positional, schema-first form optimized for low token count in
//! LLM payloads.
//!
//! The document grammar (§6.4) is recursive over scalar/array/object, but a
//! HUD document is really a sequence of independently-named top-level
//! sections (`system{...}: ...`, `rooms[2]{...}:` ...), matching the worked
//! example in the original HUD instructions. We serialize/parse the
//! top level as a sequence of named blocks and recurse from there; nested
//! object/array values reuse the same block grammar inline, exactly as
//! shown in the worked example (`messages[1]{...}: ...` embedded as a row
//! field's value).
use serde_json::{Map, Number, Value};

pub fn to_toon(doc: &Value) -> String {
    let Some(obj) = doc.as_object() else {
        return serialize_value(doc);
    };
    obj.iter()
        .map(|(k, v)| serialize_named_block(k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn serialize_named_block(name: &str, value: &Value) -> String {
    match value {
        Value::Object(map) => serialize_object_block(name, map),
        Value::Array(items) => serialize_array_block(name, items),
        other => format!("{name}: {}", serialize_value(other)),
    }
}

fn serialize_object_block(name: &str, map: &Map<String, Value>) -> String {
    let fields: Vec<&String> = map.keys().collect();
    let field_list = fields.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(",");
    let values = fields
        .iter()
        .map(|f| serialize_field_value(f, &map[*f]))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{name}{{{field_list}}}: {values}")
}

/// A field's value inline, used both at the top of an object block and
/// within a row. Nested arrays-of-objects use the field name itself as the
/// nested block's declared name (matching the worked example where the
/// `messages` field's value is `messages[1]{...}: ...`); a plain nested
/// object does the same (`field{k1,k2}: v1, v2`) so it round-trips as a
/// structured block instead of collapsing to an opaque string.
fn serialize_field_value(field: &str, value: &Value) -> String {
    match value {
        Value::Array(items) if is_homogeneous_object_array(items) => serialize_array_block(field, items),
        Value::Object(map) => serialize_object_block(field, map),
        _ => serialize_value(value),
    }
}

fn is_homogeneous_object_array(items: &[Value]) -> bool {
    if items.is_empty() {
        return true;
    }
    let Some(Value::Object(first)) = items.first() else {
        return false;
    };
    let keys: Vec<&String> = first.keys().collect();
    items.iter().all(|v| match v {
        Value::Object(m) => m.keys().collect::<Vec<_>>() == keys,
        _ => false,
    })
}

fn serialize_array_block(name: &str, items: &[Value]) -> String {
    if is_homogeneous_object_array(items) {
        let fields: Vec<String> = match items.first() {
            Some(Value::Object(first)) => first.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let header = format!("{name}[{}]{{{}}}:", items.len(), fields.join(","));
        if items.is_empty() {
            return header;
        }
        let rows: Vec<String> = items
            .iter()
            .map(|item| {
                let Value::Object(map) = item else { unreachable!() };
                fields
                    .iter()
                    .map(|f| serialize_field_value(f, map.get(f).unwrap_or(&Value::Null)))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        format!("{header}\n{}", rows.iter().map(|r| format!("  {r}")).collect::<Vec<_>>().join("\n"))
    } else {
        // Fallback for non-homogeneous / scalar arrays: a named bracket list (§4.3).
        format!("{name}: {}", serialize_value(&Value::Array(items.to_vec())))
    }
}

fn serialize_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serialize_scalar_string(s),
        Value::Array(items) => {
            let inner = items.iter().map(serialize_value).collect::<Vec<_>>().join(", ");
            format!("[{inner}]")
        }
        Value::Object(map) => {
            // An unnamed nested object (no field context): render as an
            // anonymous block body so it still round-trips as a string
            // scalar when embedded inside a bracket array.
            let fields: Vec<&String> = map.keys().collect();
            let field_list = fields.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(",");
            let values = fields
                .iter()
                .map(|f| serialize_value(&map[*f]))
                .collect::<Vec<_>>()
                .join(", ");
            serialize_scalar_string(&format!("{{{field_list}}}: {values}"))
        }
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.contains(',')
        || s.contains('{')
        || s.contains('}')
        || s.contains(':')
        || s.contains('\n')
        || s.contains('[')
        || s.contains(']')
        || s == "true"
        || s == "false"
        || s == "null"
        || s.parse::<f64>().is_ok()
}

fn serialize_scalar_string(s: &str) -> String {
    if needs_quoting(s) {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            match c {
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
        out.push('"');
        out
    } else {
        s.to_string()
    }
}

// --- Parsing ---

#[derive(Debug, thiserror::Error)]
pub enum TooError {
    #[error("unexpected end of input")]
    Eof,
    #[error("unexpected token at position {0}")]
    Unexpected(usize),
    #[error("expected '{0}'")]
    Expected(char),
}

pub fn from_toon(text: &str) -> Result<Value, TooError> {
    let mut lexer = Lexer::new(text);
    let mut map = Map::new();
    lexer.skip_ws();
    while !lexer.at_eof() {
        let (name, value) = parse_named_block(&mut lexer)?;
        map.insert(name, value);
        lexer.skip_ws();
    }
    Ok(Value::Object(map))
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, c: char) -> Result<(), TooError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(TooError::Expected(c))
        }
    }

    /// A bare identifier: letters, digits, underscore, dash, dot (for floats
    /// handled separately) — anything up to a structural character.
    fn read_ident(&mut self) -> Result<String, TooError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '{' | '}' | '[' | ']' | ':' | ',') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(TooError::Unexpected(self.pos));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn read_quoted(&mut self) -> Result<String, TooError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump().ok_or(TooError::Eof)? {
                '"' => break,
                '\\' => match self.bump().ok_or(TooError::Eof)? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    other => out.push(other),
                },
                c => out.push(c),
            }
        }
        Ok(out)
    }
}

fn parse_named_block(lexer: &mut Lexer) -> Result<(String, Value), TooError> {
    let name = lexer.read_ident()?;
    lexer.skip_ws();
    match lexer.peek() {
        Some('[') => {
            lexer.pos += 1;
            lexer.skip_ws();
            let n_str = lexer.read_ident()?;
            let n: usize = n_str.parse().map_err(|_| TooError::Unexpected(lexer.pos))?;
            lexer.expect(']')?;
            lexer.expect('{')?;
            let fields = parse_field_list(lexer)?;
            lexer.expect('}')?;
            lexer.expect(':')?;
            let mut rows = Vec::with_capacity(n);
            for _ in 0..n {
                let mut obj = Map::new();
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        lexer.skip_ws();
                        if lexer.peek() == Some(',') {
                            lexer.pos += 1;
                        }
                    }
                    let value = parse_value(lexer)?;
                    obj.insert(field.clone(), value);
                }
                rows.push(Value::Object(obj));
                lexer.skip_ws();
                if lexer.peek() == Some(',') {
                    lexer.pos += 1;
                }
            }
            Ok((name, Value::Array(rows)))
        }
        Some('{') => {
            lexer.pos += 1;
            let fields = parse_field_list(lexer)?;
            lexer.expect('}')?;
            lexer.expect(':')?;
            let mut obj = Map::new();
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    lexer.skip_ws();
                    if lexer.peek() == Some(',') {
                        lexer.pos += 1;
                    }
                }
                let value = parse_value(lexer)?;
                obj.insert(field.clone(), value);
            }
            Ok((name, Value::Object(obj)))
        }
        _ => {
            lexer.expect(':')?;
            let value = parse_value(lexer)?;
            Ok((name, value))
        }
    }
}

fn parse_field_list(lexer: &mut Lexer) -> Result<Vec<String>, TooError> {
    let mut fields = Vec::new();
    lexer.skip_ws();
    if lexer.peek() == Some('}') {
        return Ok(fields);
    }
    loop {
        fields.push(lexer.read_ident()?);
        lexer.skip_ws();
        if lexer.peek() == Some(',') {
            lexer.pos += 1;
        } else {
            break;
        }
    }
    Ok(fields)
}

fn parse_value(lexer: &mut Lexer) -> Result<Value, TooError> {
    lexer.skip_ws();
    match lexer.peek() {
        Some('"') => Ok(Value::String(lexer.read_quoted()?)),
        Some('[') => {
            lexer.pos += 1;
            let mut items = Vec::new();
            lexer.skip_ws();
            if lexer.peek() == Some(']') {
                lexer.pos += 1;
                return Ok(Value::Array(items));
            }
            loop {
                items.push(parse_value(lexer)?);
                lexer.skip_ws();
                match lexer.peek() {
                    Some(',') => {
                        lexer.pos += 1;
                    }
                    Some(']') => {
                        lexer.pos += 1;
                        break;
                    }
                    _ => return Err(TooError::Expected(']')),
                }
            }
            Ok(Value::Array(items))
        }
        Some(c) if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' => {
            // Could be a scalar, or a nested named block (e.g. `messages[1]{...}: ...`)
            // embedded inline as a field's value.
            let save = lexer.pos;
            let ident = lexer.read_ident()?;
            if matches!(lexer.peek(), Some('[') | Some('{')) {
                lexer.pos = save;
                let (_, value) = parse_named_block(lexer)?;
                return Ok(value);
            }
            Ok(parse_bare_scalar(&ident))
        }
        _ => Err(TooError::Unexpected(lexer.pos)),
    }
}

fn parse_bare_scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                Value::Number(Number::from(n))
            } else if let Ok(f) = raw.parse::<f64>() {
                Number::from_f64(f).map(Value::Number).unwrap_or_else(|| Value::String(raw.to_string()))
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_simple_object_block() {
        let doc = json!({"system": {"your_agent_id": 3}});
        let toon = to_toon(&doc);
        assert_eq!(toon, "system{your_agent_id}: 3");
    }

    #[test]
    fn serialize_empty_array_block() {
        let doc = json!({"messages": []});
        assert_eq!(to_toon(&doc), "messages[0]{}:");
    }

    #[test]
    fn round_trip_object_block() {
        let doc = json!({"system": {"your_agent_id": 3}});
        let toon = to_toon(&doc);
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn round_trip_array_of_objects() {
        let doc = json!({
            "rooms": [
                {"id": 1, "name": "general"},
                {"id": 2, "name": "random"}
            ]
        });
        let toon = to_toon(&doc);
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn round_trip_nested_array_of_objects_field() {
        let doc = json!({
            "agent_rooms": [
                {
                    "agent_id": 1,
                    "members": [3, 7],
                    "messages": [
                        {"sender_agent_id": 7, "sender_name": "Bob", "content": "Hello!"}
                    ]
                },
                {
                    "agent_id": 2,
                    "members": [3],
                    "messages": []
                }
            ]
        });
        let toon = to_toon(&doc);
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn round_trip_quoted_string_with_special_chars() {
        let doc = json!({"system": {"directives": "line one, has: special {chars}\nand a newline"}});
        let toon = to_toon(&doc);
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn round_trip_nested_plain_object_field() {
        let doc = json!({
            "agents": [
                {"id": 1, "name": "Alice", "knowledge": {"mood": "curious", "notes": ["first", "second"]}}
            ]
        });
        let toon = to_toon(&doc);
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn round_trip_scalar_array_field() {
        let doc = json!({"warnings": ["rooms monitor at 80%", "knowledge monitor at 92%"]});
        let toon = to_toon(&doc);
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn numeric_strings_get_quoted_to_preserve_string_type() {
        let doc = json!({"meta": {"current_time": "12345"}});
        let toon = to_toon(&doc);
        assert!(toon.contains("\"12345\""));
        let parsed = from_toon(&toon).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn worked_example_from_instructions_parses() {
        let text = "system{your_agent_id}: 3\nagent{id,name,model}: 3, Alice, gpt-4o-mini\nrooms[2]{id,members,messages}:\n  1, [3, 7], messages[1]{sender_agent_id,sender_name,content}: 7, Bob, Hello!\n  2, [3], messages[0]{}:";
        let parsed = from_toon(text).unwrap();
        assert_eq!(parsed["system"]["your_agent_id"], json!(3));
        assert_eq!(parsed["agent"]["name"], json!("Alice"));
        let rooms = parsed["rooms"].as_array().unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0]["members"], json!([3, 7]));
        assert_eq!(rooms[0]["messages"][0]["sender_name"], json!("Bob"));
        assert_eq!(rooms[1]["messages"], json!([]));
    }
}
