//! Knowledge Store (§4.1): a path-addressable mutable tree over the same
//! `serde_json::Value` shape the teacher already uses for `Message.metadata`.
//! Dot-paths may quote a segment (single or double quotes) to allow literal
//! dots inside a key.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("unterminated quote in path")]
    UnterminatedQuote,
    #[error("empty path segment")]
    EmptySegment,
}

/// Parse a dot-path into segments. An empty string parses to an empty path
/// (denoting the whole document, per §4.1 `get`).
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match in_quote {
            Some(q) if c == q => in_quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => in_quote = Some(c),
                '.' => {
                    if current.is_empty() {
                        return Err(PathError::EmptySegment);
                    }
                    segments.push(make_segment(&current));
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    if in_quote.is_some() {
        return Err(PathError::UnterminatedQuote);
    }
    if current.is_empty() {
        return Err(PathError::EmptySegment);
    }
    segments.push(make_segment(&current));
    Ok(segments)
}

fn make_segment(raw: &str) -> PathSegment {
    if let Ok(idx) = raw.parse::<usize>() {
        PathSegment::Index(idx)
    } else {
        PathSegment::Key(raw.to_string())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KnowledgeError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("intermediate component at '{0}' is not a map")]
    NotAMap(String),
    #[error("path not found")]
    NotFound,
    #[error("array index {0} out of bounds")]
    IndexOutOfBounds(usize),
}

/// Knowledge document wrapper. Always an object at the root once non-empty;
/// starts as an empty object on agent creation (§3).
#[derive(Debug, Clone)]
pub struct KnowledgeDoc<'a> {
    root: &'a mut Value,
}

impl<'a> KnowledgeDoc<'a> {
    pub fn new(root: &'a mut Value) -> Self {
        Self { root }
    }

    pub fn get(&self, path: &str) -> Result<Option<&Value>, KnowledgeError> {
        let segments = parse_path(path)?;
        Ok(get_path(self.root, &segments))
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<(), KnowledgeError> {
        let segments = parse_path(path)?;
        if segments.is_empty() {
            *self.root = value;
            return Ok(());
        }
        set_path(self.root, &segments, value)
    }

    pub fn delete(&mut self, path: &str) -> Result<(), KnowledgeError> {
        let segments = parse_path(path)?;
        if segments.is_empty() {
            *self.root = Value::Object(Map::new());
            return Ok(());
        }
        delete_path(self.root, &segments)
    }

    pub fn append(&mut self, path: &str, value: Value) -> Result<(), KnowledgeError> {
        let segments = parse_path(path)?;
        append_path(self.root, &segments, value)
    }
}

fn get_path<'v>(root: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    let mut current = root;
    for seg in segments {
        current = match (current, seg) {
            (Value::Object(map), PathSegment::Key(k)) => map.get(k)?,
            (Value::Array(arr), PathSegment::Index(i)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Walk all but the last segment, creating intermediate maps as needed.
/// Returns an error (no partial write) if an existing intermediate isn't a map.
fn navigate_create<'v>(root: &'v mut Value, segments: &[PathSegment]) -> Result<&'v mut Value, KnowledgeError> {
    let mut current = root;
    for seg in segments {
        match seg {
            PathSegment::Key(k) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => {
                        current = map.entry(k.clone()).or_insert(Value::Object(Map::new()));
                    }
                    _ => return Err(KnowledgeError::NotAMap(k.clone())),
                }
            }
            PathSegment::Index(i) => match current {
                Value::Array(arr) => {
                    if *i >= arr.len() {
                        return Err(KnowledgeError::IndexOutOfBounds(*i));
                    }
                    current = &mut arr[*i];
                }
                _ => return Err(KnowledgeError::NotAMap(i.to_string())),
            },
        }
    }
    Ok(current)
}

fn set_path(root: &mut Value, segments: &[PathSegment], value: Value) -> Result<(), KnowledgeError> {
    let (init, last) = segments.split_at(segments.len() - 1);
    // Validate the whole intermediate chain before mutating, so a failure
    // leaves the document untouched (§4.1 "no partial write").
    validate_intermediate_chain(root, init)?;
    let parent = navigate_create(root, init)?;
    match &last[0] {
        PathSegment::Key(k) => {
            if parent.is_null() {
                *parent = Value::Object(Map::new());
            }
            match parent {
                Value::Object(map) => {
                    map.insert(k.clone(), value);
                    Ok(())
                }
                _ => Err(KnowledgeError::NotAMap(k.clone())),
            }
        }
        PathSegment::Index(i) => match parent {
            Value::Array(arr) => {
                if *i < arr.len() {
                    arr[*i] = value;
                    Ok(())
                } else if *i == arr.len() {
                    arr.push(value);
                    Ok(())
                } else {
                    Err(KnowledgeError::IndexOutOfBounds(*i))
                }
            }
            Value::Null => {
                if *i == 0 {
                    *parent = Value::Array(vec![value]);
                    Ok(())
                } else {
                    Err(KnowledgeError::IndexOutOfBounds(*i))
                }
            }
            _ => Err(KnowledgeError::NotAMap(i.to_string())),
        },
    }
}

/// Check every segment up to (not including) the final one resolves to a map
/// or an absent (creatable) slot, without mutating anything.
fn validate_intermediate_chain(root: &Value, segments: &[PathSegment]) -> Result<(), KnowledgeError> {
    let mut current = root;
    for seg in segments {
        match (current, seg) {
            (Value::Object(map), PathSegment::Key(k)) => match map.get(k) {
                Some(v) => current = v,
                None => return Ok(()), // absent -> creatable, rest of chain is fresh
            },
            (Value::Null, _) => return Ok(()),
            (Value::Array(arr), PathSegment::Index(i)) => {
                current = arr.get(*i).ok_or(KnowledgeError::IndexOutOfBounds(*i))?;
            }
            (_, PathSegment::Key(k)) => return Err(KnowledgeError::NotAMap(k.clone())),
            (_, PathSegment::Index(i)) => return Err(KnowledgeError::NotAMap(i.to_string())),
        }
    }
    Ok(())
}

fn delete_path(root: &mut Value, segments: &[PathSegment]) -> Result<(), KnowledgeError> {
    let (init, last) = segments.split_at(segments.len() - 1);
    let parent = navigate_existing(root, init)?;
    match &last[0] {
        PathSegment::Key(k) => match parent {
            Value::Object(map) => {
                map.remove(k).ok_or(KnowledgeError::NotFound)?;
                Ok(())
            }
            _ => Err(KnowledgeError::NotFound),
        },
        PathSegment::Index(i) => match parent {
            Value::Array(arr) => {
                if *i < arr.len() {
                    arr.remove(*i);
                    Ok(())
                } else {
                    Err(KnowledgeError::NotFound)
                }
            }
            _ => Err(KnowledgeError::NotFound),
        },
    }
}

fn navigate_existing<'v>(root: &'v mut Value, segments: &[PathSegment]) -> Result<&'v mut Value, KnowledgeError> {
    let mut current = root;
    for seg in segments {
        current = match (current, seg) {
            (Value::Object(map), PathSegment::Key(k)) => map.get_mut(k).ok_or(KnowledgeError::NotFound)?,
            (Value::Array(arr), PathSegment::Index(i)) => arr.get_mut(*i).ok_or(KnowledgeError::NotFound)?,
            _ => return Err(KnowledgeError::NotFound),
        };
    }
    Ok(current)
}

fn append_path(root: &mut Value, segments: &[PathSegment], value: Value) -> Result<(), KnowledgeError> {
    if segments.is_empty() {
        // Appending at the document root: treat root itself as the target scalar/list.
        append_in_place(root, value);
        return Ok(());
    }
    let (init, last) = segments.split_at(segments.len() - 1);
    validate_intermediate_chain(root, init)?;
    let parent = navigate_create(root, init)?;
    let key_slot: &mut Value = match &last[0] {
        PathSegment::Key(k) => {
            if parent.is_null() {
                *parent = Value::Object(Map::new());
            }
            match parent {
                Value::Object(map) => map.entry(k.clone()).or_insert(Value::Null),
                _ => return Err(KnowledgeError::NotAMap(k.clone())),
            }
        }
        PathSegment::Index(i) => match parent {
            Value::Array(arr) => {
                if *i >= arr.len() {
                    return Err(KnowledgeError::IndexOutOfBounds(*i));
                }
                &mut arr[*i]
            }
            _ => return Err(KnowledgeError::NotAMap(i.to_string())),
        },
    };
    append_in_place(key_slot, value);
    Ok(())
}

fn append_in_place(slot: &mut Value, value: Value) {
    match slot {
        Value::Null => *slot = Value::Array(vec![value]),
        Value::Array(arr) => arr.push(value),
        other => {
            let old = other.take();
            *other = Value::Array(vec![old, value]);
        }
    }
}
