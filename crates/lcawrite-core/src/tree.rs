//! Navigation helpers over the JSON document tree.
//!
//! Process documents are loosely shaped: an ILCD list with a single entry is
//! often written as a bare object, and optional sections may be `null`. The
//! walkers below treat a one-element list of objects as that object and `null`
//! as a missing node, so reads and writes agree on where a path lands.

use serde_json::{Map, Value};

use crate::path::PathError;

/// Key of the wrapper object some stores put around the process data set.
pub const PROCESS_DATA_SET: &str = "processDataSet";

/// The node that field paths are rooted at: `processDataSet` when present,
/// otherwise the document itself.
pub fn process_root(document: &Value) -> &Value {
    match document.get(PROCESS_DATA_SET) {
        Some(inner) if inner.is_object() => inner,
        _ => document,
    }
}

pub fn process_root_mut(document: &mut Value) -> &mut Value {
    let wrapped = document
        .get(PROCESS_DATA_SET)
        .is_some_and(Value::is_object);
    if wrapped {
        &mut document[PROCESS_DATA_SET]
    } else {
        document
    }
}

/// Read-only walk. `Ok(None)` when the path runs into a missing or null node.
pub fn lookup<'v>(root: &'v Value, keys: &[&str]) -> Result<Option<&'v Value>, PathError> {
    let mut cursor = root;
    for key in keys {
        let map = match object_view(cursor, key)? {
            Some(map) => map,
            None => return Ok(None),
        };
        match map.get(*key) {
            Some(next) => cursor = next,
            None => return Ok(None),
        }
    }
    Ok(Some(cursor))
}

/// Mutable walk that never creates nodes.
pub fn get_mut<'v>(root: &'v mut Value, keys: &[&str]) -> Option<&'v mut Value> {
    let mut cursor = root;
    for key in keys {
        let map = match cursor {
            Value::Object(map) => map,
            Value::Array(items) if items.len() == 1 => match &mut items[0] {
                Value::Object(map) => map,
                _ => return None,
            },
            _ => return None,
        };
        cursor = map.get_mut(*key)?;
    }
    Some(cursor)
}

/// Creating walk: returns the object at the end of `keys`, creating every
/// missing node along the way as an empty object.
pub fn ensure_object<'v>(
    root: &'v mut Value,
    keys: &[&str],
) -> Result<&'v mut Map<String, Value>, PathError> {
    let mut cursor = root;
    for key in keys {
        let map = object_slot(cursor, key)?;
        cursor = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_slot(cursor, keys.last().copied().unwrap_or_default())
}

fn object_view<'v>(
    node: &'v Value,
    key: &str,
) -> Result<Option<&'v Map<String, Value>>, PathError> {
    match node {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        Value::Array(items) => match items.as_slice() {
            [] => Ok(None),
            [Value::Object(map)] => Ok(Some(map)),
            _ => Err(blocked(key, node)),
        },
        other => Err(blocked(key, other)),
    }
}

fn object_slot<'v>(
    node: &'v mut Value,
    key: &str,
) -> Result<&'v mut Map<String, Value>, PathError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    if let Value::Array(items) = node
        && items.is_empty()
    {
        items.push(Value::Object(Map::new()));
    }
    match node {
        Value::Object(map) => Ok(map),
        Value::Array(items) => match items.as_mut_slice() {
            [Value::Object(map)] => Ok(map),
            _ => Err(PathError::Blocked {
                key: key.to_string(),
                found: "list",
            }),
        },
        other => Err(blocked(key, other)),
    }
}

fn blocked(key: &str, node: &Value) -> PathError {
    PathError::Blocked {
        key: key.to_string(),
        found: kind_name(node),
    }
}

pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// True for values that carry no information: null, blank text, empty
/// containers, language entries without text and references without id or uri.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(_) | Value::Number(_) => false,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_blank),
        Value::Object(map) => {
            if map.contains_key("#text") {
                return map.get("#text").is_none_or(is_blank);
            }
            if map.contains_key("@refObjectId") || map.contains_key("@uri") {
                return ["@refObjectId", "@uri"]
                    .iter()
                    .all(|key| map.get(*key).is_none_or(is_blank));
            }
            map.values().all(is_blank)
        }
    }
}
