/// Error and output normalisation for script results
///
/// Errors from the interpreter come in several shapes (syntax errors, runtime
/// errors with a location prefix, callback errors with a traceback). They are
/// reduced to a message plus the line in the user's code. Returned values of
/// the all-items mode are validated into items here.

use crate::sandbox::SandboxError;
use crate::value::type_name;
use crate::workflow::types::{BinaryData, Item, NodeData};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Chunk name given to user code; locations read `code:<line>:`
pub(crate) const CHUNK_NAME: &str = "=code";
const LOCATION_PREFIX: &str = "code:";

/// Find the first `code:<line>:` location in an interpreter message
pub(crate) fn find_line(text: &str) -> Option<u32> {
    let mut rest = text;
    while let Some(start) = rest.find(LOCATION_PREFIX) {
        let after = &rest[start + LOCATION_PREFIX.len()..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() && after[digits.len()..].starts_with(':') {
            if let Ok(line) = digits.parse() {
                return Some(line);
            }
        }
        rest = after;
    }
    None
}

/// Reduce an interpreter error to `(message, line)`
///
/// `message` is the root cause, `context` the full rendering (including any
/// traceback) that is searched when the root cause carries no location.
pub(crate) fn split_location(message: &str, context: &str) -> (String, u32) {
    let line = find_line(message).or_else(|| find_line(context)).unwrap_or(1);

    let mut text = message.trim();
    if let Some(stripped) = text.strip_prefix(LOCATION_PREFIX) {
        if let Some(colon) = stripped.find(':') {
            if stripped[..colon].chars().all(|c| c.is_ascii_digit()) {
                text = stripped[colon + 1..].trim_start();
            }
        }
    }
    if let Some(traceback) = text.find("\nstack traceback:") {
        text = &text[..traceback];
    }

    // Internal binding names are shown the way users write them
    let text = text.replace("'__node'", "'$'").replace("'__", "'$");
    (text, line)
}

/// Validate the value returned by all-items code into node items
///
/// Accepts a single item-like object, an array of objects, or a bare object
/// which is wrapped into one item. An empty object means "no items".
pub fn items_from_output(value: Value) -> Result<NodeData, SandboxError> {
    match value {
        Value::Array(entries) => entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let actual = type_name(&entry);
                item_from_value(entry).ok_or_else(|| {
                    SandboxError::InvalidOutput(format!(
                        "item {index} is a {actual}, expected an object"
                    ))
                })
            })
            .collect(),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![item_from_object(map)]),
        Value::Null => Err(SandboxError::InvalidOutput(
            "nothing was returned, add a return statement".to_string(),
        )),
        other => Err(SandboxError::InvalidOutput(format!(
            "expected an object or an array of objects, got a {}",
            type_name(&other)
        ))),
    }
}

/// Validate the value returned by per-item code into a single item
pub fn item_from_output(value: Value) -> Result<Item, SandboxError> {
    let actual = type_name(&value);
    item_from_value(value).ok_or_else(|| {
        SandboxError::InvalidOutput(format!("expected an object to be returned, got a {actual}"))
    })
}

fn item_from_value(value: Value) -> Option<Item> {
    match value {
        Value::Object(map) => Some(item_from_object(map)),
        _ => None,
    }
}

/// An object with a `json` object is item-like; anything else is the payload
fn item_from_object(mut map: Map<String, Value>) -> Item {
    let item_like = matches!(map.get("json"), Some(Value::Object(_)))
        || matches!(map.get("json"), Some(Value::Array(a)) if a.is_empty());
    if !item_like {
        return Item {
            json: map,
            binary: None,
        };
    }

    let json = match map.remove("json") {
        Some(Value::Object(json)) => json,
        _ => Map::new(),
    };
    let binary = map
        .remove("binary")
        .and_then(|raw| serde_json::from_value::<BTreeMap<String, BinaryData>>(raw).ok())
        .filter(|binary| !binary.is_empty());
    Item { json, binary }
}
