use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::ConnectorError;

const RESULT_LIST_KEYS: &[&str] = &["messages", "replies"];

fn build_no_results_message(key: &str, query_hint: Option<&str>) -> String {
    match query_hint {
        Some(query) => format!("No {} found for \"{}\".", key, query),
        None => format!("No {} found for the requested input.", key),
    }
}

/// Adds `message` / `no_results` when every result list is empty and there is
/// no thread parent to show.
fn maybe_attach_no_results_message(
    map: &mut JsonMap<String, JsonValue>,
    query_hint: Option<&str>,
) -> Option<String> {
    if map.get("parent").is_some_and(|p| !p.is_null()) {
        return None;
    }

    let mut empty_key = None;
    for key in RESULT_LIST_KEYS {
        match map.get(*key) {
            Some(JsonValue::Array(items)) if !items.is_empty() => return None,
            Some(JsonValue::Array(_)) => {
                empty_key.get_or_insert(*key);
            }
            _ => {}
        }
    }

    let query_hint = query_hint.map(str::trim).filter(|q| !q.is_empty());
    let message = build_no_results_message(empty_key?, query_hint);
    map.entry("message".to_string())
        .or_insert(JsonValue::String(message.clone()));
    map.entry("no_results".to_string())
        .or_insert(JsonValue::Bool(true));
    Some(message)
}

/// Wrap a serializable tool output as structured content plus a JSON text
/// mirror for clients that only read `content`.
pub fn structured_result_with_text<T: Serialize>(
    data: &T,
    query_hint: Option<&str>,
) -> Result<CallToolResult, ConnectorError> {
    let value = serde_json::to_value(data)?;

    let mut map: JsonMap<String, JsonValue> = match value {
        JsonValue::Object(m) => m,
        other => {
            let mut m = JsonMap::new();
            m.insert("data".to_string(), other);
            m
        }
    };

    maybe_attach_no_results_message(&mut map, query_hint);

    let structured = JsonValue::Object(map);
    let text = serde_json::to_string(&structured)?;

    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    })
}
