use crate::error::ConnectorError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Builds a tool result carrying both a pretty-printed text block and the
/// structured form. Structured content must be an object, so anything else
/// is wrapped under a `data` key.
pub fn structured_result_with_text<T: Serialize>(
    data: &T,
) -> Result<CallToolResult, ConnectorError> {
    let value = serde_json::to_value(data)?;
    let text = serde_json::to_string_pretty(&value)?;

    let map: JsonMap<String, JsonValue> = match value {
        JsonValue::Object(m) => m,
        other => {
            let mut m = JsonMap::new();
            m.insert("data".to_string(), other);
            m
        }
    };

    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(JsonValue::Object(map)),
        is_error: Some(false),
        meta: None,
    })
}
