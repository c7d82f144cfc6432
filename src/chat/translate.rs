//! Translation between caller-side JSON and backend types.

use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{GenerationOptions, Message, Role};
use crate::chat::rendezvous::ToolResult;

/// Marker prefixed to tool output when the tool reported a failure.
pub const TOOL_ERROR_MARKER: &str = "[tool-error]";

/// Text sent to the model when a tool produced nothing.
pub const EMPTY_TOOL_OUTPUT: &str = "Tool returned no output.";

/// Map a caller role name onto a backend role. Unknown roles become `user`.
#[must_use]
pub fn role_from_name(name: &str) -> Role {
    match name {
        "system" => Role::System,
        "assistant" | "model" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

/// Render one content segment as text.
///
/// Text blocks yield their text; function calls and responses keep a JSON
/// wrapper so the model still sees their structure.
#[must_use]
pub fn render_segment(segment: &Value) -> String {
    match segment {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Object(block) => match block.get("type").and_then(Value::as_str) {
            Some("text") => match block.get("text") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            Some("functionCall") => json!({
                "functionCall": block.get("functionCall").cloned().unwrap_or_else(|| json!({}))
            })
            .to_string(),
            Some("functionResponse") => json!({
                "functionResponse": block.get("functionResponse").cloned().unwrap_or_else(|| json!({}))
            })
            .to_string(),
            _ => segment.to_string(),
        },
        other => other.to_string(),
    }
}

/// Translate caller messages (`{role, content: [blocks]}`) into backend
/// messages.
#[must_use]
pub fn to_backend_messages(messages: &[Value]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|message| {
            let Some(message) = message.as_object() else {
                debug!("skipping non-object chat message");
                return None;
            };
            let role = role_from_name(message.get("role").and_then(Value::as_str).unwrap_or("user"));
            let rendered: Vec<String> = match message.get("content") {
                Some(Value::Array(items)) => items.iter().map(render_segment).collect(),
                Some(Value::String(text)) => vec![text.clone()],
                _ => Vec::new(),
            };

            if role == Role::Tool {
                let text = rendered
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                return Some(Message::tool_result(None, text.trim()));
            }
            Some(Message::new(role, rendered))
        })
        .collect()
}

/// Translate caller generation options.
///
/// Values are read from `options.generationConfig` when it is an object,
/// otherwise from `options` itself. Values of the wrong type are ignored.
#[must_use]
pub fn generation_options(options: Option<&Value>) -> GenerationOptions {
    let Some(options) = options.filter(|o| o.is_object()) else {
        return GenerationOptions::default();
    };
    let source = options
        .get("generationConfig")
        .filter(|g| g.is_object())
        .unwrap_or(options);

    let stop = source
        .get("stopSequences")
        .and_then(Value::as_array)
        .map(|seqs| {
            seqs.iter()
                .map(|seq| seq.as_str().map_or_else(|| seq.to_string(), str::to_owned))
                .collect()
        })
        .unwrap_or_default();

    let conversation_id = match source.get("conversationId") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    GenerationOptions {
        temperature: source.get("temperature").and_then(Value::as_f64),
        max_tokens: source.get("maxOutputTokens").and_then(Value::as_u64),
        top_p: source.get("topP").and_then(Value::as_f64),
        stop,
        conversation_id,
    }
}

/// Render tool result content blocks as one string.
///
/// Text blocks contribute their (non-empty) text; any other block is
/// serialised as JSON. Parts are joined with newlines and trimmed.
#[must_use]
pub fn format_tool_content(content: &[Value]) -> String {
    content
        .iter()
        .filter_map(|item| {
            if item.get("type").and_then(Value::as_str) == Some("text") {
                let text = render_segment(item);
                (!text.is_empty()).then_some(text)
            } else {
                Some(item.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Text appended to the conversation for a resolved tool call.
#[must_use]
pub fn render_tool_result(result: &ToolResult) -> String {
    let text = format_tool_content(&result.content);
    let text = match (result.is_error, text.is_empty()) {
        (true, false) => format!("{TOOL_ERROR_MARKER} {text}"),
        (true, true) => TOOL_ERROR_MARKER.to_owned(),
        (false, _) => text,
    };
    if text.is_empty() {
        EMPTY_TOOL_OUTPUT.to_owned()
    } else {
        text
    }
}
