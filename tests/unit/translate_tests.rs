//! Unit tests for message, option and tool-result translation.

use serde_json::json;

use grok_sidecar::backend::{GenerationOptions, Role};
use grok_sidecar::chat::translate::{
    generation_options, render_segment, render_tool_result, role_from_name, to_backend_messages,
};
use grok_sidecar::chat::ToolResult;

#[test]
fn roles_map_with_user_fallback() {
    assert_eq!(role_from_name("system"), Role::System);
    assert_eq!(role_from_name("user"), Role::User);
    assert_eq!(role_from_name("assistant"), Role::Assistant);
    assert_eq!(role_from_name("model"), Role::Assistant);
    assert_eq!(role_from_name("tool"), Role::Tool);
    assert_eq!(role_from_name("narrator"), Role::User);
}

#[test]
fn segments_render_by_kind() {
    assert_eq!(render_segment(&json!({"type":"text","text":"hi"})), "hi");
    assert_eq!(render_segment(&json!({"type":"text"})), "");
    assert_eq!(render_segment(&json!(null)), "");
    assert_eq!(render_segment(&json!("raw")), "raw");
    assert_eq!(render_segment(&json!(3)), "3");
    assert_eq!(
        render_segment(&json!({"type":"functionCall","functionCall":{"name":"ls"}})),
        r#"{"functionCall":{"name":"ls"}}"#
    );
    assert_eq!(
        render_segment(&json!({"type":"functionResponse","functionResponse":{"ok":true}})),
        r#"{"functionResponse":{"ok":true}}"#
    );
    assert_eq!(
        render_segment(&json!({"type":"image","uri":"x"})),
        r#"{"type":"image","uri":"x"}"#
    );
}

#[test]
fn messages_translate_roles_and_parts() {
    let messages = to_backend_messages(&[
        json!({"role":"system","content":[{"type":"text","text":"be brief"}]}),
        json!({"role":"model","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}),
        json!({"content":[{"type":"text","text":"no role"}]}),
    ]);

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].parts, vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(messages[2].role, Role::User);
}

#[test]
fn tool_messages_join_non_empty_parts() {
    let messages = to_backend_messages(&[json!({
        "role": "tool",
        "content": [
            {"type":"text","text":"  first"},
            {"type":"text","text":""},
            {"type":"text","text":"second  "}
        ]
    })]);

    assert_eq!(messages[0].role, Role::Tool);
    assert_eq!(messages[0].text(), "first\nsecond");
}

#[test]
fn options_prefer_generation_config() {
    let options = generation_options(Some(&json!({
        "temperature": 0.1,
        "generationConfig": {
            "temperature": 0.7,
            "maxOutputTokens": 256,
            "topP": 0.9,
            "stopSequences": ["END", 5],
            "conversationId": "conv-1"
        }
    })));

    assert_eq!(options.temperature, Some(0.7));
    assert_eq!(options.max_tokens, Some(256));
    assert_eq!(options.top_p, Some(0.9));
    assert_eq!(options.stop, vec!["END".to_owned(), "5".to_owned()]);
    assert_eq!(options.conversation_id.as_deref(), Some("conv-1"));
}

#[test]
fn options_ignore_wrong_types() {
    let options = generation_options(Some(&json!({
        "temperature": "hot",
        "maxOutputTokens": 1.5,
        "stopSequences": "END",
        "conversationId": ""
    })));

    assert_eq!(options, GenerationOptions::default());
    assert_eq!(generation_options(None), GenerationOptions::default());
}

#[test]
fn tool_result_joins_text_and_serializes_other_blocks() {
    let rendered = render_tool_result(&ToolResult {
        content: vec![
            json!({"type":"text","text":"line"}),
            json!({"type":"json","value":1}),
        ],
        is_error: false,
    });

    assert_eq!(rendered, "line\n{\"type\":\"json\",\"value\":1}");
}

#[test]
fn error_marker_is_prefixed() {
    let rendered = render_tool_result(&ToolResult {
        content: vec![json!({"type":"text","text":"boom"})],
        is_error: true,
    });

    assert_eq!(rendered, "[tool-error] boom");
}

#[test]
fn error_marker_stands_alone_for_empty_output() {
    let rendered = render_tool_result(&ToolResult {
        content: Vec::new(),
        is_error: true,
    });

    assert_eq!(rendered, "[tool-error]");
}

#[test]
fn empty_output_gets_placeholder() {
    let rendered = render_tool_result(&ToolResult {
        content: vec![json!({"type":"text","text":"   "})],
        is_error: false,
    });

    assert_eq!(rendered, "Tool returned no output.");
}
