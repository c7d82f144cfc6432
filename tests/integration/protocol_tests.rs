//! Input-loop behaviour: framing errors, dispatch errors and lifecycle.

use serde_json::json;

use super::test_helpers::{Harness, ScriptedBackend};

#[tokio::test]
async fn invalid_json_reports_null_id_and_processing_continues() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness.send_raw("this is not json").await;
    harness.request("r1", "shutdown", json!({})).await;

    let error = harness.next_frame().await;
    assert_eq!(error["type"], "error");
    assert!(error["requestId"].is_null());
    assert!(error["error"]["code"].is_null());
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON: "));

    let result = harness.next_frame().await;
    assert_eq!(
        result,
        json!({"type":"result","requestId":"r1","payload":{"status":"shutting down"}})
    );
    harness.join().await.expect("clean stop");
}

#[tokio::test]
async fn non_utf8_line_reports_null_id_and_processing_continues() {
    let mut harness = Harness::start(ScriptedBackend::new());
    harness.initialize().await;

    harness.send_bytes(b"\xff\xfe not utf8").await;
    harness
        .request("t1", "registerTools", json!({ "tools": [{ "name": "grep" }] }))
        .await;

    assert_eq!(
        harness.next_frame().await,
        json!({"type":"error","requestId":null,
               "error":{"message":"Invalid JSON: input is not valid UTF-8","code":null}})
    );
    assert_eq!(
        harness.next_frame().await,
        json!({"type":"result","requestId":"t1","payload":{"registered":1}})
    );
}

#[tokio::test]
async fn request_buffered_behind_a_rejected_line_is_still_served() {
    let mut harness = Harness::start(ScriptedBackend::new());
    let shutdown = json!({ "type": "request", "requestId": "s1", "action": "shutdown" });
    let mut batch = b"\xff not utf8\n".to_vec();
    batch.extend_from_slice(shutdown.to_string().as_bytes());

    harness.send_bytes(&batch).await;

    assert!(harness.next_frame().await["requestId"].is_null());
    assert_eq!(
        harness.next_frame().await,
        json!({"type":"result","requestId":"s1","payload":{"status":"shutting down"}})
    );
    harness.join().await.expect("clean stop");
}

#[tokio::test]
async fn blank_lines_produce_no_frames() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness.send_raw("").await;
    harness.send_raw("   ").await;
    harness.request("r1", "shutdown", json!({})).await;

    assert_eq!(harness.next_frame().await["requestId"], "r1");
}

#[tokio::test]
async fn malformed_requests_are_correlated_when_possible() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness
        .send_raw(r#"{"type":"event","requestId":"a1","action":"chat"}"#)
        .await;
    harness.send_raw(r#"{"type":"request","requestId":"a2"}"#).await;
    harness.send_raw(r#"{"type":"request","action":"chat"}"#).await;
    harness.request("a4", "teleport", json!({})).await;

    let frames = harness.next_frames(4).await;
    assert_eq!(
        frames[0]["error"]["message"],
        "Expected message type 'request'"
    );
    assert_eq!(frames[0]["requestId"], "a1");
    assert_eq!(frames[1]["error"]["message"], "Missing requestId or action");
    assert_eq!(frames[1]["requestId"], "a2");
    assert_eq!(frames[2]["error"]["message"], "Missing requestId or action");
    assert!(frames[2]["requestId"].is_null());
    assert_eq!(frames[3]["error"]["message"], "Unknown action: teleport");
    assert_eq!(frames[3]["requestId"], "a4");
    for frame in &frames {
        assert_eq!(frame["type"], "error");
        assert!(frame["error"]["code"].is_null());
    }
}

#[tokio::test]
async fn eof_stops_the_engine_without_a_frame() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness.close_input();

    harness.join().await.expect("clean stop on eof");
}

#[tokio::test]
async fn cancellation_token_stops_the_engine() {
    let harness = Harness::start(ScriptedBackend::new());

    harness.cancel.cancel();

    harness.join().await.expect("clean stop on cancel");
}

#[tokio::test]
async fn initialize_reports_capabilities_and_uses_payload_settings() {
    let backend = ScriptedBackend::with_collections();
    let mut harness = Harness::start(backend.clone());

    harness
        .request(
            "i1",
            "initialize",
            json!({ "api_key": "secret", "model": "grok-4" }),
        )
        .await;

    assert_eq!(
        harness.next_frame().await,
        json!({"type":"result","requestId":"i1",
               "payload":{"status":"ok","capabilities":{"supportsCollections":true}}})
    );
    let settings = backend.settings.lock().unwrap();
    assert_eq!(settings[0].api_key, "secret");
    assert_eq!(settings[0].model, "grok-4");
}

#[tokio::test]
async fn initialize_without_key_is_a_service_error() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness.request("i1", "initialize", json!({})).await;

    let frame = harness.next_frame().await;
    assert_eq!(frame["type"], "error");
    assert_eq!(
        frame["error"]["message"],
        "API key is required to initialise Grok service"
    );
    assert_eq!(frame["error"]["code"], "SERVICE_ERROR");
}

#[tokio::test]
async fn actions_before_initialize_are_service_errors() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness
        .request("t1", "registerTools", json!({ "tools": [] }))
        .await;
    harness.request("c1", "chat", json!({ "messages": [] })).await;

    let frames = harness.next_frames(2).await;
    for frame in frames {
        assert_eq!(frame["type"], "error");
        assert_eq!(
            frame["error"]["message"],
            "Grok service has not been initialised yet"
        );
        assert_eq!(frame["error"]["code"], "SERVICE_ERROR");
    }
}

#[tokio::test]
async fn register_tools_counts_named_tools() {
    let mut harness = Harness::start(ScriptedBackend::new());
    harness.initialize().await;

    harness
        .request(
            "t1",
            "registerTools",
            json!({ "tools": [
                { "name": "search", "description": "web", "schema": { "type": "object" } },
                { "description": "nameless" },
                { "name": "read" }
            ]}),
        )
        .await;

    assert_eq!(
        harness.next_frame().await,
        json!({"type":"result","requestId":"t1","payload":{"registered":2}})
    );
}

#[tokio::test]
async fn tool_result_payload_is_validated() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness.request("x1", "toolResult", json!({})).await;
    harness
        .request("x2", "toolResult", json!({ "callId": "c", "content": "text" }))
        .await;
    harness
        .request("x3", "toolResult", json!({ "callId": "ghost", "content": [] }))
        .await;

    let frames = harness.next_frames(3).await;
    assert_eq!(
        frames[0]["error"],
        json!({"message":"Missing callId in toolResult payload","code":null})
    );
    assert_eq!(
        frames[1]["error"],
        json!({"message":"toolResult content must be a list","code":null})
    );
    assert_eq!(
        frames[2]["error"],
        json!({"message":"Unknown tool call id: ghost","code":"SERVICE_ERROR"})
    );
}

#[tokio::test]
async fn malformed_action_payload_is_a_protocol_error() {
    let mut harness = Harness::start(ScriptedBackend::new());

    harness
        .request("u1", "upload", json!({ "path": 42 }))
        .await;

    let frame = harness.next_frame().await;
    assert_eq!(frame["type"], "error");
    assert!(frame["error"]["code"].is_null());
    assert!(frame["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid upload payload"));
}
