//! Handlers for the actions that run on the reading path.

use std::num::FpCategory;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::protocol::{Action, ChatEvent, OutputSink};
use crate::service::tooling::{
    EnsureCorrectEditParams, EnsureCorrectFileContentParams, FixEditParams, SummarizeParams,
    WebFetchParams, WebSearchParams,
};
use crate::service::{parse_tool_definitions, InitializeParams, SidecarService, UploadParams};
use crate::{AppError, Result};

/// Deserialize an action payload.
///
/// # Errors
///
/// Returns `AppError::Protocol` when the payload has the wrong shape.
pub fn parse_payload<T: DeserializeOwned>(action: Action, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::Protocol(format!("invalid {action} payload: {e}")))
}

pub(crate) async fn initialize(service: &SidecarService, payload: Value) -> Result<Value> {
    let params: InitializeParams = parse_payload(Action::Initialize, payload)?;
    service.initialise(params).await
}

pub(crate) async fn register_tools(service: &SidecarService, payload: Value) -> Result<Value> {
    let raw = match payload.get("tools") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(AppError::Protocol(
                "registerTools tools must be a list".into(),
            ))
        }
    };
    let registered = service.register_tools(parse_tool_definitions(&raw)).await?;
    Ok(json!({ "registered": registered }))
}

pub(crate) async fn validate(
    service: &SidecarService,
    sink: &OutputSink,
    request_id: &str,
    payload: Value,
) -> Result<Value> {
    let prompt = payload
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let outcome = service.validate(prompt).await?;
    if !outcome.text.is_empty() {
        sink.send_event(
            request_id,
            ChatEvent::Delta {
                text: outcome.text.clone(),
            },
        )
        .await?;
    }
    Ok(outcome.to_payload())
}

pub(crate) async fn tool_result(service: &SidecarService, payload: Value) -> Result<Value> {
    let Some(call_id) = payload
        .get("callId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
    else {
        return Err(AppError::Protocol(
            "Missing callId in toolResult payload".into(),
        ));
    };

    let content = match payload.get("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(AppError::Protocol(
                "toolResult content must be a list".into(),
            ))
        }
    };
    let is_error = payload.get("isError").is_some_and(is_truthy);

    service.submit_tool_result(call_id, content, is_error).await?;
    Ok(json!({ "callId": call_id, "acknowledged": true }))
}

pub(crate) async fn upload(service: &SidecarService, payload: Value) -> Result<Value> {
    let params: UploadParams = parse_payload(Action::Upload, payload)?;
    service.upload(params).await
}

pub(crate) async fn web_search(service: &SidecarService, payload: Value) -> Result<Value> {
    let params: WebSearchParams = parse_payload(Action::WebSearch, payload)?;
    service.web_search(params).await
}

pub(crate) async fn web_fetch(service: &SidecarService, payload: Value) -> Result<Value> {
    let params: WebFetchParams = parse_payload(Action::WebFetch, payload)?;
    service.web_fetch(params).await
}

pub(crate) async fn ensure_correct_edit(service: &SidecarService, payload: Value) -> Result<Value> {
    let params: EnsureCorrectEditParams = parse_payload(Action::EnsureCorrectEdit, payload)?;
    service.ensure_correct_edit(params).await
}

pub(crate) async fn ensure_correct_file_content(
    service: &SidecarService,
    payload: Value,
) -> Result<Value> {
    let params: EnsureCorrectFileContentParams =
        parse_payload(Action::EnsureCorrectFileContent, payload)?;
    service.ensure_correct_file_content(params).await
}

pub(crate) async fn fix_edit_with_instruction(
    service: &SidecarService,
    payload: Value,
) -> Result<Value> {
    let params: FixEditParams = parse_payload(Action::FixEditWithInstruction, payload)?;
    service.fix_edit_with_instruction(params).await
}

pub(crate) async fn summarize_text(service: &SidecarService, payload: Value) -> Result<Value> {
    let params: SummarizeParams = parse_payload(Action::SummarizeText, payload)?;
    service.summarize_text(params).await
}

/// Loose truthiness for flags sent by dynamically typed callers: null, false,
/// zero and empty values are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n.classify() != FpCategory::Zero),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
