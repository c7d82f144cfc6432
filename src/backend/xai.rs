//! xAI implementation of [`LanguageBackend`].
//!
//! Talks to the OpenAI-compatible REST surface:
//!
//! - `POST {base}/chat/completions` with `stream: true` for chat rounds,
//!   parsed as server-sent events;
//! - the same endpoint without streaming for single-shot samples, with
//!   `search_parameters` when live search is requested;
//! - `POST {collections}/collections/{id}/documents` (multipart) for uploads.
//!
//! Streamed tool calls arrive as fragments keyed by `index`; they are
//! assembled and surfaced as whole [`ToolCall`]s once the choice reports a
//! `finish_reason` (or the stream ends).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    AggregateResponse, BackendFactory, BackendSettings, BoxFuture, ChatSession, Chunk,
    GenerationOptions, LanguageBackend, Message, Role, RoundStream, SampleRequest,
    SampleResponse, SessionRequest, StreamItem, ToolCall, ToolDefinition, UploadRequest, Usage,
};
use crate::{AppError, Result};

/// Header xAI uses to route requests of one conversation to a warm cache.
const CONVERSATION_HEADER: &str = "x-grok-conv-id";

/// Longest error body echoed back in an error message.
const MAX_ERROR_BODY: usize = 500;

/// HTTP client for the xAI API.
#[derive(Debug, Clone)]
pub struct XaiBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    collections_url: Option<String>,
    request_timeout: Duration,
}

impl XaiBackend {
    /// Build a client from `initialize` settings.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the HTTP client cannot be built.
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            collections_url: settings
                .collections_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_owned()),
            request_timeout: settings.request_timeout,
        })
    }

    /// Factory suitable for [`SidecarService`](crate::service::SidecarService).
    #[must_use]
    pub fn factory() -> BackendFactory {
        Arc::new(|settings: &BackendSettings| {
            let backend = Self::new(settings)?;
            Ok(Arc::new(backend) as Arc<dyn LanguageBackend>)
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl LanguageBackend for XaiBackend {
    fn create_session(&self, request: SessionRequest) -> Result<Box<dyn ChatSession>> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "xai: opening chat session"
        );
        Ok(Box::new(XaiSession {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            url: self.completions_url(),
            model: request.model,
            history: request.messages,
            tools: request.tools,
            options: request.options,
        }))
    }

    fn sample(&self, request: SampleRequest) -> BoxFuture<'_, Result<SampleResponse>> {
        Box::pin(async move {
            let mut body = json!({
                "model": request.model,
                "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
                "stream": false,
            });
            if let Some(max_tokens) = request.max_tokens {
                body["max_tokens"] = json!(max_tokens);
            }
            if request.live_search {
                body["search_parameters"] = json!({ "mode": "on", "return_citations": true });
            }

            let response = self
                .http
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .timeout(self.request_timeout)
                .json(&body)
                .send()
                .await?;
            let value = checked(response).await?.json::<Value>().await?;
            Ok(parse_sample(&value))
        })
    }

    fn supports_collections(&self) -> bool {
        self.collections_url.is_some()
    }

    fn upload_document(&self, request: UploadRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let Some(base) = self.collections_url.as_deref() else {
                return Err(AppError::Service(
                    "Grok collections support is unavailable".into(),
                ));
            };
            let url = format!("{base}/collections/{}/documents", request.collection_id);

            let part = reqwest::multipart::Part::bytes(request.data)
                .file_name(request.name.clone())
                .mime_str(&request.content_type)
                .map_err(|e| AppError::Backend(format!("invalid content type: {e}")))?;
            let form = reqwest::multipart::Form::new()
                .text("name", request.name)
                .part("data", part);

            let response = self
                .http
                .post(url)
                .bearer_auth(&self.api_key)
                .timeout(self.request_timeout)
                .multipart(form)
                .send()
                .await?;
            Ok(checked(response).await?.json::<Value>().await?)
        })
    }
}

/// One streaming conversation; keeps the full history client-side.
struct XaiSession {
    http: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    history: Vec<Message>,
    tools: Vec<ToolDefinition>,
    options: GenerationOptions,
}

impl XaiSession {
    fn round_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.history.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !self.tools.is_empty() {
            body["tools"] = self.tools.iter().map(wire_tool).collect();
        }
        if let Some(temperature) = self.options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = self.options.top_p {
            body["top_p"] = json!(top_p);
        }
        if !self.options.stop.is_empty() {
            body["stop"] = json!(self.options.stop);
        }
        body
    }
}

impl ChatSession for XaiSession {
    fn stream(&mut self) -> RoundStream<'_> {
        let mut request = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.round_body());
        if let Some(conversation_id) = self.options.conversation_id.as_deref() {
            request = request.header(CONVERSATION_HEADER, conversation_id);
        }
        let history = &mut self.history;

        Box::pin(try_stream! {
            let response = request.send().await.map_err(AppError::from)?;
            let response = checked(response).await?;
            let mut bytes = response.bytes_stream();
            let mut round = RoundAssembler::default();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(piece) = bytes.next().await {
                let piece = piece.map_err(|e| AppError::Backend(format!("stream read failed: {e}")))?;
                buffer.extend_from_slice(&piece);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let Some(data) = sse_data(&line) else {
                        continue;
                    };
                    let value: Value = serde_json::from_str(&data)
                        .map_err(|e| AppError::Backend(format!("malformed stream chunk: {e}")))?;
                    if let Some(item) = round.apply(&value)? {
                        yield item;
                    }
                }
            }

            if let Some(item) = round.finish() {
                yield item;
            }
            history.push(round.into_message());
        })
    }

    fn append(&mut self, message: Message) {
        self.history.push(message);
    }
}

/// Partially streamed tool call.
#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds SSE chunks of one round into aggregate snapshots.
#[derive(Debug, Default)]
struct RoundAssembler {
    content: String,
    usage: Option<Usage>,
    partial: BTreeMap<u64, PartialCall>,
    surfaced: Vec<ToolCall>,
}

impl RoundAssembler {
    fn apply(&mut self, chunk: &Value) -> Result<Option<StreamItem>> {
        if let Some(error) = chunk.get("error") {
            return Err(AppError::Backend(format!("stream error: {error}")));
        }

        let mut usage_changed = false;
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = serde_json::from_value::<Usage>(usage.clone())
                .ok()
                .and_then(Usage::normalized);
            usage_changed = true;
        }

        let mut text = String::new();
        let mut completed = Vec::new();
        for choice in chunk
            .get("choices")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(delta) = choice.get("delta") {
                if let Some(piece) = delta.get("content").and_then(Value::as_str) {
                    text.push_str(piece);
                }
                for call in delta
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    self.absorb_call_fragment(call);
                }
            }
            if choice.get("finish_reason").is_some_and(|r| !r.is_null()) {
                completed.extend(self.drain_partial());
            }
        }

        self.content.push_str(&text);
        if text.is_empty() && completed.is_empty() && !usage_changed {
            return Ok(None);
        }
        Ok(Some(self.item(text, completed)))
    }

    fn absorb_call_fragment(&mut self, call: &Value) {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let entry = self.partial.entry(index).or_default();
        if let Some(id) = call.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
            entry.id = Some(id.to_owned());
        }
        if let Some(function) = call.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                entry.name.push_str(name);
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                entry.arguments.push_str(arguments);
            }
        }
    }

    fn drain_partial(&mut self) -> Vec<ToolCall> {
        let calls: Vec<ToolCall> = std::mem::take(&mut self.partial)
            .into_values()
            .map(|partial| ToolCall {
                id: Some(
                    partial
                        .id
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                ),
                name: partial.name,
                arguments: partial.arguments,
            })
            .collect();
        self.surfaced.extend(calls.iter().cloned());
        calls
    }

    fn finish(&mut self) -> Option<StreamItem> {
        let completed = self.drain_partial();
        (!completed.is_empty()).then(|| self.item(String::new(), completed))
    }

    fn item(&self, text: String, tool_calls: Vec<ToolCall>) -> StreamItem {
        StreamItem {
            response: AggregateResponse {
                content: self.content.clone(),
                usage: self.usage.clone(),
            },
            chunk: Chunk {
                text: (!text.is_empty()).then_some(text),
                tool_calls,
            },
        }
    }

    /// Assistant turn to record in the history once the round is over.
    fn into_message(self) -> Message {
        Message {
            role: Role::Assistant,
            parts: vec![self.content],
            tool_call_id: None,
            tool_calls: self.surfaced,
        }
    }
}

/// Extract the payload of an SSE `data:` line, skipping keep-alives and the
/// `[DONE]` sentinel.
fn sse_data(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    (!data.is_empty() && data != "[DONE]").then(|| data.to_owned())
}

fn wire_message(message: &Message) -> Value {
    let content = match (message.role, message.parts.as_slice()) {
        (Role::Tool, _) | (_, [] | [_]) => Value::String(message.text()),
        (_, parts) => parts
            .iter()
            .map(|part| json!({ "type": "text", "text": part }))
            .collect(),
    };

    let mut wire = json!({ "role": message.role.as_str(), "content": content });
    if let Some(call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(call_id);
    }
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
    }
    wire
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    let parameters = if tool.schema.is_object() {
        tool.schema.clone()
    } else {
        json!({ "type": "object", "properties": {} })
    };
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters,
        },
    })
}

fn parse_sample(value: &Value) -> SampleResponse {
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let citations = value
        .get("citations")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect();
    let usage = value
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok())
        .and_then(Usage::normalized);

    SampleResponse {
        content,
        citations,
        usage,
    }
}

/// Turn non-2xx responses into [`AppError::Backend`] carrying the body.
async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(AppError::Backend(format!("HTTP {status}: {body}")))
}
