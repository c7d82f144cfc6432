//! Language backend abstraction.
//!
//! The [`LanguageBackend`] trait is the only surface the engine, the chat
//! coordinator and the tooling handlers use to reach a model. The production
//! implementation lives in [`xai`]; tests script their own.
//!
//! A chat runs as a [`ChatSession`]: each call to [`ChatSession::stream`]
//! performs one round and yields `(aggregate, chunk)` pairs until the round is
//! over. Tool results are fed back with [`ChatSession::append`] before the
//! next round.

pub mod xai;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Boxed future returned by backend operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One round of streamed output.
pub type RoundStream<'a> = BoxStream<'a, Result<StreamItem>>;

/// Builds a backend from the settings supplied to `initialize`.
pub type BackendFactory =
    Arc<dyn Fn(&BackendSettings) -> Result<Arc<dyn LanguageBackend>> + Send + Sync>;

/// Conversation role.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
    /// Result of a tool call.
    Tool,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation produced by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Backend-assigned identifier, if any.
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// One conversation message in backend form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Speaker.
    pub role: Role,
    /// Rendered content segments.
    pub parts: Vec<String>,
    /// Call answered by a `tool` message.
    pub tool_call_id: Option<String>,
    /// Calls requested by an `assistant` message.
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    /// Message with the given role and content segments.
    #[must_use]
    pub fn new(role: Role, parts: Vec<String>) -> Self {
        Self {
            role,
            parts,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Single-segment user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![text.into()])
    }

    /// Tool-result message answering `call_id`.
    #[must_use]
    pub fn tool_result(call_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![text.into()],
            tool_call_id: call_id,
            tool_calls: Vec::new(),
        }
    }

    /// Content segments joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts.join("\n")
    }
}

/// Tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default)]
    pub schema: Value,
}

/// Token accounting reported by the backend.
///
/// Zero or absent counters are omitted when serialised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    /// Generated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// Prompt plus generated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Hidden reasoning tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    /// Prompt tokens served from cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_prompt_text_tokens: Option<u64>,
}

impl Usage {
    /// Drop zero counters; `None` when nothing is left.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let keep = |v: Option<u64>| v.filter(|n| *n > 0);
        let usage = Self {
            prompt_tokens: keep(self.prompt_tokens),
            completion_tokens: keep(self.completion_tokens),
            total_tokens: keep(self.total_tokens),
            reasoning_tokens: keep(self.reasoning_tokens),
            cached_prompt_text_tokens: keep(self.cached_prompt_text_tokens),
        };
        (usage != Self::default()).then_some(usage)
    }
}

/// Sampling parameters translated from the caller's options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Output token cap.
    pub max_tokens: Option<u64>,
    /// Nucleus sampling.
    pub top_p: Option<f64>,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Conversation identifier used for server-side caching.
    pub conversation_id: Option<String>,
}

/// Everything needed to open a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    /// Model name.
    pub model: String,
    /// Initial conversation.
    pub messages: Vec<Message>,
    /// Tool catalog.
    pub tools: Vec<ToolDefinition>,
    /// Sampling parameters.
    pub options: GenerationOptions,
}

/// Running snapshot of the response for the current round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateResponse {
    /// Full text produced so far.
    pub content: String,
    /// Latest usage figures, if reported.
    pub usage: Option<Usage>,
}

/// Incremental piece of a streamed round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Text appended by this chunk.
    pub text: Option<String>,
    /// Tool calls completed in this chunk.
    pub tool_calls: Vec<ToolCall>,
}

/// One streamed item: the aggregate after this chunk, and the chunk itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamItem {
    /// Aggregate snapshot.
    pub response: AggregateResponse,
    /// Delta.
    pub chunk: Chunk,
}

/// Single-shot completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    /// Model name.
    pub model: String,
    /// Conversation.
    pub messages: Vec<Message>,
    /// Output token cap.
    pub max_tokens: Option<u64>,
    /// Let the model consult live web search and return citations.
    pub live_search: bool,
}

impl SampleRequest {
    /// Request with a single user prompt.
    #[must_use]
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            max_tokens: None,
            live_search: false,
        }
    }
}

/// Single-shot completion response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleResponse {
    /// Generated text.
    pub content: String,
    /// Source URLs consulted by live search.
    pub citations: Vec<String>,
    /// Usage figures.
    pub usage: Option<Usage>,
}

/// Document to add to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Target collection.
    pub collection_id: String,
    /// File name stored with the document.
    pub name: String,
    /// Raw file bytes.
    pub data: Vec<u8>,
    /// MIME type.
    pub content_type: String,
}

/// Settings handed to a [`BackendFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// API key.
    pub api_key: String,
    /// Default model.
    pub model: String,
    /// REST base URL.
    pub base_url: String,
    /// Collections API base URL, if uploads are enabled.
    pub collections_url: Option<String>,
    /// Timeout for single-shot requests.
    pub request_timeout: Duration,
}

/// A stateful, multi-round chat.
pub trait ChatSession: Send {
    /// Run one round against the current conversation.
    ///
    /// The stream is finite and not restartable; calling `stream` again runs
    /// the next round.
    fn stream(&mut self) -> RoundStream<'_>;

    /// Append a message to the conversation before the next round.
    fn append(&mut self, message: Message);
}

/// Capability set the sidecar needs from a model provider.
pub trait LanguageBackend: Send + Sync {
    /// Open a streaming chat session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the session cannot be created.
    fn create_session(&self, request: SessionRequest) -> Result<Box<dyn ChatSession>>;

    /// Run a single non-streaming completion.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] on transport or API failures.
    fn sample(&self, request: SampleRequest) -> BoxFuture<'_, Result<SampleResponse>>;

    /// Whether [`LanguageBackend::upload_document`] is available.
    fn supports_collections(&self) -> bool {
        false
    }

    /// Add a document to a collection and return its metadata.
    ///
    /// # Errors
    ///
    /// The default implementation always fails with [`AppError::Service`].
    fn upload_document(&self, request: UploadRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Err(AppError::Service(format!(
                "collections support is unavailable (collection '{}')",
                request.collection_id
            )))
        })
    }
}
