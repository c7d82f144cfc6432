//! Per-request chat driver.
//!
//! A coordinator runs the rounds of one `chat` request: stream a round,
//! forward deltas, advertise every tool call the round surfaces, then wait
//! for each result in order and feed it back before the next round. A round
//! with no tool calls ends the chat.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{ChatSession, Message, StreamItem, Usage};
use crate::chat::rendezvous::{PendingToolCall, RendezvousTable};
use crate::chat::translate::render_tool_result;
use crate::protocol::{ChatEvent, OutputSink};
use crate::{AppError, Result};

/// Running state of one chat request, published once as the result payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatTurnState {
    /// Latest full-text snapshot of the current round.
    pub final_text: String,
    /// Latest usage figures.
    pub usage: Option<Usage>,
}

impl ChatTurnState {
    /// Result payload sent when the chat completes.
    #[must_use]
    pub fn into_payload(self) -> Value {
        json!({
            "message": {
                "role": "assistant",
                "content": [{ "type": "text", "text": self.final_text }],
            },
            "usage": self.usage.and_then(Usage::normalized),
        })
    }
}

/// Drives one chat request to completion.
#[derive(Debug, Clone)]
pub struct ChatCoordinator {
    request_id: String,
    sink: OutputSink,
    tool_calls: Arc<RendezvousTable>,
    cancel: CancellationToken,
}

impl ChatCoordinator {
    /// Coordinator emitting frames for `request_id`.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        sink: OutputSink,
        tool_calls: Arc<RendezvousTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            sink,
            tool_calls,
            cancel,
        }
    }

    /// Run every round and return the result payload.
    ///
    /// Events are written to the sink as they happen; the caller writes the
    /// terminal frame.
    ///
    /// # Errors
    ///
    /// - [`AppError::Service`] when the backend stream fails or a tool call
    ///   cannot be resolved.
    /// - [`AppError::Cancelled`] when the chat's token fires.
    /// - [`AppError::Io`] when an event cannot be written.
    pub async fn run(&self, mut session: Box<dyn ChatSession>) -> Result<Value> {
        let mut turn = ChatTurnState::default();
        let mut round = 0_u32;

        loop {
            round += 1;
            debug!(request_id = %self.request_id, round, "starting round");
            let surfaced = self.stream_round(session.as_mut(), &mut turn).await?;
            if surfaced.is_empty() {
                break;
            }

            info!(
                request_id = %self.request_id,
                round,
                pending = surfaced.len(),
                "awaiting tool results"
            );
            for (index, call) in surfaced.iter().enumerate() {
                let result = match self.tool_calls.wait(call, &self.cancel).await {
                    Ok(result) => result,
                    Err(err) => {
                        self.release(&surfaced[index..]).await;
                        return Err(err);
                    }
                };
                let text = render_tool_result(&result);
                session.append(Message::tool_result(Some(call.call_id().to_owned()), text));
                self.tool_calls.unregister(call.call_id()).await;
            }
            turn.final_text.clear();
        }

        debug!(request_id = %self.request_id, rounds = round, "chat complete");
        Ok(turn.into_payload())
    }

    /// Stream one round, returning the tool calls it surfaced.
    async fn stream_round(
        &self,
        session: &mut dyn ChatSession,
        turn: &mut ChatTurnState,
    ) -> Result<Vec<Arc<PendingToolCall>>> {
        let mut surfaced = Vec::new();
        let mut stream = session.stream();

        loop {
            let next = tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    self.release(&surfaced).await;
                    return Err(AppError::Cancelled(format!(
                        "chat {} cancelled while streaming",
                        self.request_id
                    )));
                }
                next = stream.next() => next,
            };
            let Some(item) = next else {
                return Ok(surfaced);
            };

            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    self.release(&surfaced).await;
                    return Err(AppError::Service(format!(
                        "Grok streaming failed: {}",
                        err.detail()
                    )));
                }
            };
            if let Err(err) = self.apply(item, turn, &mut surfaced).await {
                self.release(&surfaced).await;
                return Err(err);
            }
        }
    }

    async fn apply(
        &self,
        item: StreamItem,
        turn: &mut ChatTurnState,
        surfaced: &mut Vec<Arc<PendingToolCall>>,
    ) -> Result<()> {
        let StreamItem { response, chunk } = item;
        if response.usage.is_some() {
            turn.usage = response.usage;
        }
        if !response.content.is_empty() {
            turn.final_text = response.content;
        }

        if let Some(text) = chunk.text.filter(|t| !t.is_empty()) {
            self.sink
                .send_event(&self.request_id, ChatEvent::Delta { text })
                .await?;
        }

        for call in chunk.tool_calls {
            let call_id = call
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("tool-{}", Uuid::new_v4().simple()));
            let entry = self.tool_calls.register(&call_id, &call.name).await;
            surfaced.push(entry);
            self.sink
                .send_event(
                    &self.request_id,
                    ChatEvent::ToolCall {
                        call_id,
                        name: call.name,
                        arguments: call.arguments,
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn release(&self, calls: &[Arc<PendingToolCall>]) {
        for call in calls {
            self.tool_calls.unregister(call.call_id()).await;
        }
    }
}
