//! Tool-call rendezvous table.
//!
//! A chat task registers every tool call it surfaces, advertises it to the
//! caller, then suspends in [`RendezvousTable::wait`] until a `toolResult`
//! request resolves the entry from the reading path. The table is the only
//! channel between the two.
//!
//! Resolution stores the content under the entry's own lock and then signals
//! its [`Notify`]. `notify_one` keeps a permit when nobody is waiting yet, so a
//! result that arrives before the chat task starts waiting is not lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Lifecycle of a pending call.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum CallState {
    /// Advertised, no result yet.
    #[default]
    Waiting,
    /// A result has been stored.
    Resolved,
}

/// Result delivered for a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Content blocks as supplied by the caller (normalised to objects).
    pub content: Vec<Value>,
    /// Whether the tool reported a failure.
    pub is_error: bool,
}

#[derive(Debug, Default)]
struct Slot {
    state: CallState,
    content: Option<Vec<Value>>,
    is_error: bool,
}

/// One advertised tool call.
#[derive(Debug)]
pub struct PendingToolCall {
    call_id: String,
    name: String,
    slot: Mutex<Slot>,
    resolved: Notify,
}

impl PendingToolCall {
    fn new(call_id: String, name: String) -> Self {
        Self {
            call_id,
            name,
            slot: Mutex::new(Slot::default()),
            resolved: Notify::new(),
        }
    }

    /// Identifier echoed by the caller in `toolResult`.
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub async fn state(&self) -> CallState {
        self.slot.lock().await.state
    }

    async fn take_if_resolved(&self) -> Option<Result<ToolResult>> {
        let mut slot = self.slot.lock().await;
        if slot.state != CallState::Resolved {
            return None;
        }
        let Some(content) = slot.content.take() else {
            return Some(Err(AppError::Service(format!(
                "Tool result for call {} did not include content",
                self.call_id
            ))));
        };
        Some(Ok(ToolResult {
            content,
            is_error: slot.is_error,
        }))
    }
}

/// Concurrency-safe registry of pending tool calls keyed by call id.
#[derive(Debug, Default)]
pub struct RendezvousTable {
    entries: Mutex<HashMap<String, Arc<PendingToolCall>>>,
    timeout: Option<Duration>,
}

impl RendezvousTable {
    /// Table whose waits never time out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table whose waits fail after `timeout`; `None` waits indefinitely.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            entries: Mutex::default(),
            timeout,
        }
    }

    /// Insert a `Waiting` entry and return it.
    ///
    /// A live entry with the same id is replaced.
    pub async fn register(&self, call_id: &str, name: &str) -> Arc<PendingToolCall> {
        let entry = Arc::new(PendingToolCall::new(call_id.to_owned(), name.to_owned()));
        let previous = self
            .entries
            .lock()
            .await
            .insert(call_id.to_owned(), Arc::clone(&entry));
        if previous.is_some() {
            warn!(call_id, "tool call id registered twice, replacing entry");
        }
        debug!(call_id, name, "tool call registered");
        entry
    }

    /// Store a result for `call_id` and wake its waiter.
    ///
    /// Non-object content items are wrapped as text blocks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] when `call_id` is not registered.
    pub async fn resolve(&self, call_id: &str, content: Vec<Value>, is_error: bool) -> Result<()> {
        let entry = self.entries.lock().await.get(call_id).cloned();
        let Some(entry) = entry else {
            return Err(AppError::Service(format!("Unknown tool call id: {call_id}")));
        };

        {
            let mut slot = entry.slot.lock().await;
            slot.content = Some(normalise_content(content));
            slot.is_error = is_error;
            slot.state = CallState::Resolved;
        }
        entry.resolved.notify_one();
        debug!(call_id, is_error, "tool call resolved");
        Ok(())
    }

    /// Suspend until `entry` is resolved, the table's timeout elapses, or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`AppError::Service`] on timeout, or when the entry was resolved
    ///   without content.
    /// - [`AppError::Cancelled`] when `cancel` fires first.
    pub async fn wait(
        &self,
        entry: &PendingToolCall,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let resolved = async {
            loop {
                if let Some(outcome) = entry.take_if_resolved().await {
                    return outcome;
                }
                entry.resolved.notified().await;
            }
        };

        let bounded = async {
            match self.timeout {
                None => resolved.await,
                Some(limit) => match tokio::time::timeout(limit, resolved).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AppError::Service(format!(
                        "Timed out after {}s waiting for result of tool call {}",
                        limit.as_secs(),
                        entry.call_id
                    ))),
                },
            }
        };

        tokio::select! {
            biased;

            () = cancel.cancelled() => Err(AppError::Cancelled(format!(
                "chat cancelled while waiting for tool call {}",
                entry.call_id
            ))),
            outcome = bounded => outcome,
        }
    }

    /// Remove `call_id`; no-op when absent.
    pub async fn unregister(&self, call_id: &str) {
        if self.entries.lock().await.remove(call_id).is_some() {
            debug!(call_id, "tool call unregistered");
        }
    }

    /// Whether `call_id` is currently registered.
    pub async fn contains(&self, call_id: &str) -> bool {
        self.entries.lock().await.contains_key(call_id)
    }

    /// Number of registered calls.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no calls are registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn normalise_content(content: Vec<Value>) -> Vec<Value> {
    content
        .into_iter()
        .map(|item| match item {
            Value::Object(_) => item,
            Value::String(text) => json!({ "type": "text", "text": text }),
            other => json!({ "type": "text", "text": other.to_string() }),
        })
        .collect()
}
