//! Protocol engine: the input loop and request dispatch.
//!
//! One reading task consumes stdin line by line. `chat` requests are handed
//! to their own task and the loop moves on immediately; every other action
//! runs to completion on the reading path before the next line is read, so a
//! `toolResult` is always routed while its chat is parked on the rendezvous.
//!
//! Shutdown (a `shutdown` request, EOF, or the engine token firing) stops
//! the loop and gives each in-flight chat a short grace period.

pub mod handlers;
pub mod tasks;

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::chat::ChatCoordinator;
use crate::errors::SERVICE_ERROR;
use crate::protocol::codec::{FrameCodec, InboundLine};
use crate::protocol::frame::parse_inbound_line;
use crate::protocol::{Action, OutputSink, RequestFrame};
use crate::service::{ChatParams, SidecarService};
use crate::Result;

pub use tasks::ChatTasks;

/// Whether the input loop keeps reading after a line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoopControl {
    /// Read the next line.
    Continue,
    /// Stop reading and shut down.
    Stop,
}

/// Reads requests, dispatches them and owns the chat task registry.
#[derive(Debug)]
pub struct ProtocolEngine {
    service: Arc<SidecarService>,
    sink: OutputSink,
    tasks: ChatTasks,
    cancel: CancellationToken,
}

impl ProtocolEngine {
    /// Engine writing every frame to `sink`.
    #[must_use]
    pub fn new(service: Arc<SidecarService>, sink: OutputSink) -> Self {
        Self {
            service,
            sink,
            tasks: ChatTasks::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the input loop; every chat token is a child of it.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Consume `input` until shutdown, EOF or cancellation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` when reading the input fails. Malformed,
    /// oversized or non-UTF-8 lines are reported on the sink and never end
    /// the loop.
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut framed = FramedRead::new(input, FrameCodec::new());
        info!("protocol engine ready");

        let outcome = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!("engine cancelled, stopping input loop");
                    break Ok(());
                }

                item = framed.next() => match item {
                    None => {
                        info!("input closed");
                        break Ok(());
                    }
                    Some(Ok(InboundLine::Text(line))) => {
                        if self.handle_line(&line).await == LoopControl::Stop {
                            break Ok(());
                        }
                    }
                    Some(Ok(InboundLine::Rejected(msg))) => {
                        warn!(error = %msg, "inbound line rejected by codec");
                        self.reject(None, msg).await;
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "input read failed");
                        break Err(err);
                    }
                },
            }
        };

        let abandoned = self
            .tasks
            .drain(self.service.config().shutdown_grace())
            .await;
        info!(abandoned, "protocol engine stopped");
        outcome
    }

    /// Parse and dispatch one inbound line.
    pub async fn handle_line(&self, line: &str) -> LoopControl {
        debug!("<- {line}");
        match parse_inbound_line(line) {
            Ok(None) => LoopControl::Continue,
            Ok(Some(frame)) => {
                let span = info_span!(
                    "request",
                    request_id = %frame.request_id,
                    action = %frame.action
                );
                self.dispatch(frame).instrument(span).await
            }
            Err(rejection) => {
                warn!(
                    request_id = ?rejection.request_id,
                    error = %rejection.message,
                    "rejected inbound line"
                );
                self.reject(rejection.request_id.as_deref(), rejection.message)
                    .await;
                LoopControl::Continue
            }
        }
    }

    async fn dispatch(&self, frame: RequestFrame) -> LoopControl {
        let RequestFrame {
            request_id,
            action,
            payload,
        } = frame;
        let service = self.service.as_ref();

        let outcome = match action {
            Action::Chat => {
                self.spawn_chat(request_id, payload).await;
                return LoopControl::Continue;
            }
            Action::Shutdown => {
                info!("shutdown requested");
                self.sink
                    .report(&request_id, Ok(json!({ "status": "shutting down" })))
                    .await;
                return LoopControl::Stop;
            }
            Action::Initialize => handlers::initialize(service, payload).await,
            Action::RegisterTools => handlers::register_tools(service, payload).await,
            Action::Validate => handlers::validate(service, &self.sink, &request_id, payload).await,
            Action::ToolResult => handlers::tool_result(service, payload).await,
            Action::WebSearch => handlers::web_search(service, payload).await,
            Action::WebFetch => handlers::web_fetch(service, payload).await,
            Action::EnsureCorrectEdit => handlers::ensure_correct_edit(service, payload).await,
            Action::EnsureCorrectFileContent => {
                handlers::ensure_correct_file_content(service, payload).await
            }
            Action::FixEditWithInstruction => {
                handlers::fix_edit_with_instruction(service, payload).await
            }
            Action::SummarizeText => handlers::summarize_text(service, payload).await,
            Action::Upload => handlers::upload(service, payload).await,
        };

        self.sink.report(&request_id, outcome).await;
        LoopControl::Continue
    }

    async fn spawn_chat(&self, request_id: String, payload: Value) {
        if let Some(limit) = self.service.config().chat_limit() {
            if self.tasks.len().await >= limit {
                warn!(request_id = %request_id, limit, "chat rejected, concurrency limit reached");
                if let Err(err) = self
                    .sink
                    .send_error(
                        Some(&request_id),
                        format!("Too many concurrent chats (limit {limit})"),
                        Some(SERVICE_ERROR),
                    )
                    .await
                {
                    warn!(
                        request_id = %request_id,
                        error = %err,
                        "failed to deliver chat rejection"
                    );
                }
                return;
            }
        }

        let params: ChatParams = match handlers::parse_payload(Action::Chat, payload) {
            Ok(params) => params,
            Err(err) => {
                self.sink.report(&request_id, Err(err)).await;
                return;
            }
        };

        let cancel = self.cancel.child_token();
        let service = Arc::clone(&self.service);
        let sink = self.sink.clone();
        let id = request_id.clone();
        let task_cancel = cancel.clone();
        let task = async move {
            let outcome = run_chat(&service, &sink, &id, params, task_cancel).await;
            sink.report(&id, outcome).await;
        }
        .instrument(info_span!("chat", request_id = %request_id));

        self.tasks.spawn(&request_id, cancel, task).await;
    }

    async fn reject(&self, request_id: Option<&str>, message: String) {
        if let Err(err) = self.sink.send_error(request_id, message, None).await {
            warn!(error = %err, "failed to deliver error frame");
        }
    }
}

async fn run_chat(
    service: &SidecarService,
    sink: &OutputSink,
    request_id: &str,
    params: ChatParams,
    cancel: CancellationToken,
) -> Result<Value> {
    let session = service.open_chat(params).await?;
    ChatCoordinator::new(request_id, sink.clone(), service.tool_calls(), cancel)
        .run(session)
        .await
}
