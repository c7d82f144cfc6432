//! Output sink shared by the reading path and every chat task.
//!
//! Serialises each [`OutboundFrame`] to a compact single-line JSON string and
//! writes it through a [`FramedWrite`] guarded by one async mutex, so two
//! frames never interleave inside a line. `FramedWrite::send` flushes after
//! every frame.

use std::sync::Arc;

use futures_util::SinkExt;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::errors::SERVICE_ERROR;
use crate::protocol::codec::FrameCodec;
use crate::protocol::frame::{ChatEvent, ErrorBody, OutboundFrame};
use crate::{AppError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cloneable handle onto the single output channel.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<FramedWrite<BoxedWriter, FrameCodec>>>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

impl OutputSink {
    /// Wrap any async writer.
    #[must_use]
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            writer: Arc::new(Mutex::new(FramedWrite::new(boxed, FrameCodec::new()))),
        }
    }

    /// Sink writing to the process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Write one frame.
    ///
    /// The mutex is held for exactly one serialised line plus its flush.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] if the frame cannot be serialised.
    /// - [`AppError::Io`] if the write or flush fails.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<()> {
        let line = serde_json::to_string(frame)
            .map_err(|e| AppError::Protocol(format!("failed to serialise outbound frame: {e}")))?;
        debug!("-> {line}");

        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(|e| {
            warn!(error = %e, "output write failed");
            e
        })
    }

    /// Write a terminal `result` frame.
    ///
    /// # Errors
    ///
    /// See [`OutputSink::send`].
    pub async fn send_result(&self, request_id: Option<&str>, payload: Value) -> Result<()> {
        self.send(&OutboundFrame::Result {
            request_id: request_id.map(str::to_owned),
            payload: Some(payload),
        })
        .await
    }

    /// Write a terminal `error` frame.
    ///
    /// # Errors
    ///
    /// See [`OutputSink::send`].
    pub async fn send_error(
        &self,
        request_id: Option<&str>,
        message: impl Into<String>,
        code: Option<&str>,
    ) -> Result<()> {
        self.send(&OutboundFrame::Error {
            request_id: request_id.map(str::to_owned),
            error: ErrorBody {
                message: message.into(),
                code: code.map(str::to_owned),
            },
        })
        .await
    }

    /// Write an `event` frame.
    ///
    /// # Errors
    ///
    /// See [`OutputSink::send`].
    pub async fn send_event(&self, request_id: &str, event: ChatEvent) -> Result<()> {
        self.send(&OutboundFrame::Event {
            request_id: request_id.to_owned(),
            payload: event,
        })
        .await
    }

    /// Report the outcome of a handler as its terminal frame.
    ///
    /// Service failures carry `SERVICE_ERROR`; protocol and cancellation
    /// failures carry their message and no code; anything else is reported as
    /// unhandled. Write failures are logged, never propagated, so one broken
    /// request cannot stop the caller.
    pub async fn report(&self, request_id: &str, outcome: Result<Value>) {
        let written = match outcome {
            Ok(payload) => self.send_result(Some(request_id), payload).await,
            Err(AppError::Service(msg)) => {
                warn!(request_id, error = %msg, "service error");
                self.send_error(Some(request_id), msg, Some(SERVICE_ERROR))
                    .await
            }
            Err(AppError::Protocol(msg) | AppError::Cancelled(msg)) => {
                warn!(request_id, error = %msg, "request rejected");
                self.send_error(Some(request_id), msg, None).await
            }
            Err(err) => {
                tracing::error!(request_id, error = %err, "unhandled error");
                let message = format!("Unhandled error: {}", err.detail());
                self.send_error(Some(request_id), message, None).await
            }
        };

        if let Err(err) = written {
            warn!(request_id, error = %err, "failed to deliver terminal frame");
        }
    }
}
