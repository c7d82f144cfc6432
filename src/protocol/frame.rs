//! Inbound request parsing and outbound frame shapes.
//!
//! # Inbound
//!
//! Only `request` frames are accepted:
//!
//! ```json
//! {"type":"request","requestId":"r1","action":"chat","payload":{}}
//! ```
//!
//! # Outbound
//!
//! | `type`   | Fields                                            |
//! |----------|---------------------------------------------------|
//! | `result` | `requestId`, `payload`                            |
//! | `error`  | `requestId`, `error: {message, code}`             |
//! | `event`  | `requestId`, `payload` (with `event` discriminator)|

use serde::Serialize;
use serde_json::{Map, Value};

use crate::protocol::action::Action;

/// A validated inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    /// Caller-supplied correlation id.
    pub request_id: String,
    /// Requested action.
    pub action: Action,
    /// Action-specific payload; `{}` when absent or null.
    pub payload: Value,
}

/// An inbound line that could not be accepted as a request.
///
/// Carries whatever `requestId` could be recovered so the error frame can
/// still be correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRejection {
    /// Correlation id, when the line carried one.
    pub request_id: Option<String>,
    /// Human-readable reason, sent verbatim in the error frame.
    pub message: String,
}

impl FrameRejection {
    fn new(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            request_id,
            message: message.into(),
        }
    }
}

/// Parse a single inbound line into a [`RequestFrame`].
///
/// # Return value
///
/// - `Ok(Some(frame))`: a well-formed request naming a known action.
/// - `Ok(None)`: the line is empty or whitespace.
///
/// # Errors
///
/// - `Invalid JSON: …` with no request id when the line does not parse.
/// - `Expected message type 'request'` when `type` is anything else.
/// - `Missing requestId or action` when either is absent or empty.
/// - `Unknown action: …` when the action is not recognised.
pub fn parse_inbound_line(line: &str) -> Result<Option<RequestFrame>, FrameRejection> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| FrameRejection::new(None, format!("Invalid JSON: {e}")))?;

    let Value::Object(mut message) = value else {
        return Err(FrameRejection::new(None, "Expected message type 'request'"));
    };

    let request_id = message
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_owned);

    if message.get("type").and_then(Value::as_str) != Some("request") {
        return Err(FrameRejection::new(
            request_id,
            "Expected message type 'request'",
        ));
    }

    let action = message
        .get("action")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(str::to_owned);

    let (Some(id), Some(action)) = (request_id.clone().filter(|id| !id.is_empty()), action) else {
        return Err(FrameRejection::new(
            request_id,
            "Missing requestId or action",
        ));
    };

    let action: Action = action
        .parse()
        .map_err(|_| FrameRejection::new(Some(id.clone()), format!("Unknown action: {action}")))?;

    let payload = match message.remove("payload") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(payload) => payload,
    };

    Ok(Some(RequestFrame {
        request_id: id,
        action,
        payload,
    }))
}

/// Body of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Human-readable failure description.
    pub message: String,
    /// Machine-readable code such as `SERVICE_ERROR`, or null.
    pub code: Option<String>,
}

/// Streaming event payloads; serialised with an `event` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ChatEvent {
    /// Incremental text fragment.
    Delta {
        /// Text appended by this chunk.
        text: String,
    },
    /// Tool call surfaced by the model; answered with a `toolResult` request.
    ToolCall {
        /// Identifier the caller must echo back in `toolResult`.
        #[serde(rename = "callId")]
        call_id: String,
        /// Tool name.
        name: String,
        /// Raw JSON-encoded arguments as produced by the model.
        arguments: String,
    },
}

/// Frames written by the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Terminal success frame.
    Result {
        /// Correlation id.
        #[serde(rename = "requestId")]
        request_id: Option<String>,
        /// Action-specific result.
        payload: Option<Value>,
    },
    /// Terminal failure frame.
    Error {
        /// Correlation id; null when the line could not be parsed.
        #[serde(rename = "requestId")]
        request_id: Option<String>,
        /// Failure details.
        error: ErrorBody,
    },
    /// Non-terminal streaming frame.
    Event {
        /// Correlation id.
        #[serde(rename = "requestId")]
        request_id: String,
        /// Event payload.
        payload: ChatEvent,
    },
}

impl OutboundFrame {
    /// Correlation id carried by the frame.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Result { request_id, .. } | Self::Error { request_id, .. } => {
                request_id.as_deref()
            }
            Self::Event { request_id, .. } => Some(request_id),
        }
    }
}
