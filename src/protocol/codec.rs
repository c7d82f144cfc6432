//! NDJSON codec for the sidecar's stdio channel.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! caller that never sends a newline cannot make the sidecar buffer without
//! bound.
//!
//! # Usage
//!
//! Use [`FrameCodec`] with [`tokio_util::codec::FramedRead`] on stdin and
//! [`tokio_util::codec::FramedWrite`] on stdout.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum inbound line length: 16 MiB.
///
/// Tool results may carry whole file contents, so the limit is generous.
/// Longer lines are discarded and yielded as [`InboundLine::Rejected`].
pub const MAX_LINE_BYTES: usize = 16 * 1_048_576;

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// A complete line with its terminator stripped.
    Text(String),
    /// A line dropped before parsing; carries the error message to report.
    Rejected(String),
}

impl InboundLine {
    /// The line text, if it was accepted.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(line) => Some(line),
            Self::Rejected(_) => None,
        }
    }
}

/// Line codec for protocol frames.
///
/// # Decoder
///
/// Line-level problems never surface as decoder errors: a line longer than
/// the limit, or one that is not valid UTF-8, is consumed and yielded as
/// [`InboundLine::Rejected`] so the reader keeps going with whatever is
/// already buffered. Only read failures on the underlying input are errors
/// ([`AppError::Io`]).
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }

    fn classify(
        &self,
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<InboundLine>> {
        match decoded {
            Ok(line) => Ok(line.map(InboundLine::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InboundLine::Rejected(
                format!("line too long: exceeded {} bytes", self.0.max_length()),
            ))),
            // LinesCodec has already consumed the offending line.
            Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => Ok(Some(
                InboundLine::Rejected("Invalid JSON: input is not valid UTF-8".into()),
            )),
            Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = InboundLine;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.0.decode(src);
        self.classify(decoded)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.0.decode_eof(src);
        self.classify(decoded)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // The max length only applies when decoding.
        self.0
            .encode(item, dst)
            .map_err(|e| AppError::Io(e.to_string()))
    }
}
