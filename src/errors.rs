//! Error types shared across the sidecar.

use std::fmt::{Display, Formatter};

/// Shared sidecar result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error code attached to error frames caused by [`AppError::Service`].
pub const SERVICE_ERROR: &str = "SERVICE_ERROR";

/// Sidecar error enumeration covering every failure mode the engine reports.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed frame, missing field, or malformed action payload.
    Protocol(String),
    /// Domain failure inside a request (backend call, unknown call id, missing
    /// capability). Reported with the `SERVICE_ERROR` code.
    Service(String),
    /// Transport-level failure talking to the language backend.
    Backend(String),
    /// File-system or stdio failure.
    Io(String),
    /// The owning task was cancelled during shutdown.
    Cancelled(String),
}

impl AppError {
    /// Wire error code for this failure, if it has one.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Service(_) => Some(SERVICE_ERROR),
            _ => None,
        }
    }

    /// Message without the variant prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Protocol(msg)
            | Self::Service(msg)
            | Self::Backend(msg)
            | Self::Io(msg)
            | Self::Cancelled(msg) => msg,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Service(msg) => write!(f, "service: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
