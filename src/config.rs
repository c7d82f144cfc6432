//! Sidecar configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Environment variable holding the xAI API key.
pub const API_KEY_ENV: &str = "XAI_API_KEY";

fn default_model() -> String {
    "grok-beta".into()
}

fn default_base_url() -> String {
    "https://api.x.ai/v1".into()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_shutdown_grace() -> u64 {
    100
}

fn default_web_fetch_max_chars() -> usize {
    100_000
}

/// Sidecar configuration parsed from an optional `config.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SidecarConfig {
    /// Model used when `initialize` does not name one.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the OpenAI-compatible xAI REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Base URL of the collections management API. Uploads are disabled when
    /// absent.
    #[serde(default)]
    pub collections_url: Option<String>,
    /// API key fallback for `initialize` (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
    /// Timeout for non-streaming backend and fetch requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long shutdown waits for each in-flight chat before abandoning it.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_millis: u64,
    /// Tool result wait limit; 0 means wait indefinitely.
    #[serde(default)]
    pub tool_result_timeout_secs: u64,
    /// Maximum simultaneously active chats; 0 means unbounded.
    #[serde(default)]
    pub max_concurrent_chats: usize,
    /// Upper bound on characters kept from each fetched document.
    #[serde(default = "default_web_fetch_max_chars")]
    pub web_fetch_max_chars: usize,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            collections_url: None,
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_millis: default_shutdown_grace(),
            tool_result_timeout_secs: 0,
            max_concurrent_chats: 0,
            web_fetch_max_chars: default_web_fetch_max_chars(),
        }
    }
}

impl SidecarConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Pick up the API key from the environment.
    ///
    /// A missing key is not an error here; `initialize` rejects requests that
    /// carry no key when no fallback is available.
    pub fn load_credentials(&mut self) {
        match env::var(API_KEY_ENV) {
            Ok(value) if !value.trim().is_empty() => self.api_key = value.trim().to_owned(),
            _ => debug!(key = API_KEY_ENV, "no api key in environment"),
        }
    }

    /// Timeout applied to single-shot HTTP requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Grace period granted to each in-flight chat on shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }

    /// Bounded wait for a tool result, or `None` to wait indefinitely.
    #[must_use]
    pub fn tool_result_timeout(&self) -> Option<Duration> {
        (self.tool_result_timeout_secs > 0)
            .then(|| Duration::from_secs(self.tool_result_timeout_secs))
    }

    /// Admission limit for concurrent chats, or `None` when unbounded.
    #[must_use]
    pub fn chat_limit(&self) -> Option<usize> {
        (self.max_concurrent_chats > 0).then_some(self.max_concurrent_chats)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(AppError::Config("base_url must not be empty".into()));
        }

        if self.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "request_timeout_secs must be greater than zero".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(AppError::Config("model must not be empty".into()));
        }

        Ok(())
    }
}
