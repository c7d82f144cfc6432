//! Sidecar service: owns the backend handle, the tool catalog and the
//! tool-call rendezvous table, and implements every non-protocol action.

pub mod tooling;

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::backend::{
    BackendFactory, BackendSettings, ChatSession, LanguageBackend, SampleRequest, SessionRequest,
    ToolDefinition, UploadRequest,
};
use crate::chat::translate::{generation_options, to_backend_messages};
use crate::chat::RendezvousTable;
use crate::config::SidecarConfig;
use crate::{AppError, Result};

/// Output cap for `validate` requests.
const VALIDATE_MAX_TOKENS: u64 = 128;

/// Fallback MIME type for uploads.
const OCTET_STREAM: &str = "application/octet-stream";

/// Parameters of the `initialize` action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeParams {
    /// API key; falls back to the configured key.
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
    /// Model name; falls back to the configured model.
    #[serde(default)]
    pub model: Option<String>,
}

/// Parameters of the `chat` action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatParams {
    /// Caller messages `{role, content: [blocks]}`.
    #[serde(default)]
    pub messages: Vec<Value>,
    /// Optional tool catalog replacing the registered one.
    #[serde(default)]
    pub tools: Vec<Value>,
    /// Generation options.
    #[serde(default)]
    pub options: Option<Value>,
}

/// Parameters of the `upload` action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    /// Local file path.
    #[serde(default)]
    pub path: String,
    /// Target collection.
    #[serde(default)]
    pub collection_id: Option<String>,
    /// Explicit MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Outcome of a `validate` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Raw model response.
    pub text: String,
    /// Whether the response mentions Grok.
    pub passed: bool,
}

impl ValidationOutcome {
    /// Result payload.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({ "passed": self.passed, "rawResponse": self.text })
    }
}

#[derive(Default)]
struct ServiceState {
    backend: Option<Arc<dyn LanguageBackend>>,
    model: String,
    tools: Vec<ToolDefinition>,
}

/// Shared service behind every action handler.
pub struct SidecarService {
    config: Arc<SidecarConfig>,
    factory: BackendFactory,
    state: RwLock<ServiceState>,
    tool_calls: Arc<RendezvousTable>,
    http: reqwest::Client,
}

impl std::fmt::Debug for SidecarService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SidecarService {
    /// Build the service; the backend is created later by `initialize`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(config: Arc<SidecarConfig>, factory: BackendFactory) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("grok-sidecar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build http client: {e}")))?;
        let tool_calls = Arc::new(RendezvousTable::with_timeout(config.tool_result_timeout()));

        Ok(Self {
            config,
            factory,
            state: RwLock::new(ServiceState::default()),
            tool_calls,
            http,
        })
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    /// Rendezvous table shared with chat coordinators.
    #[must_use]
    pub fn tool_calls(&self) -> Arc<RendezvousTable> {
        Arc::clone(&self.tool_calls)
    }

    /// Build the backend and mark the service ready.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` when no API key is available or the
    /// backend cannot be constructed.
    pub async fn initialise(&self, params: InitializeParams) -> Result<Value> {
        let api_key = params
            .api_key
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.config.api_key.clone());
        if api_key.is_empty() {
            return Err(AppError::Service(
                "API key is required to initialise Grok service".into(),
            ));
        }
        let model = params
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.model.clone());

        let settings = BackendSettings {
            api_key,
            model: model.clone(),
            base_url: self.config.base_url.clone(),
            collections_url: self.config.collections_url.clone(),
            request_timeout: self.config.request_timeout(),
        };
        let backend = (self.factory)(&settings).map_err(|e| {
            AppError::Service(format!("Failed to initialise Grok client: {}", e.detail()))
        })?;
        let supports_collections = backend.supports_collections();

        let mut state = self.state.write().await;
        state.backend = Some(backend);
        state.model.clone_from(&model);
        drop(state);

        info!(model = %model, supports_collections, "grok service initialised");
        Ok(json!({
            "status": "ok",
            "capabilities": { "supportsCollections": supports_collections },
        }))
    }

    /// Replace the tool catalog and return its size.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize`.
    pub async fn register_tools(&self, tools: Vec<ToolDefinition>) -> Result<usize> {
        let mut state = self.state.write().await;
        if state.backend.is_none() {
            return Err(not_initialised());
        }
        let count = tools.len();
        state.tools = tools;
        debug!(count, "tool catalog replaced");
        Ok(count)
    }

    /// Run a short identity check and report whether the model identifies as Grok.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize` or on backend failure.
    pub async fn validate(&self, prompt: &str) -> Result<ValidationOutcome> {
        let (backend, model) = self.ready().await?;
        let mut request = SampleRequest::prompt(model, prompt);
        request.max_tokens = Some(VALIDATE_MAX_TOKENS);

        let response = backend
            .sample(request)
            .await
            .map_err(|e| AppError::Service(format!("Validation request failed: {}", e.detail())))?;
        let passed = response.content.to_lowercase().contains("grok");
        Ok(ValidationOutcome {
            text: response.content,
            passed,
        })
    }

    /// Open a chat session for a `chat` request.
    ///
    /// A non-empty `tools` list replaces the registered catalog first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize` or when the backend
    /// refuses the session.
    pub async fn open_chat(&self, params: ChatParams) -> Result<Box<dyn ChatSession>> {
        let tools = parse_tool_definitions(&params.tools);
        if !tools.is_empty() {
            self.register_tools(tools).await?;
        }

        let (backend, model, tools) = {
            let state = self.state.read().await;
            let Some(backend) = state.backend.clone() else {
                return Err(not_initialised());
            };
            (backend, state.model.clone(), state.tools.clone())
        };

        let request = SessionRequest {
            model,
            messages: to_backend_messages(&params.messages),
            tools,
            options: generation_options(params.options.as_ref()),
        };
        backend.create_session(request).map_err(|e| {
            AppError::Service(format!("Failed to create Grok chat session: {}", e.detail()))
        })
    }

    /// Deliver a `toolResult` to the waiting chat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` when `call_id` is unknown.
    pub async fn submit_tool_result(
        &self,
        call_id: &str,
        content: Vec<Value>,
        is_error: bool,
    ) -> Result<()> {
        self.tool_calls.resolve(call_id, content, is_error).await
    }

    /// Upload a local file into a collection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` when the service is not ready, the
    /// collection or file is missing, collections are unsupported, or the
    /// upload fails.
    pub async fn upload(&self, params: UploadParams) -> Result<Value> {
        let (backend, _) = self.ready().await?;
        let Some(collection_id) = params.collection_id.filter(|c| !c.is_empty()) else {
            return Err(AppError::Service(
                "collectionId is required for Grok uploads".into(),
            ));
        };

        let path = Path::new(&params.path);
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(AppError::Service(format!(
                "Upload path does not exist: {}",
                params.path
            )));
        }
        if !backend.supports_collections() {
            return Err(AppError::Service(
                "Grok collections support is unavailable".into(),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| params.path.clone());
        let content_type = params
            .mime_type
            .filter(|m| !m.is_empty())
            .or_else(|| mime_guess::from_path(path).first_raw().map(str::to_owned))
            .unwrap_or_else(|| OCTET_STREAM.to_owned());
        let data = tokio::fs::read(path).await?;
        info!(
            collection_id = %collection_id,
            name = %name,
            content_type = %content_type,
            bytes = data.len(),
            "uploading document"
        );

        backend
            .upload_document(UploadRequest {
                collection_id,
                name,
                data,
                content_type,
            })
            .await
            .map_err(|e| {
                AppError::Service(format!("Failed to upload document to Grok: {}", e.detail()))
            })
    }

    async fn ready(&self) -> Result<(Arc<dyn LanguageBackend>, String)> {
        let state = self.state.read().await;
        match &state.backend {
            Some(backend) => Ok((Arc::clone(backend), state.model.clone())),
            None => Err(not_initialised()),
        }
    }
}

/// Build tool definitions from caller JSON, dropping entries without a name.
///
/// A schema that is not an object is replaced by `{}`.
#[must_use]
pub fn parse_tool_definitions(raw: &[Value]) -> Vec<ToolDefinition> {
    raw.iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?;
            if name.is_empty() {
                return None;
            }
            let schema = tool
                .get("schema")
                .filter(|s| s.is_object())
                .cloned()
                .unwrap_or_else(|| json!({}));
            Some(ToolDefinition {
                name: name.to_owned(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                schema,
            })
        })
        .collect()
}

fn not_initialised() -> AppError {
    AppError::Service("Grok service has not been initialised yet".into())
}
