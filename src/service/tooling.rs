//! `tooling.*` actions: web search, web fetch, and the edit-correction
//! helpers used by the caller's file tools.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::backend::SampleRequest;
use crate::service::SidecarService;
use crate::{AppError, Result};

#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`)\]]+"#).expect("valid url pattern"));

#[allow(clippy::expect_used)]
static SCRIPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->")
        .expect("valid script pattern")
});

#[allow(clippy::expect_used)]
static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

#[allow(clippy::expect_used)]
static WHITESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

#[allow(clippy::expect_used)]
static ESCAPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\+(n|t|r|'|"|`|\\)"#).expect("valid escape pattern"));

/// Parameters of `tooling.webSearch`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSearchParams {
    /// Search query.
    #[serde(default)]
    pub query: String,
}

/// Parameters of `tooling.webFetch`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebFetchParams {
    /// Prompt containing one or more URLs.
    #[serde(default)]
    pub prompt: String,
}

/// Parameters of `tooling.ensureCorrectEdit`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureCorrectEditParams {
    /// File being edited.
    #[serde(default)]
    pub file_path: String,
    /// Current file content.
    #[serde(default)]
    pub current_content: String,
    /// Edit parameters `{file_path, old_string, new_string, ...}`.
    #[serde(default)]
    pub original_params: Map<String, Value>,
    /// Instruction the edit implements.
    #[serde(default)]
    pub instruction: String,
}

/// Parameters of `tooling.ensureCorrectFileContent`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnsureCorrectFileContentParams {
    /// Proposed file content.
    #[serde(default)]
    pub content: String,
}

/// Parameters of `tooling.fixEditWithInstruction`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixEditParams {
    /// Instruction the edit implements.
    #[serde(default)]
    pub instruction: String,
    /// Search string that failed to apply.
    #[serde(default)]
    pub old_string: String,
    /// Intended replacement.
    #[serde(default)]
    pub new_string: String,
    /// Error reported when applying the edit.
    #[serde(default)]
    pub error: String,
    /// Current file content.
    #[serde(default)]
    pub current_content: String,
}

/// Parameters of `tooling.summarizeText`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummarizeParams {
    /// Text to summarise.
    #[serde(default)]
    pub text: String,
    /// Output token cap.
    #[serde(default, alias = "maxOutputTokens")]
    pub max_output_tokens: Option<u64>,
}

impl SidecarService {
    /// Answer a query with live web search.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize`, for an empty query,
    /// or on backend failure.
    pub async fn web_search(&self, params: WebSearchParams) -> Result<Value> {
        let query = params.query.trim();
        if query.is_empty() {
            return Err(AppError::Service(
                "The 'query' parameter cannot be empty.".into(),
            ));
        }
        let (backend, model) = self.ready().await?;
        let mut request = SampleRequest::prompt(model, query);
        request.live_search = true;

        let response = backend
            .sample(request)
            .await
            .map_err(|e| AppError::Service(format!("Web search failed: {}", e.detail())))?;

        if response.content.trim().is_empty() {
            return Ok(json!({
                "llmContent": format!("No search results or information found for query: \"{query}\""),
                "returnDisplay": "No information found.",
                "sources": response.citations,
            }));
        }

        let mut llm_content = format!(
            "Web search results for \"{query}\":\n\n{}",
            response.content.trim()
        );
        if !response.citations.is_empty() {
            llm_content.push_str("\n\nSources:");
            for (index, url) in response.citations.iter().enumerate() {
                let _ = write!(llm_content, "\n[{}] {url}", index + 1);
            }
        }
        Ok(json!({
            "llmContent": llm_content,
            "returnDisplay": format!("Search results for \"{query}\" returned."),
            "sources": response.citations,
        }))
    }

    /// Fetch every URL named in the prompt and let the model answer from
    /// the fetched text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` when the prompt names no URL, a fetch
    /// fails, or the backend fails.
    pub async fn web_fetch(&self, params: WebFetchParams) -> Result<Value> {
        let urls = extract_urls(&params.prompt);
        if urls.is_empty() {
            return Err(AppError::Service(
                "The 'prompt' must contain at least one valid URL (starting with http:// or https://)."
                    .into(),
            ));
        }
        let (backend, model) = self.ready().await?;

        let mut prompt = format!(
            "The user requested the following: \"{}\".\n\n\
             I have fetched the content from the URL(s) below. Answer the request \
             using only this content.\n",
            params.prompt.trim()
        );
        for url in &urls {
            let text = self.fetch_text(url).await?;
            let _ = write!(prompt, "\n--- Content from {url} ---\n{text}\n");
        }

        let response = backend
            .sample(SampleRequest::prompt(model, prompt))
            .await
            .map_err(|e| AppError::Service(format!("Web fetch failed: {}", e.detail())))?;
        Ok(json!({
            "llmContent": response.content,
            "returnDisplay": format!("Content processed from {} URL(s).", urls.len()),
            "sources": urls,
        }))
    }

    /// Make an edit's `old_string` match the file, asking the model for a
    /// correction when it does not occur.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize` or on backend failure.
    pub async fn ensure_correct_edit(&self, params: EnsureCorrectEditParams) -> Result<Value> {
        let mut edit = params.original_params;
        let old_string = str_field(&edit, "old_string");
        let occurrences = count_occurrences(&params.current_content, &old_string);
        if occurrences > 0 {
            return Ok(json!({ "params": edit, "occurrences": occurrences }));
        }

        debug!(file = %params.file_path, "old_string not found, requesting correction");
        let prompt = format!(
            "An edit to the file `{file}` could not be applied because its search \
             string was not found.\n\n\
             Instruction: {instruction}\n\n\
             Search string (old_string):\n{old}\n\n\
             Replacement (new_string):\n{new}\n\n\
             Current file content:\n{content}\n\n\
             Reply with a JSON object {{\"old_string\": ..., \"new_string\": ...}} where \
             old_string is copied exactly from the current file content and new_string \
             applies the intended change. Reply with the JSON object only.",
            file = params.file_path,
            instruction = params.instruction,
            old = old_string,
            new = str_field(&edit, "new_string"),
            content = params.current_content,
        );
        let reply = self.ask(prompt, None).await?;

        let Some(correction) = extract_json_object(&reply) else {
            warn!(file = %params.file_path, "model reply held no edit correction");
            return Ok(json!({ "params": edit, "occurrences": 0 }));
        };
        let corrected_old = correction
            .get("old_string")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let occurrences = count_occurrences(&params.current_content, &corrected_old);
        if occurrences == 0 {
            return Ok(json!({ "params": edit, "occurrences": 0 }));
        }

        edit.insert("old_string".into(), Value::String(corrected_old));
        if let Some(new_string) = correction.get("new_string").and_then(Value::as_str) {
            edit.insert("new_string".into(), Value::String(new_string.to_owned()));
        }
        Ok(json!({ "params": edit, "occurrences": occurrences }))
    }

    /// Repair over-escaped file content.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize` or on backend failure.
    pub async fn ensure_correct_file_content(
        &self,
        params: EnsureCorrectFileContentParams,
    ) -> Result<Value> {
        if !ESCAPE_PATTERN.is_match(&params.content) {
            return Ok(json!({ "content": params.content }));
        }

        let prompt = format!(
            "The following file content may contain improperly escaped sequences \
             such as \\n, \\t or \\\" where literal newlines, tabs or quotes were \
             intended. Return the corrected content as a JSON object \
             {{\"corrected_string_escaping\": ...}} and nothing else.\n\n{}",
            params.content
        );
        let reply = self.ask(prompt, None).await?;
        let corrected = extract_json_object(&reply)
            .and_then(|obj| {
                obj.get("corrected_string_escaping")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| unescape_literals(&params.content));
        Ok(json!({ "content": corrected }))
    }

    /// Ask the model to repair a failed edit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize`, on backend failure,
    /// or when the reply holds no JSON object.
    pub async fn fix_edit_with_instruction(&self, params: FixEditParams) -> Result<Value> {
        let prompt = format!(
            "A search-and-replace edit failed.\n\n\
             Instruction: {instruction}\n\n\
             Search:\n{old}\n\n\
             Replace:\n{new}\n\n\
             Error: {error}\n\n\
             Current file content:\n{content}\n\n\
             Reply with a JSON object {{\"search\": ..., \"replace\": ..., \
             \"noChangesRequired\": bool, \"explanation\": ...}} where search is copied \
             exactly from the current content. Reply with the JSON object only.",
            instruction = params.instruction,
            old = params.old_string,
            new = params.new_string,
            error = params.error,
            content = params.current_content,
        );
        let reply = self.ask(prompt, None).await?;
        let Some(fix) = extract_json_object(&reply) else {
            return Err(AppError::Service(
                "Failed to parse edit correction from model response".into(),
            ));
        };

        Ok(json!({
            "search": fix.get("search").and_then(Value::as_str).unwrap_or(params.old_string.as_str()),
            "replace": fix.get("replace").and_then(Value::as_str).unwrap_or(params.new_string.as_str()),
            "noChangesRequired": fix
                .get("noChangesRequired")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            "explanation": fix.get("explanation").and_then(Value::as_str).unwrap_or_default(),
        }))
    }

    /// Summarise text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Service` before `initialize` or on backend failure.
    pub async fn summarize_text(&self, params: SummarizeParams) -> Result<Value> {
        if params.text.trim().is_empty() {
            return Ok(json!({ "summary": "" }));
        }
        let prompt = format!(
            "Summarize the following text concisely, keeping the key facts.\n\n{}",
            params.text
        );
        let summary = self.ask(prompt, params.max_output_tokens).await?;
        Ok(json!({ "summary": summary.trim() }))
    }

    async fn ask(&self, prompt: String, max_tokens: Option<u64>) -> Result<String> {
        let (backend, model) = self.ready().await?;
        let mut request = SampleRequest::prompt(model, prompt);
        request.max_tokens = max_tokens;
        backend
            .sample(request)
            .await
            .map(|response| response.content)
            .map_err(|e| AppError::Service(format!("Grok request failed: {}", e.detail())))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(url, "fetching");
        let fetch_error =
            |e: reqwest::Error| AppError::Service(format!("Error during fetch for {url}: {e}"));
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?;
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("html"));
        let body = response.text().await.map_err(fetch_error)?;

        let text = if is_html || body.trim_start().starts_with('<') {
            strip_markup(&body)
        } else {
            body
        };
        Ok(truncate_chars(&text, self.config.web_fetch_max_chars))
    }
}

/// Distinct http(s) URLs in `text`, in order of appearance.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for found in URL_PATTERN.find_iter(text) {
        let url = found
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_owned());
        }
    }
    urls
}

/// Reduce an HTML document to its visible text.
#[must_use]
pub fn strip_markup(html: &str) -> String {
    let without_scripts = SCRIPT_PATTERN.replace_all(html, " ");
    let without_tags = TAG_PATTERN.replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE_PATTERN
        .replace_all(&decoded, " ")
        .trim()
        .to_owned()
}

/// Non-overlapping occurrences of `needle`; zero for an empty needle.
#[must_use]
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        0
    } else {
        haystack.matches(needle).count()
    }
}

/// First balanced-looking JSON object embedded in a model reply.
///
/// Accepts bare JSON and JSON wrapped in prose or a fenced block.
#[must_use]
pub fn extract_json_object(reply: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(obj)) = serde_json::from_str(reply.trim()) {
        return Some(obj);
    }
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&reply[start..=end]) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Collapse escaped sequences such as `\\n` into the characters they name.
#[must_use]
pub fn unescape_literals(text: &str) -> String {
    ESCAPE_PATTERN
        .replace_all(text, |caps: &regex::Captures<'_>| match &caps[1] {
            "n" => "\n".to_owned(),
            "t" => "\t".to_owned(),
            "r" => "\r".to_owned(),
            other => other.to_owned(),
        })
        .into_owned()
}

fn str_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_owned(),
        None => text.to_owned(),
    }
}
