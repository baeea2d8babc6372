//! LLM backends: the HTTP edge of the gateway.
//!
//! A backend turns one [`CompletionRequest`] -- rendered prompt plus the
//! task's [`GenerationProfile`] -- into a [`Completion`]: the response
//! text and whatever token usage the endpoint reported, which the
//! gateway feeds into its cost accounting. Temperature and the token
//! ceiling travel with the request because tasks differ: a story wants
//! room and heat, a relation verdict wants neither.
//!
//! The set of backends is closed (two wire protocols plus a scripted
//! stand-in), so dispatch is a plain enum `match`; there is no trait
//! object to keep open for plugins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::AiError;
use crate::prompt::RenderedPrompt;

/// Connection settings for one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the API (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// API key.
    pub api_key: String,
    /// Model name to request.
    pub model: String,
}

/// Which protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// OpenAI-compatible chat completions (OpenAI, DeepSeek, Ollama).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Canned responses, no network.
    Scripted,
}

impl BackendKind {
    /// Parse a mode string from configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "openai-compatible" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "scripted" => Some(Self::Scripted),
            _ => None,
        }
    }
}

/// Sampling settings carried by each request, chosen per task by the
/// gateway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationProfile {
    /// Completion token ceiling.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GenerationProfile {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

/// One unit of work for a backend.
#[derive(Debug)]
pub struct CompletionRequest<'a> {
    /// The rendered system + user prompt.
    pub prompt: &'a RenderedPrompt,
    /// Task-specific sampling settings.
    pub profile: GenerationProfile,
}

/// Token usage reported by the endpoint (zeros when it reports none).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt: u64,
    /// Tokens produced by the completion.
    pub completion: u64,
}

/// A backend's answer: response text plus usage for cost accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The raw response text (ideally JSON).
    pub text: String,
    /// Reported token usage.
    pub usage: TokenUsage,
}

/// An LLM backend that can answer a completion request.
pub enum LlmBackend {
    /// OpenAI-compatible chat completions API.
    OpenAi(OpenAiBackend),
    /// Anthropic Messages API.
    Anthropic(AnthropicBackend),
    /// Canned responses for tests and headless runs.
    Scripted(ScriptedBackend),
}

impl LlmBackend {
    /// Answer a completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Transport`] or [`AiError::Http`] if the call
    /// fails or the response carries no usable text.
    pub async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, AiError> {
        match self {
            Self::OpenAi(backend) => backend.complete(request).await,
            Self::Anthropic(backend) => backend.complete(request).await,
            Self::Scripted(backend) => backend.complete(request).await,
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
            Self::Scripted(_) => "scripted",
        }
    }
}

/// Create a backend from a kind and connection settings.
pub fn create_backend(kind: BackendKind, config: &BackendConfig) -> LlmBackend {
    match kind {
        BackendKind::OpenAi => LlmBackend::OpenAi(OpenAiBackend::new(config)),
        BackendKind::Anthropic => LlmBackend::Anthropic(AnthropicBackend::new(config)),
        BackendKind::Scripted => LlmBackend::Scripted(ScriptedBackend::empty_object()),
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible backend
// ---------------------------------------------------------------------------

/// Response shape of a chat completion, reduced to the fields the
/// gateway consumes.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Backend for OpenAI-compatible chat completions APIs.
///
/// Posts to `{api_url}/chat/completions` with the system prompt as its
/// own message and JSON-object response format forced: every task in
/// this engine expects a structured answer.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Answer a completion request.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, AiError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.prompt.system},
                {"role": "user", "content": request.prompt.user}
            ],
            "temperature": request.profile.temperature,
            "max_tokens": request.profile.max_tokens,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(format!("chat completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(status.as_u16(), response).await);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::Transport(format!("chat completion body unreadable: {e}")))?;

        let usage = parsed.usage.unwrap_or_default();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                AiError::Transport("chat completion carried no message content".to_owned())
            })?;

        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt: usage.prompt_tokens,
                completion: usage.completion_tokens,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Anthropic Messages API backend
// ---------------------------------------------------------------------------

/// Response shape of a messages call, reduced to the fields the
/// gateway consumes.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<MessageBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Backend for the Anthropic Messages API.
///
/// The protocol keeps the system prompt as a top-level field and
/// authenticates with `x-api-key` plus a pinned `anthropic-version`;
/// response text comes back as a list of content blocks, of which the
/// first textual one is taken.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicBackend {
    /// Create a new Anthropic Messages API backend.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Answer a completion request.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, AiError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.profile.max_tokens,
            "temperature": request.profile.temperature,
            "system": request.prompt.system,
            "messages": [
                {"role": "user", "content": request.prompt.user}
            ]
        });

        let response = self
            .client
            .post(format!("{}/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(format!("messages request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(status.as_u16(), response).await);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AiError::Transport(format!("messages body unreadable: {e}")))?;

        let usage = parsed.usage.unwrap_or_default();
        let text = parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| AiError::Transport("messages response had no text block".to_owned()))?;

        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt: usage.input_tokens,
                completion: usage.output_tokens,
            },
        })
    }
}

/// Drain a failed response into an [`AiError::Http`], keeping the body
/// short enough for logs.
async fn http_error(status: u16, response: reqwest::Response) -> AiError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_owned());
    AiError::Http {
        status,
        body: truncate(&body, 512),
    }
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// A backend that answers every request with a canned response after an
/// optional delay. Used by tests (concurrency properties) and by
/// headless runs without an API key. Usage is synthesized from byte
/// counts so the cost tracker sees non-zero traffic in scripted runs.
pub struct ScriptedBackend {
    response: String,
    delay: Duration,
    in_flight: Arc<AtomicU32>,
    high_water: Arc<AtomicU32>,
}

/// Rough bytes-per-token divisor for synthesized scripted usage.
const BYTES_PER_TOKEN: u64 = 4;

impl ScriptedBackend {
    /// A scripted backend returning an empty JSON object immediately.
    pub fn empty_object() -> Self {
        Self::new("{}", Duration::ZERO)
    }

    /// A scripted backend returning `response` after `delay`.
    pub fn new(response: impl Into<String>, delay: Duration) -> Self {
        Self {
            response: response.into(),
            delay,
            in_flight: Arc::new(AtomicU32::new(0)),
            high_water: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The highest number of concurrently running completions observed.
    pub fn high_water_mark(&self) -> u32 {
        self.high_water.load(Ordering::Acquire)
    }

    /// Answer with the canned response, tracking concurrency.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, AiError> {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        self.high_water.fetch_max(current, Ordering::AcqRel);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let prompt_bytes = request
            .prompt
            .system
            .len()
            .saturating_add(request.prompt.user.len());
        Ok(Completion {
            text: self.response.clone(),
            usage: TokenUsage {
                prompt: (prompt_bytes as u64) / BYTES_PER_TOKEN,
                completion: (self.response.len() as u64) / BYTES_PER_TOKEN,
            },
        })
    }
}

/// Truncate a string to at most `max_len` bytes on a valid UTF-8
/// boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_owned();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    s.get(..end).unwrap_or_default().to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(prompt: &RenderedPrompt) -> CompletionRequest<'_> {
        CompletionRequest {
            prompt,
            profile: GenerationProfile::default(),
        }
    }

    #[test]
    fn chat_completion_parses_text_and_usage() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{\"plans\": []}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(
            parsed.choices.into_iter().next().unwrap().message.content.as_deref(),
            Some("{\"plans\": []}")
        );
    }

    #[test]
    fn chat_completion_tolerates_missing_usage() {
        let raw = r#"{"choices": [{"message": {"content": "{}"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn empty_choices_would_surface_as_no_content() {
        let raw = r#"{"error": "rate_limit"}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices.into_iter().next().is_none());
    }

    #[test]
    fn messages_response_takes_the_first_text_block() {
        let raw = r#"{
            "content": [
                {"type": "thinking"},
                {"type": "text", "text": "{\"nickname\": \"Sword Demon\"}"}
            ],
            "usage": {"input_tokens": 88, "output_tokens": 12}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let text = parsed.content.into_iter().find_map(|block| block.text);
        assert_eq!(text.as_deref(), Some("{\"nickname\": \"Sword Demon\"}"));
    }

    #[test]
    fn messages_response_without_text_yields_none() {
        let raw = r#"{"content": []}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.content.into_iter().find_map(|block| block.text).is_none());
    }

    #[test]
    fn backend_kind_parsing() {
        assert_eq!(BackendKind::parse("OpenAI"), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::parse("anthropic"), Some(BackendKind::Anthropic));
        assert_eq!(BackendKind::parse("scripted"), Some(BackendKind::Scripted));
        assert_eq!(BackendKind::parse("carrier-pigeon"), None);
    }

    #[test]
    fn create_backend_dispatches_correctly() {
        let config = BackendConfig {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key: "test".to_owned(),
            model: "test-model".to_owned(),
        };
        assert_eq!(create_backend(BackendKind::OpenAi, &config).name(), "openai-compatible");
        assert_eq!(create_backend(BackendKind::Anthropic, &config).name(), "anthropic");
        assert_eq!(create_backend(BackendKind::Scripted, &config).name(), "scripted");
    }

    #[tokio::test]
    async fn scripted_backend_synthesizes_usage() {
        let backend = ScriptedBackend::new("{\"ok\": true}", Duration::ZERO);
        let prompt = RenderedPrompt {
            system: "a".repeat(40),
            user: "b".repeat(40),
        };
        let completion = backend.complete(&request(&prompt)).await.unwrap();
        assert_eq!(completion.text, "{\"ok\": true}");
        assert_eq!(completion.usage.prompt, 20);
        assert_eq!(completion.usage.completion, 3);
        assert_eq!(backend.high_water_mark(), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        // Multi-byte character straddling the cut.
        let s = "ab\u{4ed9}";
        assert_eq!(truncate(s, 3), "ab");
    }
}
