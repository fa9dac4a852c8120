//! Alert composition via an external text-generation service.
//!
//! The composer turns the recent temperature history into a short,
//! non-technical warning. The prompt is a pure function of the history
//! snapshot, so identical histories always produce identical requests; only
//! the service's completion varies.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use thermwatch_core::AlertMessage;

/// Default chat-completions API base.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default completion model.
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Completion length cap; an alert is one or two sentences.
const MAX_COMPLETION_TOKENS: u32 = 60;

/// End-to-end timeout for a single composition request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure to produce alert text. The monitor loop logs these and skips
/// dispatch for the tick; they never terminate the daemon.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    /// The HTTP request failed or the response body could not be decoded.
    #[error("Text generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Text generation service returned HTTP {0}")]
    Api(u16),

    /// The service answered successfully but with no usable text.
    #[error("Text generation service returned an empty completion")]
    EmptyCompletion,
}

// ---------------------------------------------------------------------------
// Composer seam
// ---------------------------------------------------------------------------

/// Capability seam for alert-text generation. The monitor loop depends on
/// this trait so tests can substitute a canned composer.
#[async_trait]
pub trait AlertComposer: Send + Sync {
    /// Compose an alert for the given history snapshot, oldest sample first.
    async fn compose(&self, history: &[f64]) -> Result<AlertMessage, CompositionError>;
}

/// Render the prompt for a history snapshot.
///
/// Samples are formatted with one decimal place so the prompt is stable for
/// a given history regardless of float noise in the formatting path.
fn render_prompt(history: &[f64]) -> String {
    let values = history
        .iter()
        .map(|t| format!("{t:.1}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Temperature history (°C): [{values}]. \
         Write a concise, non-technical alert warning that the equipment is overheating."
    )
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the completion text out of a decoded response.
fn completion_text(response: ChatResponse) -> Result<String, CompositionError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(CompositionError::EmptyCompletion);
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible composer
// ---------------------------------------------------------------------------

/// Composer backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiComposer {
    http_client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiComposer {
    /// Build a composer against the default endpoint and model.
    pub fn new(api_key: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");

        Self {
            http_client,
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Point at a different OpenAI-compatible API base.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Use a different completion model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn request_completion(&self, prompt: &str) -> Result<String, CompositionError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompositionError::Api(status.as_u16()));
        }

        completion_text(response.json::<ChatResponse>().await?)
    }
}

#[async_trait]
impl AlertComposer for OpenAiComposer {
    async fn compose(&self, history: &[f64]) -> Result<AlertMessage, CompositionError> {
        let prompt = render_prompt(history);
        let text = self.request_completion(&prompt).await?;
        tracing::debug!(model = %self.model, chars = text.len(), "Composed overheat alert");
        Ok(AlertMessage::now(text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
