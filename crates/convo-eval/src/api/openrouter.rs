//! OpenRouter chat completions client and the [`ModelAdapter`] built on it.

use super::retry::{RetryConfig, retry_call, status_error};
use crate::context::{CharRatioCounter, TokenCounter};
use crate::error::{EvalError, Result};
use crate::model::{GenerateFuture, Generation, GenerationRequest, Message, ModelAdapter, TokenUsage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Provider quantization requested for 4-bit runs.
pub const INT4_QUANTIZATION: &str = "int4";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderPreferences>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Provider routing preferences.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct ProviderPreferences {
    /// Only route to deployments at these precisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantizations: Option<Vec<String>>,
}

impl ChatRequest {
    /// Translate a generation request for `model`.
    pub fn from_generation(model: &str, request: GenerationRequest) -> Self {
        let provider = request.quantized.then(|| ProviderPreferences {
            quantizations: Some(vec![INT4_QUANTIZATION.to_string()]),
        });
        Self {
            model: model.to_string(),
            messages: request.messages,
            max_tokens: request.max_output_tokens,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            top_k: request.sampling.top_k,
            provider,
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl From<UsageInfo> for TokenUsage {
    fn from(u: UsageInfo) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
        }
    }
}

/// Clean return type from [`OpenRouterClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_headers(api_key, "https://github.com/convo-eval", "convo-eval")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("convo-eval/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EvalError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at a different OpenAI-compatible chat completions
    /// endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(status_error(status, text));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)?;

        // Some providers report upstream failures inside a 200 body.
        if let Some(err) = parsed.error {
            return Err(EvalError::Api {
                status: err.code.unwrap_or(502),
                body: err.message,
            });
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content);
        debug!("LLM output: {} chars", content.as_ref().map_or(0, |s| s.len()));

        Ok(ChatCompletion {
            content,
            usage: parsed.usage,
        })
    }
}

// ── Adapter ────────────────────────────────────────────────────────

/// [`ModelAdapter`] over OpenRouter.
///
/// Token counts are estimated from characters; no tokenizer is downloaded.
pub struct OpenRouterAdapter {
    client: OpenRouterClient,
    model: String,
    retry: RetryConfig,
    counter: CharRatioCounter,
}

impl OpenRouterAdapter {
    pub fn new(client: OpenRouterClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            retry: RetryConfig::default(),
            counter: CharRatioCounter::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

}

impl TokenCounter for OpenRouterAdapter {
    fn count_tokens(&self, text: &str) -> usize {
        self.counter.count_tokens(text)
    }
}

impl ModelAdapter for OpenRouterAdapter {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: GenerationRequest) -> GenerateFuture<'_> {
        let body = ChatRequest::from_generation(&self.model, request);
        Box::pin(async move {
            let (client, body) = (&self.client, &body);
            let completion = retry_call(&self.retry, "chat", || async move {
                let completion = client.chat(body).await?;
                match completion.content.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => Ok(completion),
                    _ => Err(EvalError::EmptyResponse),
                }
            })
            .await?;
            Ok(Generation {
                text: completion.content.unwrap_or_default(),
                usage: completion.usage.map(TokenUsage::from),
            })
        })
    }
}
