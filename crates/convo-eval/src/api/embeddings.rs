//! OpenAI-compatible embeddings client.
//!
//! Sends `{model, input}` to an `/embeddings` endpoint and L2-normalizes the
//! returned vectors so retrieval can score with a plain dot product.

use super::retry::{RetryConfig, retry_call, status_error};
use crate::error::{EvalError, Result};
use crate::model::{EmbedFuture, EmbedRole, Embedder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const EMBEDDINGS_URL: &str = "https://openrouter.ai/api/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";

/// Inputs per request.
const MAX_BATCH: usize = 128;

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Embeddings over HTTP.
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    query_prefix: String,
    context_prefix: String,
    retry: RetryConfig,
}

impl EmbeddingClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("convo-eval/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EvalError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: EMBEDDINGS_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            query_prefix: String::new(),
            context_prefix: String::new(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Text prepended per role, for retrievers trained with instruction
    /// prefixes (e.g. `"query: "` / `"passage: "`).
    pub fn with_prefixes(mut self, query: impl Into<String>, context: impl Into<String>) -> Self {
        self.query_prefix = query.into();
        self.context_prefix = context.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn prefix(&self, role: EmbedRole) -> &str {
        match role {
            EmbedRole::Query => &self.query_prefix,
            EmbedRole::Context => &self.context_prefix,
        }
    }

    async fn embed_chunk(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };
        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status, text));
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&text)?;
        if parsed.data.len() != expected {
            return Err(EvalError::Retrieval(format!(
                "embedding endpoint returned {} vectors for {expected} inputs",
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(parsed
            .data
            .into_iter()
            .map(|d| normalize(d.embedding))
            .collect())
    }
}

/// Scale to unit length. Zero vectors are returned unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

impl Embedder for EmbeddingClient {
    fn embed<'a>(&'a self, texts: &'a [String], role: EmbedRole) -> EmbedFuture<'a> {
        Box::pin(async move {
            let prefix = self.prefix(role);
            let mut out = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(MAX_BATCH) {
                let input: Vec<String> = chunk.iter().map(|t| format!("{prefix}{t}")).collect();
                let vectors = retry_call(&self.retry, "embeddings", || {
                    self.embed_chunk(input.clone())
                })
                .await?;
                out.extend(vectors);
            }
            debug!("Embedded {} text(s) as {:?} with {}", out.len(), role, self.model);
            Ok(out)
        })
    }
}
