//! Model capabilities and per-family profiles.
//!
//! The pipeline talks to models through two traits:
//!
//! - [`ModelAdapter`]: text generation plus the model's own token counting.
//! - [`Embedder`]: vectors for retrieval, with a role distinguishing stored
//!   fragments from questions.
//!
//! Both use boxed futures so they stay dyn-compatible; the driver holds
//! `&dyn ModelAdapter` and never knows which transport sits behind it.
//! Family-specific behavior (templates, sampling, limits, pacing) lives in
//! [`ModelProfile`], chosen once at configuration time.

pub mod profile;

pub use profile::{ModelFamily, ModelProfile};

use crate::context::TokenCounter;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`ModelAdapter::generate`].
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<Generation>> + Send + 'a>>;

/// Boxed future returned by [`Embedder::embed`].
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>>;

// ── Messages ───────────────────────────────────────────────────────

/// Role of a chat message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Generation ─────────────────────────────────────────────────────

/// Sampling parameters. `None` leaves the provider default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
}

impl Sampling {
    /// Temperature 0, no truncation.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_k: None,
            top_p: None,
        }
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub max_output_tokens: u32,
    pub sampling: Sampling,
    /// Prefer a 4-bit quantized deployment.
    pub quantized: bool,
}

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A text-generation backend.
///
/// Implementors must count tokens the way the model does; the context window
/// is sized with [`TokenCounter::count_tokens`].
pub trait ModelAdapter: TokenCounter {
    /// Identifier for logs.
    fn name(&self) -> &str;

    /// Generate a completion.
    fn generate(&self, request: GenerationRequest) -> GenerateFuture<'_>;
}

// ── Embeddings ─────────────────────────────────────────────────────

/// What a text is being embedded as. Asymmetric retrievers encode queries
/// and passages differently.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedRole {
    Context,
    Query,
}

/// A text-embedding backend. Returned vectors are unit-normalized.
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, texts: &'a [String], role: EmbedRole) -> EmbedFuture<'a>;
}
