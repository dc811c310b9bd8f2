//! HTTP backends for the model capabilities.
//!
//! - [`openrouter`]: chat completions client and [`OpenRouterAdapter`].
//! - [`embeddings`]: OpenAI-compatible embeddings client for retrieval.
//! - [`retry`]: exponential backoff over [`EvalError::is_transient`](crate::EvalError::is_transient).

pub mod embeddings;
pub mod openrouter;
pub mod retry;

pub use embeddings::EmbeddingClient;
pub use openrouter::{ChatRequest, OpenRouterAdapter, OpenRouterClient, ProviderPreferences};
pub use retry::RetryConfig;
