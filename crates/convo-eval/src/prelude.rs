//! Convenience re-exports for common `convo-eval` types.
//!
//! ```ignore
//! use convo_eval::prelude::*;
//! ```
//!
//! Covers configuring and running an evaluation. Pipeline internals (decode
//! stages, window budgets, database rows) are left in their modules.

// ── Run setup ───────────────────────────────────────────────────────
pub use crate::config::{EvalConfig, api_key_from_env, embeddings_key_from_env};
pub use crate::dataset::{Category, QaRecord, Sample, load_samples};
pub use crate::driver::{Evaluator, RunReport};
pub use crate::error::{EvalError, Result};
pub use crate::store::PredictionStore;

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{EvalEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler};

// ── Models ──────────────────────────────────────────────────────────
pub use crate::api::{EmbeddingClient, OpenRouterAdapter, OpenRouterClient, RetryConfig};
pub use crate::context::{LexicalIndex, RetrievalMode, Retriever, TokenCounter};
pub use crate::model::{Embedder, ModelAdapter, ModelProfile};
pub use crate::prompt::CoinFlip;
