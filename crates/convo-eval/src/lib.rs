//! Evaluate language models on long-horizon conversational question answering.
//!
//! Given multi-session dialogues and questions about them, `convo-eval` asks a
//! model to answer every question and writes the answers back into the
//! dataset under a per-model prediction key. Two pieces do the heavy lifting:
//!
//! - **Context budgeting.** [`build_window`](context::build_window) keeps the
//!   most recent turns that fit the model's context limit after reserving room
//!   for questions and answers, and emits them in chronological order. In
//!   retrieval mode, [`select`](context::select) substitutes the top-K
//!   fragments of a precomputed embedding database, or a
//!   [`LexicalIndex`](context::LexicalIndex) the top-K turns by BM25.
//! - **Answer extraction.** Batched questions are supposed to come back as a
//!   JSON object keyed by ordinal, but often do not. [`extract`] normalizes
//!   the response and decodes each answer through a staged fallback chain so
//!   one malformed element never voids the batch.
//!
//! The [`Evaluator`](driver::Evaluator) ties these together, persisting after
//! every batch so interrupted runs resume where they stopped.
//!
//! ```ignore
//! use convo_eval::prelude::*;
//!
//! let config = EvalConfig::new("gpt-3.5-turbo-16k", "data/locomo10.json", "out/qa.json")
//!     .with_batch_size(20);
//! let client = OpenRouterClient::new(api_key_from_env()?)?;
//! let adapter = OpenRouterAdapter::new(client, config.profile()?.api_model);
//!
//! let samples = load_samples(&config.data_file)?;
//! let mut store = PredictionStore::open(&config.out_file, &samples)?;
//! let report = Evaluator::new(&config, &adapter)?
//!     .with_event_handler(&LoggingHandler)
//!     .run(&samples, &mut store)
//!     .await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dataset`] | Samples, sessions, turns, QA records |
//! | [`context`] | Token counting, context window, retrieval selection |
//! | [`prompt`] | Question rewriting, forced-choice keys, templates |
//! | [`extract`] | Normalization, quote repair, staged answer decoding |
//! | [`model`] | [`ModelAdapter`](model::ModelAdapter) / [`Embedder`](model::Embedder) capabilities, per-family [`ModelProfile`](model::ModelProfile) |
//! | [`api`] | OpenRouter chat and embeddings clients with retry |
//! | [`store`] | Prediction output file with resume and atomic flush |
//! | [`driver`] | The evaluation loop |

pub mod api;
pub mod config;
pub mod context;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod events;
pub mod extract;
pub mod model;
pub mod prelude;
pub mod prompt;
pub mod store;

pub use error::{EvalError, Result};
