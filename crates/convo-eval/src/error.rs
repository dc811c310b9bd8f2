//! Error taxonomy for evaluation runs.
//!
//! Malformed answers inside an otherwise parseable batch never surface here:
//! they are absorbed by the fallback chain in [`crate::extract`]. What does
//! surface falls into three groups:
//!
//! - **Fatal configuration** ([`EvalError::Config`]): unknown model, unknown
//!   retrieval mode, incompatible options. Raised before any model call.
//! - **Transport** ([`EvalError::Api`], [`EvalError::Transport`]): classified
//!   by [`EvalError::is_transient`] for HTTP-level retry.
//! - **Unrecoverable output** ([`EvalError::ParseRetriesExhausted`],
//!   [`EvalError::Extraction`]): terminate the run. Batches flushed before
//!   the failure stay on disk for resumption.

use thiserror::Error;

/// Errors returned by evaluation operations.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Invalid or incompatible configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Input dataset does not have the expected shape.
    #[error("dataset error: {0}")]
    Dataset(String),
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error outside of answer extraction.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Non-success HTTP status from a model or embedding endpoint.
    #[error("API HTTP {status}: {body}")]
    Api { status: u16, body: String },
    /// Request never produced a response (connect, timeout, reset).
    #[error("request failed: {0}")]
    Transport(String),
    /// The endpoint answered but returned no text.
    #[error("empty model response")]
    EmptyResponse,
    /// Retrieval database is inconsistent with itself or with the query.
    #[error("retrieval error: {0}")]
    Retrieval(String),
    /// Every decode stage failed for a question.
    #[error("could not extract answer for question {ordinal}: {reason}")]
    Extraction { ordinal: usize, reason: String },
    /// The whole batch response stayed unparseable across all trials.
    #[error("batch response unparseable after {attempts} trial(s): {reason}")]
    ParseRetriesExhausted { attempts: u32, reason: String },
}

impl EvalError {
    /// Whether this error is worth re-sending the identical HTTP request for.
    ///
    /// Rate limits (429), server errors (5xx), transport failures, and empty
    /// bodies are transient. Client errors (400/401/403/404/422) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            EvalError::Api { status, .. } => *status == 429 || (500..=599).contains(status),
            EvalError::Transport(_) | EvalError::EmptyResponse => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(e: reqwest::Error) -> Self {
        EvalError::Transport(e.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, EvalError>;
