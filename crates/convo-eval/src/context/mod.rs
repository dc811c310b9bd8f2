//! Context assembly: what conversation history the model gets to see.
//!
//! Two interchangeable sources feed the prompt:
//!
//! 1. **[`window`]**: [`build_window`] walks the conversation backward from
//!    the most recent turn and keeps the longest suffix that fits the token
//!    budget left after reserving room for questions and answers.
//!
//! 2. **[`retrieval`]**: [`select`](retrieval::select) ranks precomputed
//!    fragment embeddings against a question vector and substitutes the
//!    top-K fragments for the windowed conversation. The [`lexical`]
//!    retriever does the same with BM25 over the conversation's own turns.
//!
//! Both measure text through the [`TokenCounter`] capability in [`tokens`].

pub mod lexical;
pub mod retrieval;
pub mod tokens;
pub mod window;

pub use lexical::LexicalIndex;
pub use retrieval::{
    ContextDatabase, ContextId, RetrievalMode, RetrievedContext, Retriever, select,
};
pub use tokens::{CharRatioCounter, DEFAULT_CHARS_PER_TOKEN, TokenCounter};
pub use window::{ANSWER_TOKENS_PER_QUESTION, ContextWindow, WindowBudget, build_window};
