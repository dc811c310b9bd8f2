//! Question formatting: category rewrites, forced-choice option tables, and
//! the fixed prompt templates.

pub mod batch;
pub mod templates;

pub use batch::{
    ChoiceKey, CoinFlip, PreparedBatch, PreparedQuestion, prepare_batch, rewrite_question,
};
pub use templates::{
    CHAT_SYSTEM_MESSAGE, NO_INFORMATION, QuestionStyle, TEMPORAL_HINT, conversation_preamble,
};
