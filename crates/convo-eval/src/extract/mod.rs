//! Answer extraction from free-text model output.
//!
//! Batch responses are supposed to be a JSON object keyed by question ordinal
//! but frequently are not. Every response is normalized first (code fences,
//! escaped quotes), then each question is decoded through the staged chain in
//! [`decode`] so one malformed answer does not void the rest of the batch.
//!
//! The call site re-queries the model only when [`check_parseable`] fails,
//! i.e. when no structured reading of the whole response exists.

pub mod decode;
pub mod normalize;

pub use decode::{AnswerMap, Decoded, decode_question};
pub use normalize::normalize;

use crate::error::Result;
use crate::prompt::{ChoiceKey, PreparedBatch};
use normalize::{strip_answer_label, strip_option_markers};
use std::collections::BTreeMap;

/// Whether the normalized response parses as an answer object or list,
/// with or without the quote repair. Returns the parse error otherwise.
pub fn check_parseable(raw: &str) -> std::result::Result<(), String> {
    let text = normalize(raw);
    match AnswerMap::parse_repaired(&text) {
        Ok(_) => Ok(()),
        Err(repaired) => AnswerMap::parse(&text)
            .map(|_| ())
            .map_err(|plain| format!("{repaired}; unrepaired: {plain}")),
    }
}

/// Decode every question of `batch` from one response.
///
/// Returns QA index → answer.
pub fn extract_batch(raw: &str, batch: &PreparedBatch) -> Result<BTreeMap<usize, String>> {
    let text = normalize(raw);
    batch
        .questions
        .iter()
        .enumerate()
        .map(|(ordinal, q)| {
            decode_question(&text, ordinal, q.choice.as_ref()).map(|a| (q.qa_index, a))
        })
        .collect()
}

/// Decode a single-question response.
///
/// Takes the first non-blank line and drops an `answer:` label. Forced-choice
/// questions then go through the letter heuristic; others lose their option
/// markers.
pub fn extract_single(raw: &str, choice: Option<&ChoiceKey>) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let line = strip_answer_label(line);
    match choice {
        Some(key) => key.decode(line),
        None => strip_option_markers(line),
    }
}
