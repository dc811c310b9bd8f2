//! Batch question formatting.
//!
//! A batch is a contiguous slice of a sample's QA records. Records that
//! already hold a prediction under the active key are skipped unless
//! overwriting; the rest are rewritten by category and numbered by their
//! position among the included questions. That position is the ordinal the
//! model answers under and the index of the forced-choice key table.

use super::templates::{NO_INFORMATION, TEMPORAL_HINT, batch_questions, forced_choice_suffix};
use crate::dataset::{Category, QaRecord};
use crate::error::{EvalError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

// ── Coin flip ──────────────────────────────────────────────────────

/// Source of the fair coin that orders forced-choice options.
///
/// `true` puts the "no information" option in slot (a).
pub struct CoinFlip(Box<dyn FnMut() -> bool + Send>);

impl CoinFlip {
    /// Thread-local RNG. Non-reproducible.
    pub fn random() -> Self {
        Self(Box::new(|| rand::thread_rng().gen_bool(0.5)))
    }

    /// Deterministic sequence from `seed`.
    pub fn seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self(Box::new(move || rng.gen_bool(0.5)))
    }

    /// Always lands the same way.
    pub fn fixed(sentinel_first: bool) -> Self {
        Self(Box::new(move || sentinel_first))
    }

    /// Arbitrary source, e.g. a scripted sequence in tests.
    pub fn from_fn(f: impl FnMut() -> bool + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn flip(&mut self) -> bool {
        (self.0)()
    }
}

impl fmt::Debug for CoinFlip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CoinFlip")
    }
}

// ── Choice key ─────────────────────────────────────────────────────

/// Option-letter table for one forced-choice question. One side is always
/// [`NO_INFORMATION`], the other the target answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceKey {
    pub a: String,
    pub b: String,
}

impl ChoiceKey {
    /// Build the table for `target`, with the sentinel in (a) when
    /// `sentinel_first`.
    pub fn new(target: impl Into<String>, sentinel_first: bool) -> Self {
        let target = target.into();
        if sentinel_first {
            Self {
                a: NO_INFORMATION.to_string(),
                b: target,
            }
        } else {
            Self {
                a: target,
                b: NO_INFORMATION.to_string(),
            }
        }
    }

    /// Decode a model's letter choice into option text.
    ///
    /// A prediction equal to one of the option texts (ignoring case) returns
    /// that option. Otherwise short predictions (one or three characters,
    /// e.g. `a` or `(b)`) are matched by whether they contain an `a`.
    /// Anything longer is taken to be a written-out answer and returned
    /// trimmed but otherwise verbatim.
    pub fn decode(&self, prediction: &str) -> String {
        let trimmed = prediction.trim();
        let lowered = trimmed.to_lowercase();
        if let Some(option) = [&self.a, &self.b]
            .into_iter()
            .find(|option| option.trim().to_lowercase() == lowered)
        {
            return option.clone();
        }
        match lowered.chars().count() {
            1 | 3 => {
                if lowered.contains('a') {
                    self.a.clone()
                } else {
                    self.b.clone()
                }
            }
            _ => trimmed.to_string(),
        }
    }
}

// ── Prepared batch ─────────────────────────────────────────────────

/// One question ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuestion {
    /// Index of the record within the sample's QA list.
    pub qa_index: usize,
    pub category: Category,
    /// Rewritten question text.
    pub text: String,
    /// Present for forced-choice questions.
    pub choice: Option<ChoiceKey>,
}

/// A formatted batch: included questions in ordinal order plus the records
/// skipped because they were already answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBatch {
    pub questions: Vec<PreparedQuestion>,
    pub skipped: Vec<usize>,
}

impl PreparedBatch {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Forced-choice key for the question at `ordinal`, if any.
    pub fn choice_at(&self, ordinal: usize) -> Option<&ChoiceKey> {
        self.questions.get(ordinal).and_then(|q| q.choice.as_ref())
    }

    /// The numbered multi-question block.
    pub fn render(&self) -> String {
        let texts: Vec<&str> = self.questions.iter().map(|q| q.text.as_str()).collect();
        batch_questions(&texts)
    }
}

/// Rewrite one question according to its category.
pub fn rewrite_question(
    qa: &QaRecord,
    qa_index: usize,
    coin: &mut CoinFlip,
) -> Result<PreparedQuestion> {
    let (text, choice) = match qa.category {
        Category::Temporal => (format!("{}{TEMPORAL_HINT}", qa.question), None),
        Category::Adversarial => {
            let target = qa.target_answer().ok_or_else(|| {
                EvalError::Dataset(format!(
                    "forced-choice question {qa_index} has neither answer nor adversarial_answer"
                ))
            })?;
            let key = ChoiceKey::new(target, coin.flip());
            (
                format!("{}{}", qa.question, forced_choice_suffix(&key.a, &key.b)),
                Some(key),
            )
        }
        _ => (qa.question.clone(), None),
    };
    Ok(PreparedQuestion {
        qa_index,
        category: qa.category,
        text,
        choice,
    })
}

/// Format `records[start..start + len]` for one model call.
///
/// `prediction_key` identifies the active model's answers; records holding
/// one are skipped unless `overwrite`.
pub fn prepare_batch(
    records: &[QaRecord],
    start: usize,
    len: usize,
    prediction_key: &str,
    overwrite: bool,
    coin: &mut CoinFlip,
) -> Result<PreparedBatch> {
    let end = start.saturating_add(len).min(records.len());
    let mut batch = PreparedBatch::default();
    for (qa_index, qa) in records.iter().enumerate().take(end).skip(start) {
        if !overwrite && qa.has_prediction(prediction_key) {
            batch.skipped.push(qa_index);
            continue;
        }
        batch.questions.push(rewrite_question(qa, qa_index, coin)?);
    }
    Ok(batch)
}
