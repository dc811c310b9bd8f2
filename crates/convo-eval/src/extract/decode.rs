//! Staged per-question decoding.
//!
//! Stage 1 reads the quote-repaired parse by ordinal key. Stage 2 reads the
//! unrepaired parse by position. Stage 3 falls back to line-oriented text.
//! The first two stages report failure as [`Decoded::NeedsFallback`]; only
//! stage 3 can fail the question.

use super::normalize::{repair_quotes, strip_option_markers};
use crate::dataset::value_text;
use crate::error::{EvalError, Result};
use crate::prompt::ChoiceKey;
use serde_json::{Map, Value};

/// Outcome of one decode stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Answer(String),
    NeedsFallback(String),
}

/// A parsed batch response.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerMap {
    /// `{"0": ..., "1": ...}`
    Keyed(Map<String, Value>),
    /// `[..., ...]`
    Ordered(Vec<Value>),
}

impl AnswerMap {
    /// Parse `text` as an object or array of answers, cleaning every value.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        match serde_json::from_str::<Value>(text).map_err(|e| e.to_string())? {
            Value::Object(map) => Ok(AnswerMap::Keyed(
                map.into_iter().map(|(k, v)| (k, clean_value(v))).collect(),
            )),
            Value::Array(items) => Ok(AnswerMap::Ordered(
                items.into_iter().map(clean_value).collect(),
            )),
            other => Err(format!("expected an object or array, got {other}")),
        }
    }

    /// Parse after the single-quote repair.
    pub fn parse_repaired(text: &str) -> std::result::Result<Self, String> {
        Self::parse(&repair_quotes(text))
    }

    /// Value under the ordinal string key. Arrays have no keys.
    pub fn by_key(&self, ordinal: usize) -> Option<&Value> {
        match self {
            AnswerMap::Keyed(map) => map.get(&ordinal.to_string()),
            AnswerMap::Ordered(_) => None,
        }
    }

    /// Value at the ordinal position. Objects are read by key instead.
    pub fn by_position(&self, ordinal: usize) -> Option<&Value> {
        match self {
            AnswerMap::Keyed(_) => self.by_key(ordinal),
            AnswerMap::Ordered(items) => items.get(ordinal),
        }
    }
}

/// Null becomes an empty string; a nested `{"answer": ...}` object, or a
/// string holding one, is unwrapped. Anything that does not unwrap stays
/// as it was.
fn clean_value(value: Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::String(s) if s.starts_with('{') && s.ends_with('}') => {
            match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(mut inner)) if inner.contains_key("answer") => {
                    inner.remove("answer").unwrap_or(Value::String(s))
                }
                _ => Value::String(s),
            }
        }
        Value::Object(mut map) if map.contains_key("answer") => {
            map.remove("answer").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Flatten an answer value into text.
fn value_to_answer(value: &Value) -> String {
    match value {
        Value::Object(map) => map.values().map(value_text).collect::<Vec<_>>().join(", "),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        other => strip_option_markers(&value_text(other)),
    }
}

/// Decode one parsed value for one question.
fn decode_value(value: Option<&Value>, ordinal: usize, choice: Option<&ChoiceKey>) -> Decoded {
    let Some(value) = value else {
        return Decoded::NeedsFallback(format!("no answer for question {ordinal}"));
    };
    match (choice, value) {
        (Some(key), Value::String(s)) => Decoded::Answer(key.decode(s)),
        (Some(_), other) => {
            Decoded::NeedsFallback(format!("expected a letter choice, got {other}"))
        }
        (None, value) => Decoded::Answer(value_to_answer(value)),
    }
}

/// Stage 1: repaired parse, keyed lookup.
pub fn decode_keyed(text: &str, ordinal: usize, choice: Option<&ChoiceKey>) -> Decoded {
    match AnswerMap::parse_repaired(text) {
        Ok(map) => decode_value(map.by_key(ordinal), ordinal, choice),
        Err(e) => Decoded::NeedsFallback(e),
    }
}

/// Stage 2: plain parse, positional lookup.
pub fn decode_positional(text: &str, ordinal: usize, choice: Option<&ChoiceKey>) -> Decoded {
    match AnswerMap::parse(text) {
        Ok(map) => decode_value(map.by_position(ordinal), ordinal, choice),
        Err(e) => Decoded::NeedsFallback(e),
    }
}

/// Stage 3: forced-choice questions read the whole text as a letter choice;
/// others take their line of the text and parse it on its own.
pub fn decode_line(text: &str, ordinal: usize, choice: Option<&ChoiceKey>) -> Result<String> {
    if let Some(key) = choice {
        return Ok(key.decode(text));
    }
    let fail = |reason: String| EvalError::Extraction { ordinal, reason };

    let stripped = strip_option_markers(text);
    let line = stripped
        .split('\n')
        .nth(ordinal)
        .ok_or_else(|| fail(format!("response has no line {ordinal}")))?;
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| fail(format!("line {ordinal}: {e}")))?;
    match value {
        Value::Array(items) => items
            .first()
            .map(value_to_answer)
            .ok_or_else(|| fail(format!("line {ordinal} is an empty list"))),
        other => Ok(value_to_answer(&clean_value(other))),
    }
}

/// Run the stages in order for the question at `ordinal`.
pub fn decode_question(text: &str, ordinal: usize, choice: Option<&ChoiceKey>) -> Result<String> {
    let first = match decode_keyed(text, ordinal, choice) {
        Decoded::Answer(a) => return Ok(a),
        Decoded::NeedsFallback(reason) => reason,
    };
    match decode_positional(text, ordinal, choice) {
        Decoded::Answer(a) => Ok(a),
        Decoded::NeedsFallback(second) => {
            tracing::debug!(
                "question {ordinal}: keyed decode failed ({first}), positional failed ({second})"
            );
            decode_line(text, ordinal, choice)
        }
    }
}
