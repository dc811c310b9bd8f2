//! Dataset types: samples, conversations, sessions, turns, and QA records.
//!
//! The on-disk shape is a JSON array of samples:
//!
//! ```text
//! [{ "sample_id": "conv-26",
//!    "conversation": { "speaker_a": "...", "session_1": [turn, ...],
//!                      "session_1_date_time": "1:56 pm on 8 May, 2023", ... },
//!    "qa": [{ "question": "...", "answer": "...", "category": 2 }, ...] }]
//! ```
//!
//! Session keys are flattened into the conversation object, so
//! [`Conversation`] has hand-written serde impls that fold them into an
//! ordered map. Fields this crate does not model (image URLs, summaries,
//! evidence lists) are kept in `extra` maps and written back unchanged.

use crate::error::{EvalError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

// ── Turn ───────────────────────────────────────────────────────────

/// One utterance by one speaker within a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
    /// Description of an image the speaker shared alongside the text.
    #[serde(
        rename = "blip_caption",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_caption: Option<String>,
    /// Source identifier used for retrieval attribution (e.g. `"D1:3"`).
    #[serde(rename = "dia_id", default, skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Turn {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            image_caption: None,
            fragment_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.image_caption = Some(caption.into());
        self
    }

    pub fn with_fragment_id(mut self, id: impl Into<String>) -> Self {
        self.fragment_id = Some(id.into());
        self
    }

    /// Render as `{speaker} said, "{text}"`, plus ` and shared {caption}.`
    /// when an image caption is attached.
    pub fn render(&self) -> String {
        let mut out = format!("{} said, \"{}\"", self.speaker, self.text);
        if let Some(caption) = &self.image_caption {
            out.push_str(&format!(" and shared {caption}."));
        }
        out
    }
}

// ── Session / Conversation ─────────────────────────────────────────

/// A dated, ordered group of turns.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    /// Free-text date label, used verbatim in prompts.
    pub date_time: String,
    pub turns: Vec<Turn>,
}

/// Session index → session, ordered by index. Gaps are allowed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conversation {
    pub sessions: BTreeMap<u32, Session>,
    /// Non-session keys (`speaker_a`, `speaker_b`, ...).
    pub extra: Map<String, Value>,
}

const SESSION_PREFIX: &str = "session_";
const DATE_SUFFIX: &str = "_date_time";

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session at `index`, replacing any previous one.
    pub fn with_session(mut self, index: u32, date_time: impl Into<String>, turns: Vec<Turn>) -> Self {
        self.sessions.insert(
            index,
            Session {
                date_time: date_time.into(),
                turns,
            },
        );
        self
    }

    /// Total number of turns across all sessions.
    pub fn turn_count(&self) -> usize {
        self.sessions.values().map(|s| s.turns.len()).sum()
    }

    /// The two participant names for the conversation preamble.
    ///
    /// Taken from the earliest session in order of first appearance. Falls
    /// back to the `speaker_a` / `speaker_b` fields when the earliest session
    /// has fewer than two distinct speakers.
    pub fn speakers(&self) -> (String, String) {
        let mut names: Vec<&str> = Vec::new();
        if let Some(first) = self.sessions.values().next() {
            for turn in &first.turns {
                if !names.contains(&turn.speaker.as_str()) {
                    names.push(&turn.speaker);
                }
            }
        }
        let fallback = |key: &str, default: &str| {
            self.extra
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        match names.as_slice() {
            [a, b, ..] => ((*a).to_string(), (*b).to_string()),
            [a] => ((*a).to_string(), fallback("speaker_b", "Speaker B")),
            [] => (
                fallback("speaker_a", "Speaker A"),
                fallback("speaker_b", "Speaker B"),
            ),
        }
    }
}

fn parse_session_key(key: &str) -> Option<(u32, bool)> {
    let rest = key.strip_prefix(SESSION_PREFIX)?;
    match rest.strip_suffix(DATE_SUFFIX) {
        Some(num) => num.parse().ok().map(|n| (n, true)),
        None => rest.parse().ok().map(|n| (n, false)),
    }
}

impl<'de> Deserialize<'de> for Conversation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;

        let mut turns: BTreeMap<u32, Vec<Turn>> = BTreeMap::new();
        let mut dates: BTreeMap<u32, (String, Value)> = BTreeMap::new();
        let mut extra = Map::new();

        for (key, value) in raw {
            match parse_session_key(&key) {
                Some((n, false)) => {
                    let parsed: Vec<Turn> = serde_json::from_value(value)
                        .map_err(|e| D::Error::custom(format!("{key}: {e}")))?;
                    turns.insert(n, parsed);
                }
                Some((n, true)) => {
                    dates.insert(n, (key, value));
                }
                None => {
                    extra.insert(key, value);
                }
            }
        }

        let mut sessions = BTreeMap::new();
        for (n, session_turns) in turns {
            let date_time = match dates.remove(&n) {
                Some((_, Value::String(s))) => s,
                Some((key, other)) => {
                    return Err(D::Error::custom(format!(
                        "{key}: expected a string, got {other}"
                    )));
                }
                None => {
                    return Err(D::Error::custom(format!(
                        "session_{n} has no session_{n}_date_time"
                    )));
                }
            };
            sessions.insert(
                n,
                Session {
                    date_time,
                    turns: session_turns,
                },
            );
        }
        // Dates without turns are kept verbatim.
        for (_, (key, value)) in dates {
            extra.insert(key, value);
        }

        Ok(Conversation { sessions, extra })
    }
}

impl Serialize for Conversation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut out = self.extra.clone();
        for (n, session) in &self.sessions {
            let turns = serde_json::to_value(&session.turns).map_err(serde::ser::Error::custom)?;
            out.insert(format!("{SESSION_PREFIX}{n}"), turns);
            out.insert(
                format!("{SESSION_PREFIX}{n}{DATE_SUFFIX}"),
                Value::String(session.date_time.clone()),
            );
        }
        out.serialize(serializer)
    }
}

// ── Questions ──────────────────────────────────────────────────────

/// Reasoning-type tag of a question. Determines prompt rewriting and
/// answer decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Category {
    MultiHop,
    /// Answer needs date reasoning; a date hint is appended to the question.
    Temporal,
    OpenDomain,
    SingleHop,
    /// Rewritten into a two-option forced-choice question.
    Adversarial,
}

impl TryFrom<u8> for Category {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Category::MultiHop),
            2 => Ok(Category::Temporal),
            3 => Ok(Category::OpenDomain),
            4 => Ok(Category::SingleHop),
            5 => Ok(Category::Adversarial),
            other => Err(format!("unknown question category {other}")),
        }
    }
}

impl From<Category> for u8 {
    fn from(c: Category) -> u8 {
        match c {
            Category::MultiHop => 1,
            Category::Temporal => 2,
            Category::OpenDomain => 3,
            Category::SingleHop => 4,
            Category::Adversarial => 5,
        }
    }
}

/// A question plus any predictions recorded against it.
///
/// Predictions live in `extra` under their prediction key so that several
/// models' answers can coexist on one record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QaRecord {
    pub question: String,
    pub category: Category,
    /// Gold answer. Occasionally numeric in the source data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adversarial_answer: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Render a JSON scalar as plain text (strings without quotes).
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl QaRecord {
    pub fn new(question: impl Into<String>, category: Category) -> Self {
        Self {
            question: question.into(),
            category,
            answer: None,
            adversarial_answer: None,
            extra: Map::new(),
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(Value::String(answer.into()));
        self
    }

    pub fn with_adversarial_answer(mut self, answer: impl Into<String>) -> Self {
        self.adversarial_answer = Some(Value::String(answer.into()));
        self
    }

    /// The non-sentinel option for a forced-choice rewrite: the gold answer,
    /// or the adversarial answer when gold is absent.
    pub fn target_answer(&self) -> Option<String> {
        self.answer
            .as_ref()
            .filter(|v| !v.is_null())
            .or(self.adversarial_answer.as_ref().filter(|v| !v.is_null()))
            .map(value_text)
    }

    pub fn has_prediction(&self, key: &str) -> bool {
        self.extra.contains_key(key)
    }

    pub fn prediction(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn set_prediction(&mut self, key: &str, answer: impl Into<String>) {
        self.extra
            .insert(key.to_string(), Value::String(answer.into()));
    }

    /// Record which source fragments were shown to the model.
    pub fn set_context_ids(&mut self, key: &str, ids: &[String]) {
        let ids = ids.iter().cloned().map(Value::String).collect();
        self.extra
            .insert(format!("{key}_context"), Value::Array(ids));
    }
}

// ── Sample ─────────────────────────────────────────────────────────

/// One conversation and the questions asked about it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Sample {
    pub sample_id: String,
    pub conversation: Conversation,
    pub qa: Vec<QaRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Load a JSON array of samples from disk.
pub fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| EvalError::Dataset(format!("{}: {e}", path.display())))
}
