//! Recency-biased context window over a multi-session conversation.
//!
//! Walks sessions newest to oldest and, within each session, turns newest to
//! oldest. Each turn is charged the token cost of its session header plus its
//! own line; the walk stops at the first turn that would not fit. The kept
//! turns are re-emitted in chronological order, one `DATE:` block per
//! session, oldest block first.
//!
//! Truncation is silent: a conversation longer than the budget simply loses
//! its oldest turns. The most recent turn is always kept, even when it alone
//! exceeds the budget; the check only blocks *additional* older turns.

use crate::context::tokens::TokenCounter;
use crate::dataset::Conversation;
use tracing::debug;

/// Tokens reserved for each answer in the model's output.
pub const ANSWER_TOKENS_PER_QUESTION: usize = 50;

/// Token budget for a context window.
///
/// The available budget is the model's context limit minus the output
/// reserve (`answer_tokens_per_question × batch_size`). Question and preamble
/// tokens are charged against it on every admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBudget {
    /// Model context length in tokens.
    pub model_limit: usize,
    /// Tokens reserved for generated answers.
    pub answer_reserve: usize,
    /// Tokens already committed to the preamble and question block.
    pub question_reserve: usize,
}

impl WindowBudget {
    pub fn new(model_limit: usize) -> Self {
        Self {
            model_limit,
            answer_reserve: 0,
            question_reserve: 0,
        }
    }

    /// Reserve `per_question × batch_size` tokens for output.
    pub fn with_answer_reserve(mut self, per_question: usize, batch_size: usize) -> Self {
        self.answer_reserve = per_question.saturating_mul(batch_size);
        self
    }

    /// Reserve tokens for the prompt text that surrounds the conversation.
    pub fn with_question_reserve(mut self, tokens: usize) -> Self {
        self.question_reserve = tokens;
        self
    }

    /// Context limit minus the output reserve.
    pub fn available(&self) -> usize {
        self.model_limit.saturating_sub(self.answer_reserve)
    }

    /// Whether a turn costing `turn_tokens` fits on top of `running` tokens.
    /// Landing exactly on the boundary is a rejection.
    pub fn admits(&self, running: usize, turn_tokens: usize) -> bool {
        running + turn_tokens + self.question_reserve < self.available()
    }
}

/// The rendered window plus bookkeeping about what was kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextWindow {
    /// Session blocks in chronological order.
    pub text: String,
    /// Number of turns kept.
    pub included_turns: usize,
    /// Indices of sessions with at least one kept turn, ascending.
    pub included_sessions: Vec<u32>,
    /// Session in which the walk stopped, if anything was dropped.
    pub truncated_at: Option<u32>,
    /// Sum of per-turn charges (an upper bound on the text's token count
    /// for subadditive counters).
    pub charged_tokens: usize,
}

/// Header that opens each session block.
pub fn session_header(date_time: &str) -> String {
    format!("\nDATE: {date_time}\nCONVERSATION:\n")
}

/// Build the largest recent suffix of `conversation` that fits `budget`.
pub fn build_window(
    conversation: &Conversation,
    budget: &WindowBudget,
    counter: &dyn TokenCounter,
) -> ContextWindow {
    let mut blocks: Vec<(u32, String)> = Vec::new();
    let mut running = 0usize;
    let mut included = 0usize;
    let mut truncated_at = None;

    for (&index, session) in conversation.sessions.iter().rev() {
        if session.turns.is_empty() {
            continue;
        }
        let header = session_header(&session.date_time);
        let mut lines: Vec<String> = Vec::new();

        for turn in session.turns.iter().rev() {
            let line = format!("{}\n", turn.render());
            let cost = counter.count_tokens(&format!("{header}{line}"));
            if included > 0 && !budget.admits(running, cost) {
                truncated_at = Some(index);
                break;
            }
            running += cost;
            included += 1;
            lines.push(line);
        }

        if !lines.is_empty() {
            lines.reverse();
            blocks.push((index, format!("{header}{}", lines.concat())));
        }
        if truncated_at.is_some() {
            break;
        }
    }

    blocks.reverse();
    let included_sessions: Vec<u32> = blocks.iter().map(|(i, _)| *i).collect();
    let text: String = blocks.into_iter().map(|(_, b)| b).collect();

    debug!(
        "context window: {} of {} turns, {} session(s), ~{} tokens{}",
        included,
        conversation.turn_count(),
        included_sessions.len(),
        running,
        truncated_at.map_or(String::new(), |s| format!(", truncated in session {s}")),
    );

    ContextWindow {
        text,
        included_turns: included,
        included_sessions,
        truncated_at,
        charged_tokens: running,
    }
}
