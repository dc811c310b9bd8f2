//! Progress events emitted by the [`Evaluator`](crate::driver::Evaluator).
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or silent runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures, e.g. collecting events in tests |

use crate::driver::RunReport;
use crate::model::TokenUsage;
use std::path::Path;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during an evaluation run.
#[derive(Debug)]
pub enum EvalEvent<'a> {
    /// Starting a sample.
    SampleStart {
        sample_id: &'a str,
        index: usize,
        total: usize,
        questions: usize,
    },
    /// A record already has a prediction under the active key.
    QuestionSkipped {
        sample_id: &'a str,
        qa_index: usize,
        question: &'a str,
    },
    /// Context assembled for a batch.
    ContextBuilt {
        sample_id: &'a str,
        /// Turns (window mode) or fragments (retrieval mode) included.
        units: usize,
        tokens: usize,
        truncated: bool,
    },
    /// About to call the model for questions `first..first + size`.
    BatchStart {
        sample_id: &'a str,
        first: usize,
        size: usize,
    },
    /// A batch response was not parseable; the batch is re-sent unless
    /// `attempt == max_trials`.
    ParseTrialFailed {
        attempt: u32,
        max_trials: u32,
        reason: &'a str,
    },
    /// Predictions written for a batch.
    BatchAnswered {
        sample_id: &'a str,
        answered: usize,
        usage: Option<TokenUsage>,
    },
    /// Output file rewritten.
    Flushed { path: &'a Path },
    /// Finished a sample.
    SampleComplete {
        sample_id: &'a str,
        answered: usize,
        skipped: usize,
    },
    /// Finished the run.
    RunComplete { report: &'a RunReport },
}

// ── Handlers ───────────────────────────────────────────────────────

/// Observer for [`EvalEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EvalEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&EvalEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&EvalEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&EvalEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &EvalEvent<'_>) {
        (self.0)(event)
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &EvalEvent<'_>) {
        match event {
            EvalEvent::SampleStart {
                sample_id,
                index,
                total,
                questions,
            } => {
                info!("[sample {}/{}] {sample_id}: {questions} question(s)", index + 1, total);
            }
            EvalEvent::QuestionSkipped { qa_index, question, .. } => {
                info!("Skipping answered question {qa_index}: {question}");
            }
            EvalEvent::ContextBuilt {
                units,
                tokens,
                truncated,
                ..
            } => {
                debug!(
                    "Context: {units} unit(s), ~{tokens} tokens{}",
                    if *truncated { " (truncated)" } else { "" }
                );
            }
            EvalEvent::BatchStart { first, size, .. } => {
                debug!("Batch: questions {first}..{}", first + size);
            }
            EvalEvent::ParseTrialFailed {
                attempt,
                max_trials,
                reason,
            } => {
                warn!("Trial {attempt}/{max_trials}: unparseable response: {reason}");
            }
            EvalEvent::BatchAnswered {
                answered, usage, ..
            } => match usage {
                Some(u) => info!(
                    "Answered {answered} question(s) (prompt={}t, completion={}t)",
                    u.prompt_tokens, u.completion_tokens
                ),
                None => info!("Answered {answered} question(s)"),
            },
            EvalEvent::Flushed { path } => {
                debug!("Saved predictions to {}", path.display());
            }
            EvalEvent::SampleComplete {
                sample_id,
                answered,
                skipped,
            } => {
                info!("{sample_id}: {answered} answered, {skipped} skipped");
            }
            EvalEvent::RunComplete { report } => {
                info!("{}", report.summary());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Output of [`LoggingHandler`] for `event` under an `info` filter.
    fn logged_at_info(event: &EvalEvent<'_>) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || LoggingHandler.on_event(event));
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn skipped_questions_show_under_default_filter() {
        let out = logged_at_info(&EvalEvent::QuestionSkipped {
            sample_id: "conv-1",
            qa_index: 4,
            question: "Where did Ann move?",
        });
        assert!(out.contains("Skipping answered question 4: Where did Ann move?"));
    }

    #[test]
    fn context_statistics_stay_at_debug() {
        let out = logged_at_info(&EvalEvent::ContextBuilt {
            sample_id: "conv-1",
            units: 12,
            tokens: 900,
            truncated: false,
        });
        assert!(out.is_empty());
    }

    #[test]
    fn fn_handler_sees_every_event() {
        let seen = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|e: &EvalEvent<'_>| {
            if let EvalEvent::QuestionSkipped { qa_index, .. } = e {
                seen.lock().unwrap().push(*qa_index);
            }
        });
        for qa_index in [1, 3] {
            handler.on_event(&EvalEvent::QuestionSkipped {
                sample_id: "s",
                qa_index,
                question: "q",
            });
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }
}
