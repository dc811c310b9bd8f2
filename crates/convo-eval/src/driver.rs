//! Evaluation driver: one pass over a dataset.
//!
//! For each sample the [`Evaluator`] walks the QA list in fixed-size batches.
//! Per batch it formats the pending questions, assembles context (a token-
//! budgeted window of the conversation, or top-K fragments ranked by embedding
//! similarity or BM25), calls
//! the model, extracts one answer per question, writes the answers into the
//! [`PredictionStore`] and flushes it. A crash therefore loses at most the
//! batch in flight, and a re-run with the same prediction key resumes.
//!
//! ```ignore
//! let config = EvalConfig::new("gpt-3.5-turbo", "data.json", "out.json").with_batch_size(10);
//! let samples = load_samples(&config.data_file)?;
//! let mut store = PredictionStore::open(&config.out_file, &samples)?;
//! let handler = LoggingHandler;
//! let report = Evaluator::new(&config, &adapter)?
//!     .with_event_handler(&handler)
//!     .run(&samples, &mut store)
//!     .await?;
//! ```

use crate::config::EvalConfig;
use crate::context::{
    ContextDatabase, LexicalIndex, RetrievedContext, TokenCounter, build_window, select,
};
use crate::dataset::{QaRecord, Sample};
use crate::error::{EvalError, Result};
use crate::events::{EvalEvent, EventHandler, NoopHandler};
use crate::extract::{check_parseable, extract_batch, extract_single};
use crate::model::{EmbedRole, Embedder, Message, ModelAdapter, ModelProfile, TokenUsage};
use crate::prompt::{CoinFlip, PreparedBatch, conversation_preamble, prepare_batch};
use crate::store::PredictionStore;
use std::collections::BTreeMap;
use tracing::{debug, info};

// ── Report ─────────────────────────────────────────────────────────

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub samples: usize,
    /// Model calls that produced answers (parse retries not counted).
    pub batches: usize,
    pub answered: usize,
    pub skipped: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl RunReport {
    fn add_usage(&mut self, usage: Option<TokenUsage>) {
        if let Some(u) = usage {
            self.prompt_tokens += u64::from(u.prompt_tokens);
            self.completion_tokens += u64::from(u.completion_tokens);
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "Done: {} sample(s), {} batch(es), {} answered, {} skipped, \
             {} prompt / {} completion tokens",
            self.samples,
            self.batches,
            self.answered,
            self.skipped,
            self.prompt_tokens,
            self.completion_tokens
        )
    }
}

// ── Evaluator ──────────────────────────────────────────────────────

/// QA index → extracted answer.
type Answers = BTreeMap<usize, String>;

/// Context assembled for one batch.
struct BatchContext {
    text: String,
    /// Source fragment ids, retrieval mode only.
    ids: Option<Vec<String>>,
}

/// Per-sample retrieval source.
enum Retrieval {
    Embedding {
        db: ContextDatabase,
        /// QA index → query vector.
        vectors: BTreeMap<usize, Vec<f32>>,
    },
    Lexical(LexicalIndex),
}

/// Runs the model over every pending question of a dataset.
pub struct Evaluator<'a> {
    config: &'a EvalConfig,
    profile: ModelProfile,
    adapter: &'a dyn ModelAdapter,
    embedder: Option<&'a dyn Embedder>,
    handler: &'a dyn EventHandler,
    coin: CoinFlip,
}

impl<'a> Evaluator<'a> {
    /// Resolve and validate the profile for `config`. Fails before any model
    /// call on an invalid configuration.
    pub fn new(config: &'a EvalConfig, adapter: &'a dyn ModelAdapter) -> Result<Self> {
        Ok(Self {
            profile: config.profile()?,
            coin: config.coin_flip(),
            config,
            adapter,
            embedder: None,
            handler: &NoopHandler,
        })
    }

    /// Query embedder for retrieval mode.
    pub fn with_embedder(mut self, embedder: &'a dyn Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the forced-choice coin, e.g. with [`CoinFlip::fixed`] in tests.
    pub fn with_coin_flip(mut self, coin: CoinFlip) -> Self {
        self.coin = coin;
        self
    }

    /// Replace the resolved profile (pacing, limits) after validation.
    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Evaluate every sample in `samples`, writing into `store`.
    ///
    /// Stops at the first fatal error; batches flushed before it stay on disk.
    pub async fn run(
        &mut self,
        samples: &[Sample],
        store: &mut PredictionStore,
    ) -> Result<RunReport> {
        if self.config.use_retrieval
            && !self.config.uses_lexical_retrieval()
            && self.embedder.is_none()
        {
            return Err(EvalError::Config(
                "retrieval mode needs an embedder for questions".into(),
            ));
        }
        info!(
            "Evaluating {} sample(s) with {} as '{}'",
            samples.len(),
            self.adapter.name(),
            self.config.prediction_key()
        );

        let mut report = RunReport::default();
        for (index, sample) in samples.iter().enumerate() {
            self.run_sample(sample, index, samples.len(), store, &mut report)
                .await?;
        }
        self.handler
            .on_event(&EvalEvent::RunComplete { report: &report });
        Ok(report)
    }

    async fn run_sample(
        &mut self,
        input: &Sample,
        index: usize,
        total: usize,
        store: &mut PredictionStore,
        report: &mut RunReport,
    ) -> Result<()> {
        let sample_id = input.sample_id.as_str();
        let key = self.config.prediction_key();
        // Resume state lives in the store, not the input.
        let records = store
            .sample(sample_id)
            .ok_or_else(|| EvalError::Dataset(format!("{sample_id} missing from output")))?
            .qa
            .clone();

        self.handler.on_event(&EvalEvent::SampleStart {
            sample_id,
            index,
            total,
            questions: records.len(),
        });

        let retrieval = if self.config.uses_lexical_retrieval() {
            Some(Retrieval::Lexical(LexicalIndex::from_conversation(
                &input.conversation,
            )))
        } else if let Some(path) = self.config.context_database_path(sample_id) {
            let db = ContextDatabase::load(&path)?;
            let pending: Vec<usize> = (0..records.len())
                .filter(|&i| self.config.overwrite || !records[i].has_prediction(&key))
                .collect();
            let vectors = self.embed_questions(&records, &pending).await?;
            Some(Retrieval::Embedding { db, vectors })
        } else {
            None
        };

        let (speaker_a, speaker_b) = input.conversation.speakers();
        let preamble = conversation_preamble(&speaker_a, &speaker_b);
        let batch_size = self.config.batch_size;
        let mut answered = 0;
        let mut skipped = 0;

        for start in (0..records.len()).step_by(batch_size) {
            let batch = prepare_batch(
                &records,
                start,
                batch_size,
                &key,
                self.config.overwrite,
                &mut self.coin,
            )?;
            for &qa_index in &batch.skipped {
                self.handler.on_event(&EvalEvent::QuestionSkipped {
                    sample_id,
                    qa_index,
                    question: &records[qa_index].question,
                });
            }
            skipped += batch.skipped.len();
            if batch.is_empty() {
                continue;
            }

            self.handler.on_event(&EvalEvent::BatchStart {
                sample_id,
                first: start,
                size: batch.len(),
            });

            let block = self.question_block(&batch);
            let context = match &retrieval {
                Some(source) => {
                    self.retrieved_context(sample_id, &preamble, &batch, &records, source)?
                }
                None => self.windowed_context(sample_id, input, &preamble, &block),
            };
            let messages = self.profile.render_prompt(&context.text, &block);

            let (answers, usage) = if batch_size > 1 {
                self.answer_batch(&messages, &batch, report).await?
            } else {
                self.answer_single(&messages, &batch, report).await?
            };

            for (qa_index, answer) in &answers {
                store.set_prediction(sample_id, *qa_index, &key, answer, context.ids.as_deref())?;
            }
            answered += answers.len();
            report.batches += 1;
            report.answered += answers.len();
            self.handler.on_event(&EvalEvent::BatchAnswered {
                sample_id,
                answered: answers.len(),
                usage,
            });

            store.flush()?;
            self.handler
                .on_event(&EvalEvent::Flushed { path: store.path() });
        }

        report.samples += 1;
        report.skipped += skipped;
        self.handler.on_event(&EvalEvent::SampleComplete {
            sample_id,
            answered,
            skipped,
        });
        Ok(())
    }

    /// Numbered block in batch mode; the family's single-question template
    /// otherwise.
    fn question_block(&self, batch: &PreparedBatch) -> String {
        match batch.questions.as_slice() {
            [only] if self.config.batch_size == 1 => self
                .profile
                .question_prompt(&only.text, only.choice.is_some()),
            _ => batch.render(),
        }
    }

    fn windowed_context(
        &self,
        sample_id: &str,
        sample: &Sample,
        preamble: &str,
        block: &str,
    ) -> BatchContext {
        let counter: &dyn TokenCounter = self.adapter;
        let reserve = self
            .profile
            .fixed_prompt_tokens(counter, &format!("{preamble}{block}"));
        let budget = self
            .profile
            .token_budget(self.config.batch_size)
            .with_question_reserve(reserve);
        let window = build_window(&sample.conversation, &budget, counter);

        self.handler.on_event(&EvalEvent::ContextBuilt {
            sample_id,
            units: window.included_turns,
            tokens: window.charged_tokens + reserve,
            truncated: window.truncated_at.is_some(),
        });
        BatchContext {
            text: format!("{preamble}{}", window.text),
            ids: None,
        }
    }

    fn retrieved_context(
        &self,
        sample_id: &str,
        preamble: &str,
        batch: &PreparedBatch,
        records: &[QaRecord],
        source: &Retrieval,
    ) -> Result<BatchContext> {
        let Some(question) = batch.questions.first() else {
            return Err(EvalError::Retrieval("empty batch".into()));
        };
        let retrieved: RetrievedContext = match source {
            Retrieval::Embedding { db, vectors } => {
                let mode = self
                    .config
                    .retrieval_mode
                    .ok_or_else(|| EvalError::Config("retrieval mode not set".into()))?;
                let query = vectors.get(&question.qa_index).ok_or_else(|| {
                    EvalError::Retrieval(format!(
                        "no query vector for question {}",
                        question.qa_index
                    ))
                })?;
                select(db, query, self.config.top_k, mode)?
            }
            Retrieval::Lexical(index) => {
                let raw = &records[question.qa_index].question;
                index.search(raw, self.config.top_k)
            }
        };
        let text = format!("{preamble}{}", retrieved.text);

        self.handler.on_event(&EvalEvent::ContextBuilt {
            sample_id,
            units: retrieved.scores.len(),
            tokens: self.adapter.count_tokens(&text),
            truncated: false,
        });
        Ok(BatchContext {
            text,
            ids: Some(retrieved.ids),
        })
    }

    /// Embed the raw text of the `pending` questions in one call.
    async fn embed_questions(
        &self,
        records: &[QaRecord],
        pending: &[usize],
    ) -> Result<BTreeMap<usize, Vec<f32>>> {
        if pending.is_empty() {
            return Ok(BTreeMap::new());
        }
        let embedder = self
            .embedder
            .ok_or_else(|| EvalError::Config("retrieval mode needs an embedder".into()))?;
        let texts: Vec<String> = pending
            .iter()
            .map(|&i| records[i].question.clone())
            .collect();
        let vectors = embedder.embed(&texts, EmbedRole::Query).await?;
        if vectors.len() != texts.len() {
            return Err(EvalError::Retrieval(format!(
                "embedder returned {} vectors for {} questions",
                vectors.len(),
                texts.len()
            )));
        }
        debug!("Embedded {} question(s)", vectors.len());
        Ok(pending.iter().copied().zip(vectors).collect())
    }

    /// Call the model until the response parses as a whole, then decode each
    /// question. Per-question fallbacks do not trigger a re-query.
    async fn answer_batch(
        &self,
        messages: &[Message],
        batch: &PreparedBatch,
        report: &mut RunReport,
    ) -> Result<(Answers, Option<TokenUsage>)> {
        let max_trials = self.config.max_parse_trials;
        let mut last_reason = String::new();

        for attempt in 1..=max_trials {
            let generation = self
                .profile
                .invoke(self.adapter, messages.to_vec(), self.config.batch_size)
                .await?;
            report.add_usage(generation.usage);
            debug!("Raw response ({} chars): {}", generation.text.len(), generation.text);

            match check_parseable(&generation.text) {
                Ok(()) => {
                    let answers = extract_batch(&generation.text, batch)?;
                    return Ok((answers, generation.usage));
                }
                Err(reason) => {
                    self.handler.on_event(&EvalEvent::ParseTrialFailed {
                        attempt,
                        max_trials,
                        reason: &reason,
                    });
                    last_reason = reason;
                }
            }
        }
        Err(EvalError::ParseRetriesExhausted {
            attempts: max_trials,
            reason: last_reason,
        })
    }

    async fn answer_single(
        &self,
        messages: &[Message],
        batch: &PreparedBatch,
        report: &mut RunReport,
    ) -> Result<(Answers, Option<TokenUsage>)> {
        let generation = self
            .profile
            .invoke(self.adapter, messages.to_vec(), self.config.batch_size)
            .await?;
        report.add_usage(generation.usage);

        let answers = batch
            .questions
            .iter()
            .map(|q| (q.qa_index, extract_single(&generation.text, q.choice.as_ref())))
            .collect();
        Ok((answers, generation.usage))
    }
}
