//! Answer every question of a conversational QA dataset with one model.
//!
//! Reads the chat API key from `OPENROUTER_KEY` (and the embeddings key from
//! `EMBEDDINGS_API_KEY`, falling back to the chat key, in retrieval mode).
//!
//! # Examples
//!
//! ```sh
//! # Full conversation context, 20 questions per call
//! convo-eval --model gpt-3.5-turbo-16k --data-file data/locomo10.json \
//!   --out-file out/locomo10_qa.json --batch-size 20
//!
//! # Top-5 retrieved observations instead of the conversation
//! convo-eval --model gpt-3.5-turbo --data-file data/locomo10.json \
//!   --out-file out/locomo10_qa.json --use-rag --rag-mode observation \
//!   --top-k 5 --emb-dir out/embeddings
//!
//! # Top-5 dialogue turns by BM25, no embeddings needed
//! convo-eval --model mistral-instruct-7b-32k --data-file data/locomo10.json \
//!   --out-file out/locomo10_qa.json --use-rag --retriever bm25 --top-k 5
//!
//! # Open-weight model on a 4-bit deployment
//! convo-eval --model mistral-instruct-7b-32k --data-file data/locomo10.json \
//!   --out-file out/locomo10_qa.json --use-4bit
//! ```

use clap::Parser;
use convo_eval::api::{EmbeddingClient, OpenRouterAdapter, OpenRouterClient, RetryConfig};
use convo_eval::config::{EvalConfig, api_key_from_env, embeddings_key_from_env};
use convo_eval::context::{RetrievalMode, Retriever};
use convo_eval::dataset::load_samples;
use convo_eval::driver::{Evaluator, RunReport};
use convo_eval::events::LoggingHandler;
use convo_eval::store::PredictionStore;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Answer every question of a conversational QA dataset with one model.
#[derive(Parser)]
#[command(name = "convo-eval")]
struct Cli {
    // ── Files ──────────────────────────────────────────────────
    /// Input dataset (JSON array of samples)
    #[arg(long)]
    data_file: PathBuf,

    /// Output file; resumed from when it already exists
    #[arg(long)]
    out_file: PathBuf,

    // ── Model ──────────────────────────────────────────────────
    /// Model identifier (e.g. gpt-3.5-turbo-16k, mistral-instruct-7b-32k)
    #[arg(long)]
    model: String,

    /// Endpoint model name, overriding the built-in mapping
    #[arg(long)]
    api_model: Option<String>,

    /// Chat completions endpoint, for OpenAI-compatible servers other than
    /// OpenRouter
    #[arg(long)]
    api_url: Option<String>,

    /// Prefer a 4-bit quantized deployment (open-weight models only)
    #[arg(long = "use-4bit")]
    use_4bit: bool,

    // ── Questions ──────────────────────────────────────────────
    /// Questions per model call
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Re-answer questions that already have a prediction
    #[arg(long)]
    overwrite: bool,

    /// Seed for forced-choice option order
    #[arg(long)]
    seed: Option<u64>,

    /// Re-queries for an unparseable batch response
    #[arg(long, default_value_t = 3)]
    max_parse_trials: u32,

    /// Retries for rate limits, server errors, and network failures
    #[arg(long, default_value_t = 3)]
    http_retries: u32,

    // ── Retrieval ──────────────────────────────────────────────
    /// Replace the conversation with retrieved fragments
    #[arg(long = "use-rag")]
    use_rag: bool,

    /// Fragment granularity: summary, dialog, or observation
    #[arg(long)]
    rag_mode: Option<RetrievalMode>,

    /// Ranking: embedding (persisted databases) or bm25 (dialogue turns)
    #[arg(long, default_value_t = Retriever::Embedding)]
    retriever: Retriever,

    /// Fragments per question
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Directory holding the context databases
    #[arg(long)]
    emb_dir: Option<PathBuf>,

    /// Embedding model for questions
    #[arg(long)]
    embedding_model: Option<String>,

    /// Embeddings endpoint, when not served by OpenRouter
    #[arg(long)]
    embeddings_url: Option<String>,
}

impl Cli {
    fn config(&self) -> EvalConfig {
        let mut config = EvalConfig::new(&self.model, &self.data_file, &self.out_file)
            .with_batch_size(self.batch_size)
            .with_overwrite(self.overwrite)
            .with_quantized(self.use_4bit)
            .with_max_parse_trials(self.max_parse_trials)
            .with_http_retries(self.http_retries);
        config.use_retrieval = self.use_rag;
        config.retriever = self.retriever;
        config.retrieval_mode = match (self.retriever, self.rag_mode) {
            (Retriever::Bm25, None) => Some(RetrievalMode::Dialog),
            (_, mode) => mode,
        };
        config.emb_dir = self.emb_dir.clone();
        config.top_k = self.top_k;
        if let Some(api_model) = &self.api_model {
            config = config.with_api_model(api_model);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config
    }
}

async fn evaluate(cli: &Cli) -> convo_eval::Result<RunReport> {
    let config = cli.config();
    let profile = config.profile()?;
    let retry = RetryConfig::with_retries(config.http_retries);

    let mut client = OpenRouterClient::new(api_key_from_env()?)?;
    if let Some(url) = &cli.api_url {
        client = client.with_url(url);
    }
    let adapter = OpenRouterAdapter::new(client, profile.api_model.clone()).with_retry(retry.clone());

    let embedder = if config.use_retrieval && !config.uses_lexical_retrieval() {
        let mut embedder = EmbeddingClient::new(embeddings_key_from_env()?)?.with_retry(retry);
        if let Some(model) = &cli.embedding_model {
            embedder = embedder.with_model(model);
        }
        if let Some(url) = &cli.embeddings_url {
            embedder = embedder.with_url(url);
        }
        Some(embedder)
    } else {
        None
    };

    let samples = load_samples(&config.data_file)?;
    let mut store = PredictionStore::open(&config.out_file, &samples)?;

    let handler = LoggingHandler;
    let mut evaluator = Evaluator::new(&config, &adapter)?.with_event_handler(&handler);
    if let Some(embedder) = &embedder {
        evaluator = evaluator.with_embedder(embedder);
    }
    evaluator.run(&samples, &mut store).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match evaluate(&cli).await {
        Ok(report) => println!("{}", report.summary()),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
