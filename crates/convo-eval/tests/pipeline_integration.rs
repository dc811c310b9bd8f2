//! Integration tests for the evaluation pipeline.
//!
//! These drive the full `Evaluator` against scripted in-process model and
//! embedding backends, with the prediction file in a temp directory.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use convo_eval::context::{CharRatioCounter, RetrievalMode, TokenCounter};
use convo_eval::dataset::{Category, Conversation, QaRecord, Sample, Turn, load_samples};
use convo_eval::driver::Evaluator;
use convo_eval::events::{EvalEvent, FnEventHandler};
use convo_eval::model::{
    EmbedFuture, EmbedRole, Embedder, GenerateFuture, Generation, GenerationRequest, ModelAdapter,
    TokenUsage,
};
use convo_eval::prompt::{CoinFlip, NO_INFORMATION};
use convo_eval::store::PredictionStore;
use convo_eval::{EvalError, config::EvalConfig};
use serde_json::{Map, json};

// ── Scripted backends ────────────────────────────────────────────────

/// Replies with canned responses in order; errors once the script runs out.
struct ScriptedAdapter {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
    counter: CharRatioCounter,
}

impl ScriptedAdapter {
    fn new<'a>(responses: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            requests: Mutex::new(Vec::new()),
            counter: CharRatioCounter::default(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Content of the last message of every request.
    fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages.last().unwrap().content.clone())
            .collect()
    }
}

impl TokenCounter for ScriptedAdapter {
    fn count_tokens(&self, text: &str) -> usize {
        self.counter.count_tokens(text)
    }
}

impl ModelAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: GenerationRequest) -> GenerateFuture<'_> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        Box::pin(async move {
            let text = next.ok_or(EvalError::EmptyResponse)?;
            Ok(Generation {
                text,
                usage: Some(TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 5,
                }),
            })
        })
    }
}

/// Embeds every text as the same unit vector.
struct FixedEmbedder {
    vector: Vec<f32>,
    calls: Mutex<Vec<(usize, EmbedRole)>>,
}

impl Embedder for FixedEmbedder {
    fn embed<'a>(&'a self, texts: &'a [String], role: EmbedRole) -> EmbedFuture<'a> {
        self.calls.lock().unwrap().push((texts.len(), role));
        Box::pin(async move { Ok(texts.iter().map(|_| self.vector.clone()).collect()) })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

fn conversation() -> Conversation {
    Conversation::new()
        .with_session(
            1,
            "1:56 pm on 8 May, 2023",
            vec![
                Turn::new("Ann", "I just moved to Paris!").with_fragment_id("D1:1"),
                Turn::new("Bob", "Congrats! How is it?").with_fragment_id("D1:2"),
                Turn::new("Ann", "Lovely, the cafes are great.").with_fragment_id("D1:3"),
            ],
        )
        .with_session(
            2,
            "7:55 pm on 9 June, 2023",
            vec![
                Turn::new("Bob", "I am thinking about a trip.").with_fragment_id("D2:1"),
                Turn::new("Ann", "You should visit!")
                    .with_caption("a photo of the Eiffel Tower")
                    .with_fragment_id("D2:2"),
                Turn::new("Bob", "Maybe next year.").with_fragment_id("D2:3"),
            ],
        )
}

fn questions() -> Vec<QaRecord> {
    vec![
        QaRecord::new("Where did Ann move?", Category::MultiHop).with_answer("Paris"),
        QaRecord::new("When did Ann move?", Category::Temporal).with_answer("May 2023"),
        QaRecord::new("Where did Bob move?", Category::Adversarial)
            .with_adversarial_answer("Berlin"),
    ]
}

fn sample(id: &str) -> Sample {
    Sample {
        sample_id: id.into(),
        conversation: conversation(),
        qa: questions(),
        extra: Map::new(),
    }
}

fn predictions(path: &Path, sample_id: &str, key: &str) -> Vec<Option<String>> {
    let samples = load_samples(path).unwrap();
    let sample = samples.iter().find(|s| s.sample_id == sample_id).unwrap();
    sample
        .qa
        .iter()
        .map(|qa| qa.prediction(key).map(String::from))
        .collect()
}

const KEY: &str = "gpt-3.5-turbo-16k_prediction";

fn batch_config(out: &Path, batch_size: usize) -> EvalConfig {
    EvalConfig::new("gpt-3.5-turbo-16k", "data/locomo.json", out).with_batch_size(batch_size)
}

// ── Window mode ──────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_pacing_can_be_overridden() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = EvalConfig::new("gemini-pro-1.0", "data/locomo.json", &out).with_batch_size(3);
    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new([r#"{"0":"Paris","1":"May 2023","2":"b"}"#]);

    let evaluator = Evaluator::new(&config, &adapter).unwrap();
    assert_eq!(evaluator.profile().call_delay, Duration::from_secs(30));
    let unpaced = evaluator.profile().clone().with_call_delay(Duration::ZERO);

    let report = evaluator
        .with_profile(unpaced)
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap();
    assert_eq!(report.answered, 3);
    assert_eq!(
        predictions(&out, "conv-1", "gemini-pro-1.0_prediction")[2].as_deref(),
        Some("Berlin")
    );
}

#[tokio::test]
async fn batch_of_three_answers_every_category() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = batch_config(&out, 3);
    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new([r#"{"0":"Paris","1":"2023-05-01","2":"(a)"}"#]);

    let report = Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(adapter.calls(), 1);
    assert_eq!(report.batches, 1);
    assert_eq!(report.answered, 3);
    assert_eq!(report.prompt_tokens, 100);

    let prompt = &adapter.prompts()[0];
    assert!(prompt.starts_with("Below is a conversation between two people: Ann and Bob."));
    for turn in conversation().sessions.values().flat_map(|s| &s.turns) {
        assert!(prompt.contains(&turn.render()), "missing turn: {}", turn.text);
    }
    assert!(prompt.find("DATE: 1:56 pm on 8 May, 2023") < prompt.find("DATE: 7:55 pm on 9 June, 2023"));
    assert!(prompt.contains(
        "0: Where did Ann move?\n\
         1: When did Ann move? Use DATE of CONVERSATION to answer with an approximate date.\n\
         2: Where did Bob move? (a) No information available (b) Berlin. \
         Select the correct answer by writing (a) or (b)."
    ));

    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("2023-05-01".to_string()),
            Some(NO_INFORMATION.to_string()),
        ]
    );
}

#[tokio::test]
async fn single_question_mode_decodes_letters_and_labels() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = batch_config(&out, 1);
    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new(["Paris\n", "Answer: May 2023", "(b)"]);

    Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(adapter.calls(), 3);
    let prompts = adapter.prompts();
    assert!(prompts[0].contains("Question: Where did Ann move? Short answer:"));
    assert!(prompts[2].contains("(a) No information available (b) Berlin."));
    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("May 2023".to_string()),
            Some("Berlin".to_string()),
        ]
    );
}

#[tokio::test]
async fn long_conversation_keeps_most_recent_turns() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = EvalConfig::new("gpt-3.5-turbo", "data/locomo.json", &out);

    let turns: Vec<Turn> = (0..300)
        .map(|i| Turn::new("Ann", format!("turn-{i:03} {}", "x".repeat(80))))
        .collect();
    let samples = vec![Sample {
        sample_id: "long".into(),
        conversation: Conversation::new().with_session(1, "8 May 2023", turns),
        qa: vec![QaRecord::new("What did Ann say?", Category::SingleHop).with_answer("x")],
        extra: Map::new(),
    }];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new(["x"]);

    let truncated = Mutex::new(Vec::new());
    let handler = FnEventHandler::new(|e: &EvalEvent<'_>| {
        if let EvalEvent::ContextBuilt { truncated: t, .. } = e {
            truncated.lock().unwrap().push(*t);
        }
    });
    Evaluator::new(&config, &adapter)
        .unwrap()
        .with_event_handler(&handler)
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(*truncated.lock().unwrap(), vec![true]);
    let prompt = &adapter.prompts()[0];
    assert!(!prompt.contains("turn-000"));
    assert!(prompt.contains("turn-299"));
    assert!(prompt.find("turn-298") < prompt.find("turn-299"));
    assert!(adapter.count_tokens(prompt) < 4096);
}

// ── Resume ───────────────────────────────────────────────────────────

#[tokio::test]
async fn rerun_skips_answered_questions() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = batch_config(&out, 3);
    let samples = vec![sample("conv-1")];

    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let first = ScriptedAdapter::new([r#"{"0":"Paris","1":"May","2":"(b)"}"#]);
    Evaluator::new(&config, &first)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap();

    // A second pass with an empty script must not call the model at all.
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let second = ScriptedAdapter::new([]);
    let report = Evaluator::new(&config, &second)
        .unwrap()
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(second.calls(), 0);
    assert_eq!(report.answered, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("May".to_string()),
            Some("Berlin".to_string()),
        ]
    );
}

#[tokio::test]
async fn partial_output_only_fills_missing_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = batch_config(&out, 3);
    let samples = vec![sample("conv-1")];

    let mut store = PredictionStore::open(&out, &samples).unwrap();
    store.set_prediction("conv-1", 1, KEY, "earlier", None).unwrap();
    store.flush().unwrap();

    let mut store = PredictionStore::open(&out, &samples).unwrap();
    // Ordinals close up around the skipped question.
    let adapter = ScriptedAdapter::new([r#"{"0":"Paris","1":"(b)"}"#]);
    let skipped = Mutex::new(Vec::new());
    let handler = FnEventHandler::new(|e: &EvalEvent<'_>| {
        if let EvalEvent::QuestionSkipped { question, .. } = e {
            skipped.lock().unwrap().push(question.to_string());
        }
    });
    Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .with_event_handler(&handler)
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(*skipped.lock().unwrap(), vec!["When did Ann move?".to_string()]);
    assert!(!adapter.prompts()[0].contains("When did Ann move?"));
    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("earlier".to_string()),
            Some("Berlin".to_string()),
        ]
    );
}

#[tokio::test]
async fn overwrite_reanswers_everything() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let samples = vec![sample("conv-1")];

    let mut store = PredictionStore::open(&out, &samples).unwrap();
    for i in 0..3 {
        store.set_prediction("conv-1", i, KEY, "stale", None).unwrap();
    }
    store.flush().unwrap();

    let config = batch_config(&out, 3).with_overwrite(true);
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new([r#"{"0":"Paris","1":"May 2023","2":"a"}"#]);
    let report = Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(false))
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(report.skipped, 0);
    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("May 2023".to_string()),
            Some("Berlin".to_string()),
        ]
    );
}

// ── Parse retries ────────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_response_is_requeried() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = batch_config(&out, 3);
    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new([
        "Sorry, I can only answer one question at a time.",
        "```json\n{'0': 'Paris', '1': 'May 2023', '2': '(a)'}\n```",
    ]);

    let trials = Mutex::new(Vec::new());
    let handler = FnEventHandler::new(|e: &EvalEvent<'_>| {
        if let EvalEvent::ParseTrialFailed {
            attempt,
            max_trials,
            ..
        } = e
        {
            trials.lock().unwrap().push((*attempt, *max_trials));
        }
    });
    let report = Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .with_event_handler(&handler)
        .run(&samples, &mut store)
        .await
        .unwrap();

    assert_eq!(adapter.calls(), 2);
    assert_eq!(*trials.lock().unwrap(), vec![(1, 3)]);
    // Both calls are billed.
    assert_eq!(report.prompt_tokens, 200);
    // The re-query is the identical request.
    let prompts = adapter.prompts();
    assert_eq!(prompts[0], prompts[1]);
    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("May 2023".to_string()),
            Some(NO_INFORMATION.to_string()),
        ]
    );
}

#[tokio::test]
async fn exhausted_parse_trials_keep_earlier_batches() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = batch_config(&out, 3).with_max_parse_trials(2);
    let samples = vec![sample("conv-1"), sample("conv-2")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new([
        r#"{"0":"Paris","1":"May 2023","2":"(a)"}"#,
        "no idea",
        "still no idea",
    ]);

    let err = Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap_err();

    assert!(matches!(err, EvalError::ParseRetriesExhausted { attempts: 2, .. }));
    assert_eq!(adapter.calls(), 3);
    assert_eq!(
        predictions(&out, "conv-1", KEY),
        vec![
            Some("Paris".to_string()),
            Some("May 2023".to_string()),
            Some(NO_INFORMATION.to_string()),
        ]
    );
    assert_eq!(predictions(&out, "conv-2", KEY), vec![None, None, None]);
}

// ── Retrieval mode ───────────────────────────────────────────────────

fn write_database(emb_dir: &Path) {
    let db = json!({
        "embeddings": [[1.0, 0.0], [0.0, 1.0], [0.8, 0.6]],
        "date_time": ["8 May 2023", "9 May 2023", "10 May 2023"],
        "dia_id": ["D1:1", "D1:2", ["D2:1", "D2:2"]],
        "context": ["Ann moved to Paris", "Bob likes tea", "Ann visited Berlin"]
    });
    std::fs::write(
        emb_dir.join("locomo_dialog_conv-1.json"),
        serde_json::to_string(&db).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn retrieval_replaces_conversation_with_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    write_database(dir.path());
    let config = EvalConfig::new("gpt-3.5-turbo", "data/locomo.json", &out).with_retrieval(
        RetrievalMode::Dialog,
        dir.path(),
        2,
    );
    let key = "gpt-3.5-turbo_dialog_top_2_prediction";

    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new(["Paris", "May 2023", "(a)"]);
    let embedder = FixedEmbedder {
        vector: vec![1.0, 0.0],
        calls: Mutex::new(Vec::new()),
    };

    Evaluator::new(&config, &adapter)
        .unwrap()
        .with_embedder(&embedder)
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap();

    // One embedding call per sample, for all pending questions.
    assert_eq!(*embedder.calls.lock().unwrap(), vec![(3, EmbedRole::Query)]);

    let prompt = &adapter.prompts()[0];
    assert!(prompt.contains("8 May 2023: Ann moved to Paris\n10 May 2023: Ann visited Berlin"));
    assert!(!prompt.contains("Bob likes tea"));
    assert!(!prompt.contains("I just moved to Paris!"));

    let written = load_samples(&out).unwrap();
    let qa = &written[0].qa;
    assert_eq!(qa[0].prediction(key), Some("Paris"));
    assert_eq!(qa[2].prediction(key), Some(NO_INFORMATION));
    assert_eq!(
        qa[0].extra[&format!("{key}_context")],
        json!(["D1:1", "D2:1", "D2:2"])
    );
}

#[tokio::test]
async fn bm25_retrieval_ranks_turns_without_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = EvalConfig::new("gpt-3.5-turbo", "data/locomo.json", &out).with_lexical_retrieval(1);
    let key = "gpt-3.5-turbo_bm25_top_1_prediction";

    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new(["Paris", "May 2023", "(a)"]);

    let report = Evaluator::new(&config, &adapter)
        .unwrap()
        .with_coin_flip(CoinFlip::fixed(true))
        .run(&samples, &mut store)
        .await
        .unwrap();
    assert_eq!(report.answered, 3);

    let prompt = &adapter.prompts()[0];
    assert!(prompt.contains("1:56 pm on 8 May, 2023: Ann said, \"I just moved to Paris!\""));
    assert!(!prompt.contains("Congrats"));
    assert!(!prompt.contains("DATE:"));

    let written = load_samples(&out).unwrap();
    let qa = &written[0].qa;
    assert_eq!(qa[0].prediction(key), Some("Paris"));
    assert_eq!(qa[0].extra[&format!("{key}_context")], json!(["D1:1"]));
}

#[tokio::test]
async fn retrieval_without_database_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let config = EvalConfig::new("gpt-3.5-turbo", "data/locomo.json", &out).with_retrieval(
        RetrievalMode::Summary,
        dir.path(),
        5,
    );
    let samples = vec![sample("conv-1")];
    let mut store = PredictionStore::open(&out, &samples).unwrap();
    let adapter = ScriptedAdapter::new([]);
    let embedder = FixedEmbedder {
        vector: vec![1.0, 0.0],
        calls: Mutex::new(Vec::new()),
    };

    let err = Evaluator::new(&config, &adapter)
        .unwrap()
        .with_embedder(&embedder)
        .run(&samples, &mut store)
        .await
        .unwrap_err();

    assert!(matches!(err, EvalError::Config(_)));
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn incompatible_options_fail_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.json");
    let adapter = ScriptedAdapter::new([]);

    let config = batch_config(&out, 4).with_retrieval(RetrievalMode::Dialog, dir.path(), 5);
    assert!(matches!(
        Evaluator::new(&config, &adapter),
        Err(EvalError::Config(_))
    ));

    let config = EvalConfig::new("llama2-chat", "d.json", &out).with_batch_size(5);
    assert!(matches!(
        Evaluator::new(&config, &adapter),
        Err(EvalError::Config(_))
    ));

    let config = EvalConfig::new("gpt-9", "d.json", &out);
    assert!(matches!(
        Evaluator::new(&config, &adapter),
        Err(EvalError::Config(_))
    ));
    assert_eq!(adapter.calls(), 0);
}
