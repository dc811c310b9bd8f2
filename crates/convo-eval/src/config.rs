//! Evaluation run configuration.

use crate::context::{ContextDatabase, RetrievalMode, Retriever};
use crate::error::{EvalError, Result};
use crate::model::ModelProfile;
use crate::prompt::CoinFlip;
use std::path::PathBuf;

/// Environment variable holding the chat API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";
/// Environment variable holding the embeddings API key.
pub const EMBEDDINGS_KEY_ENV: &str = "EMBEDDINGS_API_KEY";

/// Options for one evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    /// Model identifier; selects the profile and prefixes the prediction key.
    pub model: String,
    /// Input dataset (JSON array of samples).
    pub data_file: PathBuf,
    /// Output file with predictions. Resumed from when it exists.
    pub out_file: PathBuf,
    /// Questions per model call.
    pub batch_size: usize,
    /// Replace the conversation window with top-K retrieved fragments.
    pub use_retrieval: bool,
    pub retrieval_mode: Option<RetrievalMode>,
    /// Ranking used when retrieval is on.
    pub retriever: Retriever,
    pub top_k: usize,
    /// Directory holding persisted context databases.
    pub emb_dir: Option<PathBuf>,
    /// Re-answer questions that already have a prediction.
    pub overwrite: bool,
    /// Prefer 4-bit quantized deployments.
    pub quantized: bool,
    /// Batch re-queries when a response is unparseable. Default: 3.
    pub max_parse_trials: u32,
    /// HTTP retries for transient failures. Default: 3.
    pub http_retries: u32,
    /// Endpoint model name, overriding the profile's.
    pub api_model: Option<String>,
    /// Seed for forced-choice option order. `None` is non-reproducible.
    pub seed: Option<u64>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            data_file: PathBuf::new(),
            out_file: PathBuf::new(),
            batch_size: 1,
            use_retrieval: false,
            retrieval_mode: None,
            retriever: Retriever::Embedding,
            top_k: 5,
            emb_dir: None,
            overwrite: false,
            quantized: false,
            max_parse_trials: 3,
            http_retries: 3,
            api_model: None,
            seed: None,
        }
    }
}

impl EvalConfig {
    pub fn new(
        model: impl Into<String>,
        data_file: impl Into<PathBuf>,
        out_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model: model.into(),
            data_file: data_file.into(),
            out_file: out_file.into(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable retrieval over `{emb_dir}` databases at `mode` granularity.
    pub fn with_retrieval(
        mut self,
        mode: RetrievalMode,
        emb_dir: impl Into<PathBuf>,
        top_k: usize,
    ) -> Self {
        self.use_retrieval = true;
        self.retrieval_mode = Some(mode);
        self.emb_dir = Some(emb_dir.into());
        self.top_k = top_k;
        self
    }

    /// Enable BM25 retrieval over each sample's dialogue turns.
    pub fn with_lexical_retrieval(mut self, top_k: usize) -> Self {
        self.use_retrieval = true;
        self.retriever = Retriever::Bm25;
        self.retrieval_mode = Some(RetrievalMode::Dialog);
        self.top_k = top_k;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_quantized(mut self, quantized: bool) -> Self {
        self.quantized = quantized;
        self
    }

    pub fn with_max_parse_trials(mut self, trials: u32) -> Self {
        self.max_parse_trials = trials;
        self
    }

    pub fn with_http_retries(mut self, retries: u32) -> Self {
        self.http_retries = retries;
        self
    }

    pub fn with_api_model(mut self, api_model: impl Into<String>) -> Self {
        self.api_model = Some(api_model.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Resolve the model profile and check the options against it.
    pub fn profile(&self) -> Result<ModelProfile> {
        let mut profile = ModelProfile::resolve(&self.model)?.with_quantized(self.quantized);
        if let Some(api) = &self.api_model {
            profile = profile.with_api_model(api.clone());
        }
        self.validate(&profile)?;
        Ok(profile)
    }

    /// Reject incompatible options before any model call.
    pub fn validate(&self, profile: &ModelProfile) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EvalError::Config("batch size must be at least 1".into()));
        }
        if self.max_parse_trials == 0 {
            return Err(EvalError::Config("max parse trials must be at least 1".into()));
        }
        if self.use_retrieval {
            if self.batch_size != 1 {
                return Err(EvalError::Config(format!(
                    "retrieval requires batch size 1, got {}",
                    self.batch_size
                )));
            }
            match self.retriever {
                Retriever::Embedding => {
                    if self.retrieval_mode.is_none() || self.emb_dir.is_none() {
                        return Err(EvalError::Config(
                            "retrieval requires a retrieval mode and an embedding directory"
                                .into(),
                        ));
                    }
                }
                Retriever::Bm25 => {
                    if let Some(mode) = self.retrieval_mode.filter(|m| *m != RetrievalMode::Dialog)
                    {
                        return Err(EvalError::Config(format!(
                            "bm25 retrieval indexes dialogue turns; mode '{mode}' is not supported"
                        )));
                    }
                }
            }
            if self.top_k == 0 {
                return Err(EvalError::Config("top-k must be at least 1".into()));
            }
        }
        if profile.single_question_only() && self.batch_size > 1 {
            return Err(EvalError::Config(format!(
                "{} ({} family) answers one question per call; batch size {} is not supported",
                profile.model_id, profile.family, self.batch_size
            )));
        }
        if self.quantized && profile.family.is_hosted() {
            return Err(EvalError::Config(format!(
                "4-bit quantization is not available for hosted model {}",
                profile.model_id
            )));
        }
        Ok(())
    }

    /// Field name the predictions are stored under.
    pub fn prediction_key(&self) -> String {
        match (self.use_retrieval, self.retriever, self.retrieval_mode) {
            (true, Retriever::Bm25, _) => {
                format!("{}_bm25_top_{}_prediction", self.model, self.top_k)
            }
            (true, Retriever::Embedding, Some(mode)) => {
                format!("{}_{mode}_top_{}_prediction", self.model, self.top_k)
            }
            _ => format!("{}_prediction", self.model),
        }
    }

    /// Data file stem; prefixes the context database filenames.
    pub fn dataset_prefix(&self) -> String {
        self.data_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// BM25 retrieval is on.
    pub fn uses_lexical_retrieval(&self) -> bool {
        self.use_retrieval && self.retriever == Retriever::Bm25
    }

    /// Location of the context database for `sample_id`, when embedding
    /// retrieval is on.
    pub fn context_database_path(&self, sample_id: &str) -> Option<PathBuf> {
        if self.retriever != Retriever::Embedding {
            return None;
        }
        match (self.use_retrieval, self.retrieval_mode, &self.emb_dir) {
            (true, Some(mode), Some(dir)) => Some(ContextDatabase::path_for(
                dir,
                &self.dataset_prefix(),
                mode,
                sample_id,
            )),
            _ => None,
        }
    }

    /// Coin for forced-choice option order.
    pub fn coin_flip(&self) -> CoinFlip {
        match self.seed {
            Some(seed) => CoinFlip::seeded(seed),
            None => CoinFlip::random(),
        }
    }
}

/// Chat API key from [`API_KEY_ENV`].
pub fn api_key_from_env() -> Result<String> {
    std::env::var(API_KEY_ENV).map_err(|_| EvalError::Config(format!("{API_KEY_ENV} not set")))
}

/// Embeddings key from [`EMBEDDINGS_KEY_ENV`], falling back to the chat key.
pub fn embeddings_key_from_env() -> Result<String> {
    std::env::var(EMBEDDINGS_KEY_ENV).or_else(|_| api_key_from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpt() -> EvalConfig {
        EvalConfig::new("gpt-3.5-turbo", "data/locomo10.json", "out/locomo10_qa.json")
    }

    #[test]
    fn defaults() {
        let c = gpt();
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.max_parse_trials, 3);
        assert_eq!(c.http_retries, 3);
        assert!(c.profile().is_ok());
    }

    #[test]
    fn prediction_keys() {
        assert_eq!(gpt().prediction_key(), "gpt-3.5-turbo_prediction");
        let rag = gpt().with_retrieval(RetrievalMode::Dialog, "emb", 5);
        assert_eq!(rag.prediction_key(), "gpt-3.5-turbo_dialog_top_5_prediction");
    }

    #[test]
    fn database_path_uses_data_stem() {
        let rag = gpt().with_retrieval(RetrievalMode::Observation, "emb", 5);
        assert_eq!(
            rag.context_database_path("conv-26").unwrap(),
            PathBuf::from("emb/locomo10_observation_conv-26.json")
        );
        assert!(gpt().context_database_path("conv-26").is_none());
    }

    #[test]
    fn rejects_zero_batch() {
        let err = gpt().with_batch_size(0).profile().unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn retrieval_requires_single_question_batches() {
        let c = gpt()
            .with_batch_size(10)
            .with_retrieval(RetrievalMode::Summary, "emb", 5);
        assert!(matches!(c.profile(), Err(EvalError::Config(_))));
        assert!(c.with_batch_size(1).profile().is_ok());
    }

    #[test]
    fn retrieval_requires_mode_and_directory() {
        let mut c = gpt();
        c.use_retrieval = true;
        assert!(matches!(c.profile(), Err(EvalError::Config(_))));
        let zero_k = gpt().with_retrieval(RetrievalMode::Dialog, "emb", 0);
        assert!(matches!(zero_k.profile(), Err(EvalError::Config(_))));
    }

    #[test]
    fn lexical_retrieval_needs_no_embedding_directory() {
        let c = EvalConfig::new("mistral-instruct-7b-32k", "data/locomo10.json", "o.json")
            .with_lexical_retrieval(5);
        assert!(c.profile().is_ok());
        assert!(c.uses_lexical_retrieval());
        assert_eq!(c.prediction_key(), "mistral-instruct-7b-32k_bm25_top_5_prediction");
        assert!(c.context_database_path("conv-26").is_none());

        let mut summary = c.clone();
        summary.retrieval_mode = Some(RetrievalMode::Summary);
        assert!(matches!(summary.profile(), Err(EvalError::Config(_))));
        assert!(matches!(
            c.with_batch_size(2).profile(),
            Err(EvalError::Config(_))
        ));
    }

    #[test]
    fn open_weight_models_answer_one_question_at_a_time() {
        let c = EvalConfig::new("mistral-instruct-7b-32k", "d.json", "o.json").with_batch_size(4);
        assert!(matches!(c.profile(), Err(EvalError::Config(_))));
        assert!(c.with_batch_size(1).with_quantized(true).profile().is_ok());
    }

    #[test]
    fn hosted_models_are_not_quantized() {
        assert!(matches!(
            gpt().with_quantized(true).profile(),
            Err(EvalError::Config(_))
        ));
    }

    #[test]
    fn api_model_override() {
        let p = gpt().with_api_model("openai/gpt-3.5-turbo-0613").profile().unwrap();
        assert_eq!(p.api_model, "openai/gpt-3.5-turbo-0613");
        assert_eq!(p.model_id, "gpt-3.5-turbo");
    }

    #[test]
    fn seeded_coin_is_deterministic() {
        let c = gpt().with_seed(9);
        let mut a = c.coin_flip();
        let mut b = c.coin_flip();
        assert_eq!(
            (0..8).map(|_| a.flip()).collect::<Vec<_>>(),
            (0..8).map(|_| b.flip()).collect::<Vec<_>>()
        );
    }
}
