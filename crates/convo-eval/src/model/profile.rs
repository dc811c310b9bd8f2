//! Per-family model profiles.
//!
//! A profile is resolved once from the configured model identifier and
//! carries everything that differs between families: context limit, prompt
//! wording, system message, sampling, output budget, and pacing.

use super::{Generation, GenerationRequest, Message, ModelAdapter, Sampling};
use crate::context::{ANSWER_TOKENS_PER_QUESTION, TokenCounter, WindowBudget};
use crate::error::{EvalError, Result};
use crate::prompt::templates::{CHAT_SYSTEM_MESSAGE, QuestionStyle, single_question};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Output budget for hosted models answering one question.
const SINGLE_ANSWER_MAX_TOKENS: u32 = 32;

/// Pause before every call to rate-limited GPT-4 models.
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);

/// Pause before every Gemini Pro 1.0 call.
const GEMINI_PRO_DELAY: Duration = Duration::from_secs(30);

/// Model family. Decides templates and sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Gpt,
    Gemini,
    Llama,
    Mistral,
    Gemma,
    Qwen,
}

impl ModelFamily {
    /// Served only through a vendor API. Hosted families accept batched
    /// questions and have no quantized variants.
    pub fn is_hosted(&self) -> bool {
        matches!(self, ModelFamily::Gpt | ModelFamily::Gemini)
    }

    /// Chat template expects a leading system message.
    pub fn takes_system_message(&self) -> bool {
        matches!(self, ModelFamily::Llama | ModelFamily::Qwen)
    }

    pub fn question_style(&self) -> QuestionStyle {
        if self.is_hosted() {
            QuestionStyle::ShortPhrase
        } else {
            QuestionStyle::FewWords
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::Gpt => "gpt",
            ModelFamily::Gemini => "gemini",
            ModelFamily::Llama => "llama",
            ModelFamily::Mistral => "mistral",
            ModelFamily::Gemma => "gemma",
            ModelFamily::Qwen => "qwen",
        };
        f.write_str(name)
    }
}

// ── Known models ───────────────────────────────────────────────────

/// (identifier, family, context limit, OpenRouter model id)
const KNOWN_MODELS: &[(&str, ModelFamily, usize, &str)] = &[
    ("gpt-4-turbo", ModelFamily::Gpt, 128_000, "openai/gpt-4-turbo"),
    ("gpt-4", ModelFamily::Gpt, 4096, "openai/gpt-4"),
    ("gpt-4-32k", ModelFamily::Gpt, 320_000, "openai/gpt-4-32k"),
    ("gpt-3.5-turbo", ModelFamily::Gpt, 4096, "openai/gpt-3.5-turbo"),
    ("gpt-3.5-turbo-16k", ModelFamily::Gpt, 16_000, "openai/gpt-3.5-turbo-16k"),
    ("gpt-3.5-turbo-12k", ModelFamily::Gpt, 12_000, "openai/gpt-3.5-turbo-16k"),
    ("gpt-3.5-turbo-8k", ModelFamily::Gpt, 8000, "openai/gpt-3.5-turbo-16k"),
    ("gpt-3.5-turbo-4k", ModelFamily::Gpt, 4000, "openai/gpt-3.5-turbo-16k"),
    ("gemini-pro-1.0", ModelFamily::Gemini, 1_000_000, "google/gemini-pro"),
    ("llama2", ModelFamily::Llama, 4096, "meta-llama/llama-2-13b-chat"),
    ("llama2-70b", ModelFamily::Llama, 4096, "meta-llama/llama-2-70b-chat"),
    ("llama2-chat", ModelFamily::Llama, 4096, "meta-llama/llama-2-13b-chat"),
    ("llama2-chat-70b", ModelFamily::Llama, 4096, "meta-llama/llama-2-70b-chat"),
    ("llama3-chat-70b", ModelFamily::Llama, 4096, "meta-llama/llama-3-70b-instruct"),
    ("mistral-7b-4k", ModelFamily::Mistral, 4096, "mistralai/mistral-7b-instruct"),
    ("mistral-7b-8k", ModelFamily::Mistral, 8000, "mistralai/mistral-7b-instruct"),
    ("mistral-7b-128k", ModelFamily::Mistral, 128_000, "mistralai/mistral-7b-instruct"),
    ("mistral-instruct-7b-4k", ModelFamily::Mistral, 4096, "mistralai/mistral-7b-instruct"),
    ("mistral-instruct-7b-8k", ModelFamily::Mistral, 8000, "mistralai/mistral-7b-instruct"),
    ("mistral-instruct-7b-8k-new", ModelFamily::Mistral, 8000, "mistralai/mistral-7b-instruct-v0.2"),
    ("mistral-instruct-7b-32k", ModelFamily::Mistral, 32_000, "mistralai/mistral-7b-instruct-v0.2"),
    ("mistral-instruct-7b-32k-v2", ModelFamily::Mistral, 8000, "mistralai/mistral-7b-instruct-v0.2"),
    ("mistral-instruct-7b-128k", ModelFamily::Mistral, 128_000, "mistralai/mistral-7b-instruct-v0.3"),
    ("gemma-7b-it", ModelFamily::Gemma, 8000, "google/gemma-7b-it"),
    ("qwen-7b", ModelFamily::Qwen, 8192, "qwen/qwen-2-7b-instruct"),
    ("qwen2.5-3b-instruct", ModelFamily::Qwen, 8192, "qwen/qwen-2.5-3b-instruct"),
];

// ── Profile ────────────────────────────────────────────────────────

/// Everything family-specific about one configured model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    /// Identifier as configured; also the prefix of the prediction key.
    pub model_id: String,
    pub family: ModelFamily,
    /// Context length in tokens.
    pub context_limit: usize,
    /// Model name sent to the chat endpoint.
    pub api_model: String,
    /// Pause before every call.
    pub call_delay: Duration,
    /// Prefer a 4-bit quantized deployment.
    pub quantized: bool,
}

impl ModelProfile {
    /// Look up a known model. Unknown identifiers are a configuration error.
    pub fn resolve(model_id: &str) -> Result<Self> {
        let (id, family, limit, api) = KNOWN_MODELS
            .iter()
            .find(|(id, ..)| *id == model_id)
            .ok_or_else(|| {
                let known: Vec<&str> = KNOWN_MODELS.iter().map(|(id, ..)| *id).collect();
                EvalError::Config(format!(
                    "unknown model '{model_id}' (known: {})",
                    known.join(", ")
                ))
            })?;
        let call_delay = if id.starts_with("gpt-4") {
            RATE_LIMIT_DELAY
        } else if id.contains("pro-1.0") {
            GEMINI_PRO_DELAY
        } else {
            Duration::ZERO
        };
        Ok(Self {
            model_id: (*id).to_string(),
            family: *family,
            context_limit: *limit,
            api_model: (*api).to_string(),
            call_delay,
            quantized: false,
        })
    }

    pub fn with_quantized(mut self, quantized: bool) -> Self {
        self.quantized = quantized;
        self
    }

    /// Send requests under a different endpoint model name.
    pub fn with_api_model(mut self, api_model: impl Into<String>) -> Self {
        self.api_model = api_model.into();
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    /// Open-weight chat families answer one question per call.
    pub fn single_question_only(&self) -> bool {
        !self.family.is_hosted()
    }

    /// Context budget with the output reserve for `batch_size` answers.
    pub fn token_budget(&self, batch_size: usize) -> WindowBudget {
        WindowBudget::new(self.context_limit)
            .with_answer_reserve(ANSWER_TOKENS_PER_QUESTION, batch_size)
    }

    pub fn max_output_tokens(&self, batch_size: usize) -> u32 {
        if self.family.is_hosted() && batch_size <= 1 {
            SINGLE_ANSWER_MAX_TOKENS
        } else {
            let tokens = batch_size.saturating_mul(ANSWER_TOKENS_PER_QUESTION);
            u32::try_from(tokens).unwrap_or(u32::MAX)
        }
    }

    pub fn sampling(&self) -> Sampling {
        if self.family.is_hosted() {
            Sampling::greedy()
        } else {
            Sampling {
                temperature: 0.4,
                top_k: Some(10),
                top_p: Some(0.9),
            }
        }
    }

    /// Single-question template text for this family.
    pub fn question_prompt(&self, question: &str, forced_choice: bool) -> String {
        single_question(self.family.question_style(), question, forced_choice)
    }

    /// Chat messages for `context` followed by `question_block`.
    ///
    /// Both question templates open with a newline, so the block is joined
    /// with a single one.
    pub fn render_prompt(&self, context: &str, question_block: &str) -> Vec<Message> {
        let user = Message::user(format!("{context}\n{question_block}"));
        if self.family.takes_system_message() {
            vec![Message::system(CHAT_SYSTEM_MESSAGE), user]
        } else {
            vec![user]
        }
    }

    /// Tokens of fixed prompt text outside the conversation: the system
    /// message if any, plus `prompt_text`.
    pub fn fixed_prompt_tokens(&self, counter: &dyn TokenCounter, prompt_text: &str) -> usize {
        let system = if self.family.takes_system_message() {
            counter.count_tokens(CHAT_SYSTEM_MESSAGE)
        } else {
            0
        };
        system + counter.count_tokens(prompt_text)
    }

    pub fn request(&self, messages: Vec<Message>, batch_size: usize) -> GenerationRequest {
        GenerationRequest {
            messages,
            max_output_tokens: self.max_output_tokens(batch_size),
            sampling: self.sampling(),
            quantized: self.quantized,
        }
    }

    /// Wait out the family's call delay, then generate.
    pub async fn invoke(
        &self,
        adapter: &dyn ModelAdapter,
        messages: Vec<Message>,
        batch_size: usize,
    ) -> Result<Generation> {
        if !self.call_delay.is_zero() {
            debug!("Waiting {:?} before calling {}", self.call_delay, self.model_id);
            tokio::time::sleep(self.call_delay).await;
        }
        adapter.generate(self.request(messages, batch_size)).await
    }
}
