//! Token counting capability.
//!
//! Exact tokenization belongs to the model family and is supplied by the
//! adapter. When no tokenizer is available, [`CharRatioCounter`] estimates
//! from character counts.

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Counts tokens the way a given model would.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<T: TokenCounter + ?Sized> TokenCounter for &T {
    fn count_tokens(&self, text: &str) -> usize {
        (**self).count_tokens(text)
    }
}

/// Character-ratio token estimator.
///
/// Rounds up, so the estimate for a concatenation never exceeds the sum of
/// the estimates for its parts. The window builder relies on this when it
/// charges turns one at a time.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioCounter {
    chars_per_token: f64,
}

impl CharRatioCounter {
    pub fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenCounter for CharRatioCounter {
    fn count_tokens(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}
