//! Token counting
//!
//! [`BpeTokenCounter`] counts with the model's own tokenizer. When the model
//! is unknown to `tiktoken-rs`, [`token_counter_for_model`] falls back to
//! [`ApproxTokenCounter`].

use std::fmt;
use std::sync::Arc;

use ontofill_core::{OntofillError, Result, TokenCounter};
use tiktoken_rs::CoreBPE;

use crate::SAFETY_MARGIN_TOKENS;

/// Exact counter backed by the BPE vocabulary of an OpenAI model
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| {
            OntofillError::ConfigError(format!("no tokenizer for model {model}: {e}"))
        })?;
        Ok(Self { bpe })
    }
}

impl fmt::Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BpeTokenCounter").finish_non_exhaustive()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Approximate counter: one token per four characters, rounded up.
///
/// Close to BPE tokenizers for English prose but undercounts Cyrillic and
/// Kazakh text, which BPE vocabularies split into more tokens per character.
/// Only used when no tokenizer is known for the model.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenCounter {
    chars_per_token: usize,
}

impl ApproxTokenCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// The model's tokenizer, or the approximate counter when there is none
pub fn token_counter_for_model(model: &str) -> Arc<dyn TokenCounter> {
    match BpeTokenCounter::for_model(model) {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            tracing::warn!(model, error = %e, "Falling back to approximate token counting");
            Arc::new(ApproxTokenCounter::default())
        }
    }
}

/// Tokens left for chunk text once the system message, the task prompt and
/// the safety margin are taken out of the context
pub fn available_budget(
    context_size: usize,
    system_message: &str,
    task_prompt: &str,
    counter: &dyn TokenCounter,
) -> usize {
    context_size
        .saturating_sub(counter.count_tokens(system_message))
        .saturating_sub(counter.count_tokens(task_prompt))
        .saturating_sub(SAFETY_MARGIN_TOKENS)
}
