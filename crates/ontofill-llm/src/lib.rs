//! ontofill LLM - Model gateway implementations
//!
//! Provides the OpenAI-compatible chat completions gateway used as a sampled
//! extractor, and the token counters the chunker is sized with.
//!
//! Author: hephaex@gmail.com

pub mod gateway;
pub mod tokens;

pub use gateway::OpenAiGateway;
pub use tokens::{
    available_budget, token_counter_for_model, ApproxTokenCounter, BpeTokenCounter,
};

/// Tokens kept free on top of the fixed instructions
pub const SAFETY_MARGIN_TOKENS: usize = 5;
