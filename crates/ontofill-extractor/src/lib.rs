//! ontofill Extractor - From raw text to voted facts
//!
//! The pure, synchronous half of the pipeline:
//! - [`chunker`]: token-bounded, sentence-aware splitting with overlap
//! - [`response`]: locating the JSON object in a model completion
//! - [`normalize`]: mapping that JSON onto the canonical fact model
//! - [`consensus`]: threshold voting across the completions of one chunk
//!
//! [`extract_sample`] ties the middle two together for one completion.

pub mod chunker;
pub mod consensus;
pub mod normalize;
pub mod response;

pub use chunker::{Chunk, Chunker};
pub use consensus::ConsensusAggregator;
pub use normalize::{DefaultJsonAdapter, JsonAdapter};
pub use response::extract_json;

use ontofill_core::FactSet;
use thiserror::Error;

/// Why one model completion was dropped. Always recovered: the sibling
/// completions of the same chunk are still counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("JSON not found in model response")]
    JsonNotFound,

    #[error("Malformed JSON in model response: {0}")]
    MalformedJson(String),

    #[error("Wrong JSON structure in model response: {0}")]
    WrongJsonStructure(String),
}

/// Extract and normalize one completion
pub fn extract_sample(adapter: &dyn JsonAdapter, sample: &str) -> Result<FactSet, SampleError> {
    let value = extract_json(sample)?;
    adapter.map_json(&value)
}
