//! Response extraction
//!
//! Models wrap their JSON in prose or code fences. The object is found with a
//! greedy brace match across newlines: from the first `{` to the last `}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::SampleError;

static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json object regex"));

/// Locate and parse the JSON object embedded in a completion
pub fn extract_json(sample: &str) -> Result<Value, SampleError> {
    let candidate = JSON_OBJECT
        .find(sample)
        .ok_or(SampleError::JsonNotFound)?;

    serde_json::from_str(candidate.as_str()).map_err(|e| SampleError::MalformedJson(e.to_string()))
}
