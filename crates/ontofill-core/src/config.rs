//! ontofill Configuration Management
//!
//! Handles configuration from a TOML file and environment variables,
//! with defaults matching a small single-operator deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Chunking and consensus configuration
    pub extraction: ExtractionConfig,

    /// Worker pool configuration
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Always use env for sensitive values
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(workers) = std::env::var("ONTOFILL_WORKERS") {
            self.pipeline.workers = workers.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ONTOFILL_WORKERS".to_string(),
                value: workers,
            })?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Check value ranges. Called before any work starts so that a bad
    /// configuration never surfaces in the middle of a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, value: impl ToString) -> ConfigError {
            ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired("llm.model".to_string()));
        }
        if self.llm.num_samples == 0 {
            return Err(invalid("llm.num_samples", self.llm.num_samples));
        }
        if self.llm.context_size == 0 {
            return Err(invalid("llm.context_size", self.llm.context_size));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature", self.llm.temperature));
        }
        if self.llm.request_timeout_secs == Some(0) {
            return Err(invalid("llm.request_timeout_secs", 0));
        }
        if self.extraction.threshold == 0 {
            return Err(invalid("extraction.threshold", self.extraction.threshold));
        }
        if self.extraction.separators.iter().all(|s| s.is_empty()) {
            return Err(ConfigError::MissingRequired(
                "extraction.separators".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(invalid("pipeline.workers", self.pipeline.workers));
        }
        if self.pipeline.gateway_concurrency == 0 {
            return Err(invalid(
                "pipeline.gateway_concurrency",
                self.pipeline.gateway_concurrency,
            ));
        }

        Ok(())
    }
}

/// LLM provider configuration (any OpenAI-compatible chat completions API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key; prefer the `OPENAI_API_KEY` environment variable
    pub api_key: Option<String>,

    /// API base URL
    pub base_url: String,

    /// Model name to use
    pub model: String,

    /// System instruction sent with every request
    pub system_message: String,

    /// Temperature for generation
    pub temperature: f32,

    /// Independent completions requested per chunk (N)
    pub num_samples: u32,

    /// Total context size of the model in tokens
    pub context_size: usize,

    /// Per-request timeout in seconds; no timeout when unset
    pub request_timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_message: "You are an information extraction system. \
                             You answer with a single JSON object and nothing else."
                .to_string(),
            temperature: 0.2,
            num_samples: 3,
            context_size: 16_384,
            request_timeout_secs: None,
        }
    }
}

/// What to do with a single sentence that alone exceeds the token budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Emit the sentence whole as its own (oversized) chunk
    #[default]
    PassThrough,
    /// Hard-split the sentence at character boundaries
    Split,
}

/// Chunking and consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Trailing sentences repeated at the start of the next chunk
    pub overlap_sentences: usize,

    /// Substrings terminating a sentence
    pub separators: Vec<String>,

    /// Completions a fact must appear in to be accepted
    pub threshold: usize,

    /// Handling of sentences larger than the budget
    pub oversize_policy: OversizePolicy,

    /// Label languages requested by the generated prompt
    pub label_languages: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            overlap_sentences: 1,
            separators: vec![
                ". ".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                "\n".to_string(),
            ],
            threshold: 2,
            oversize_policy: OversizePolicy::PassThrough,
            label_languages: vec!["kz".to_string(), "en".to_string(), "ru".to_string()],
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent place workers (P)
    pub workers: usize,

    /// Simultaneous model gateway calls across the pool (S)
    pub gateway_concurrency: usize,

    /// Extra attempts for a failed gateway call
    pub gateway_retries: u32,

    /// Initial backoff between gateway attempts, doubled per retry
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            gateway_concurrency: 4,
            gateway_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,

    /// Write logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            file: None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
