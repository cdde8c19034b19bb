//! ontofill Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout ontofill:
//! - Fact model (entities, relations, attribute values, fact sets)
//! - Ontology schema (classes, object and data properties)
//! - Common error types
//! - Capability traits for the pipeline's collaborators
//! - Progress events and the observer interface
//! - Configuration management

pub mod config;
pub mod fact;
pub mod observe;
pub mod ontology;

pub use config::{
    AppConfig, ConfigError, ExtractionConfig, LlmConfig, LoggingConfig, OversizePolicy,
    PipelineConfig,
};
pub use fact::{
    AttributeFact, ConsensusResult, EntityFact, FactGroups, FactSet, Label, Place, RelationFact,
    ScalarValue,
};
pub use observe::{NoopObserver, Observer, PipelineEvent};
pub use ontology::{DataProperty, DataType, ObjectProperty, OntologyClass, OntologySchema};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for ontofill operations
#[derive(Error, Debug)]
pub enum OntofillError {
    #[error("Failed to fetch text for {place}: {message}")]
    Fetch { place: String, message: String },

    #[error("Model gateway error: {0}")]
    Gateway(String),

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(String),

    #[error("Invalid ontology: {0}")]
    InvalidOntology(String),

    #[error("Place source error: {0}")]
    PlaceSource(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OntofillError {
    pub fn fetch(place: &str, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            place: place.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<ConfigError> for OntofillError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OntofillError>;

// ============================================================================
// Knowledge Base Types
// ============================================================================

/// What a knowledge base write actually stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub entities: usize,
    pub relations: usize,
    pub attributes: usize,
    /// Facts dropped because they referenced unknown names or had bad values
    pub rejected: usize,
}

impl WriteReport {
    pub fn total(&self) -> usize {
        self.entities + self.relations + self.attributes
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Lazy, non-restartable sequence of places.
///
/// Implementations need not be safe for concurrent pulls; the pipeline
/// serializes access itself.
#[async_trait::async_trait]
pub trait PlaceSource: Send {
    /// Next place, or `None` once the source is exhausted
    async fn next_place(&mut self) -> Result<Option<Place>>;
}

#[async_trait::async_trait]
impl<S: PlaceSource + ?Sized> PlaceSource for Box<S> {
    async fn next_place(&mut self) -> Result<Option<Place>> {
        (**self).next_place().await
    }
}

/// Resolves a place to plain text
#[async_trait::async_trait]
pub trait TextSource: Send + Sync {
    async fn get_text(&self, place: &str) -> Result<String>;
}

/// Counts model tokens
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Generative model used as a sampled extractor
#[async_trait::async_trait]
pub trait ModelGateway: TokenCounter {
    /// Request the configured number of independent completions for a chunk
    async fn respond(&self, chunk: &str) -> Result<Vec<String>>;

    /// Tokens left for chunk text once the fixed instructions are accounted for
    fn available_budget(&self) -> usize;
}

/// Store that materializes accepted facts.
///
/// Must tolerate concurrent calls. Unknown class, property or individual
/// names are reported and skipped rather than returned as errors.
#[async_trait::async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn add_facts(&self, facts: &FactSet) -> Result<WriteReport>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct VecPlaces(std::vec::IntoIter<Place>);

    #[async_trait::async_trait]
    impl PlaceSource for VecPlaces {
        async fn next_place(&mut self) -> Result<Option<Place>> {
            Ok(self.0.next())
        }
    }

    #[tokio::test]
    async fn test_place_source_object_safety() {
        let mut source: Box<dyn PlaceSource> =
            Box::new(VecPlaces(vec!["a".to_string(), "b".to_string()].into_iter()));

        assert_eq!(source.next_place().await.unwrap().as_deref(), Some("a"));
        assert_eq!(source.next_place().await.unwrap().as_deref(), Some("b"));
        assert!(source.next_place().await.unwrap().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = OntofillError::fetch("https://example.org", "404 Not Found");
        assert_eq!(
            err.to_string(),
            "Failed to fetch text for https://example.org: 404 Not Found"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: OntofillError = ConfigError::MissingRequired("llm.model".to_string()).into();
        assert!(matches!(err, OntofillError::ConfigError(_)));
    }

    #[test]
    fn test_write_report_total() {
        let report = WriteReport {
            entities: 2,
            relations: 1,
            attributes: 3,
            rejected: 4,
        };
        assert_eq!(report.total(), 6);
    }
}
