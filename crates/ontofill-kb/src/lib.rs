//! ontofill KB - Ontology knowledge base
//!
//! Materializes accepted facts as individuals of an ontology and persists
//! the result as a JSON ontology document. Also renders the extraction
//! prompt from the ontology vocabulary.

pub mod prompt;
pub mod store;

pub use prompt::{generate_prompt, PromptOptions};
pub use store::{Individual, OntologyDocument, OntologyKnowledgeBase};
