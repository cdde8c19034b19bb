//! Progress and audit events
//!
//! Every component that has something to show an operator pushes a
//! [`PipelineEvent`] into an [`Observer`]. Observers are fire-and-forget:
//! `notify` must return immediately and must never fail.

use serde::Serialize;

use crate::fact::{FactSet, Place};

/// Typed events emitted while the pipeline runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Full prompt sent to the model
    ModelRequest { prompt: String },

    /// Consensus result accepted for one chunk
    Consensus {
        place: Option<Place>,
        chunk: Option<usize>,
        facts: FactSet,
    },

    /// A recovered or per-item failure
    Error {
        place: Option<Place>,
        message: String,
    },

    /// A place went through the whole pipeline
    PlaceProcessed { place: Place },

    /// Human-readable description of an individual after a write
    IndividualStored { id: String, description: String },

    EntitiesAdded { count: usize },
    RelationsAdded { count: usize },
    AttributesAdded { count: usize },

    /// Emitted once when every worker of a run has exited
    PoolStopped,
}

impl PipelineEvent {
    /// Shorthand for an error event
    pub fn error(place: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error {
            place: place.map(str::to_string),
            message: message.into(),
        }
    }

    /// Stable event name, used for log fields
    pub fn name(&self) -> &'static str {
        match self {
            Self::ModelRequest { .. } => "model_request",
            Self::Consensus { .. } => "consensus",
            Self::Error { .. } => "error",
            Self::PlaceProcessed { .. } => "place_processed",
            Self::IndividualStored { .. } => "individual_stored",
            Self::EntitiesAdded { .. } => "entities_added",
            Self::RelationsAdded { .. } => "relations_added",
            Self::AttributesAdded { .. } => "attributes_added",
            Self::PoolStopped => "pool_stopped",
        }
    }
}

/// Receiver of pipeline events
pub trait Observer: Send + Sync {
    fn notify(&self, event: PipelineEvent);
}

/// Observer that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn notify(&self, _event: PipelineEvent) {}
}
