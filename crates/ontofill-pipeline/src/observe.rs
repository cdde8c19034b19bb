//! Observer implementations
//!
//! - [`TracingObserver`]: one structured log line per event
//! - [`ProgressCounters`]: running totals for a progress display
//! - [`ChannelObserver`]: typed events over an unbounded channel, for a UI
//! - [`FanoutObserver`]: broadcast to several observers

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ontofill_core::{Observer, PipelineEvent};
use serde::Serialize;
use tokio::sync::mpsc;

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn notify(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::ModelRequest { prompt } => {
                tracing::trace!(event = event.name(), prompt_len = prompt.len(), %prompt, "Model request");
            }
            PipelineEvent::Consensus {
                place,
                chunk,
                facts,
            } => {
                tracing::debug!(
                    event = event.name(),
                    place = place.as_deref().unwrap_or("-"),
                    chunk = ?chunk,
                    entities = facts.entity_count(),
                    relations = facts.relation_count(),
                    attributes = facts.attribute_count(),
                    "Consensus"
                );
            }
            PipelineEvent::Error { place, message } => {
                tracing::warn!(
                    event = event.name(),
                    place = place.as_deref().unwrap_or("-"),
                    %message,
                    "Pipeline error"
                );
            }
            PipelineEvent::PlaceProcessed { place } => {
                tracing::info!(event = event.name(), %place, "Place processed");
            }
            PipelineEvent::IndividualStored { id, description } => {
                tracing::debug!(event = event.name(), %id, %description, "Individual stored");
            }
            PipelineEvent::EntitiesAdded { count }
            | PipelineEvent::RelationsAdded { count }
            | PipelineEvent::AttributesAdded { count } => {
                tracing::debug!(event = event.name(), count, "Knowledge base updated");
            }
            PipelineEvent::PoolStopped => {
                tracing::info!(event = event.name(), "Worker pool stopped");
            }
        }
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Point-in-time copy of [`ProgressCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub places: usize,
    pub entities: usize,
    pub relations: usize,
    pub attributes: usize,
    pub errors: usize,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "places processed: {}, entities added: {}, relations added: {}, attributes added: {}, errors: {}",
            self.places, self.entities, self.relations, self.attributes, self.errors
        )
    }
}

/// Running totals of processed places, stored facts and errors
#[derive(Debug, Default)]
pub struct ProgressCounters {
    places: AtomicUsize,
    entities: AtomicUsize,
    relations: AtomicUsize,
    attributes: AtomicUsize,
    errors: AtomicUsize,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            places: self.places.load(Ordering::Relaxed),
            entities: self.entities.load(Ordering::Relaxed),
            relations: self.relations.load(Ordering::Relaxed),
            attributes: self.attributes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl Observer for ProgressCounters {
    fn notify(&self, event: PipelineEvent) {
        let (counter, amount) = match event {
            PipelineEvent::PlaceProcessed { .. } => (&self.places, 1),
            PipelineEvent::EntitiesAdded { count } => (&self.entities, count),
            PipelineEvent::RelationsAdded { count } => (&self.relations, count),
            PipelineEvent::AttributesAdded { count } => (&self.attributes, count),
            PipelineEvent::Error { .. } => (&self.errors, 1),
            _ => return,
        };
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

// ============================================================================
// Channel and fan-out
// ============================================================================

/// Forwards events to an unbounded channel. Sending never blocks; events
/// are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn notify(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }
}

/// Sends every event to each of its observers in order
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn Observer>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl Observer for FanoutObserver {
    fn notify(&self, event: PipelineEvent) {
        if let Some((last, rest)) = self.observers.split_last() {
            for observer in rest {
                observer.notify(event.clone());
            }
            last.notify(event);
        }
    }
}
