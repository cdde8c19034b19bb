//! ontofill Pipeline - Concurrent extraction over many places
//!
//! Wires the extractor, a model gateway and a knowledge base into a worker
//! pool, and provides the place sources, text sources and observers a run
//! needs.
//!
//! # Example
//!
//! ```ignore
//! let state = ProcessingState::running();
//! let pipeline = Pipeline::new(&config, text_source, gateway, kb, state.clone())?
//!     .with_observer(Arc::new(TracingObserver));
//! let summary = pipeline.run(PlaceList::new(urls)).await;
//! ```

pub mod observe;
pub mod orchestrator;
pub mod places;
pub mod sources;
pub mod state;

pub use observe::{
    ChannelObserver, FanoutObserver, ProgressCounters, ProgressSnapshot, TracingObserver,
};
pub use orchestrator::{Pipeline, RunSummary};
pub use places::{LinePlaces, PlaceList, SharedPlaces, SinglePlace};
pub use sources::{html_to_text, FileTextSource, WebTextSource};
pub use state::ProcessingState;
