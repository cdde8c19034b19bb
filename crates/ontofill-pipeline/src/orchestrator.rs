//! Worker pool
//!
//! `P` workers pull places from one [`SharedPlaces`]. For each place a
//! worker fetches the text, chunks it, samples the gateway for every chunk
//! (at most `S` gateway calls at once across the whole pool), votes over the
//! samples and writes each non-empty consensus result to the knowledge base.
//!
//! The running flag is checked around every pull and nowhere else, so a stop
//! lets in-flight places finish, writes included, and no place starts after
//! it. Any error inside a place
//! is logged, reported, and the worker moves on to the next place.
//!
//! Author: hephaex@gmail.com

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use ontofill_core::{
    AppConfig, FactSet, KnowledgeBase, ModelGateway, NoopObserver, Observer, OntofillError,
    PipelineConfig, PipelineEvent, PlaceSource, Result, TextSource, TokenCounter,
};
use ontofill_extractor::{
    extract_sample, Chunk, Chunker, ConsensusAggregator, DefaultJsonAdapter, JsonAdapter,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::places::SharedPlaces;
use crate::state::ProcessingState;

/// Outcome of one pool run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub places_processed: usize,
    pub places_failed: usize,
    /// Facts the knowledge base reported as stored
    pub facts_written: usize,
}

#[derive(Debug, Default)]
struct RunCounters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    facts_written: AtomicUsize,
}

/// Lets the chunker count tokens with the gateway's tokenizer
struct GatewayTokens<'a>(&'a dyn ModelGateway);

impl TokenCounter for GatewayTokens<'_> {
    fn count_tokens(&self, text: &str) -> usize {
        self.0.count_tokens(text)
    }
}

/// The extraction pipeline and its worker pool
#[derive(Clone)]
pub struct Pipeline {
    text_source: Arc<dyn TextSource>,
    gateway: Arc<dyn ModelGateway>,
    knowledge_base: Arc<dyn KnowledgeBase>,
    adapter: Arc<dyn JsonAdapter>,
    observer: Arc<dyn Observer>,
    chunker: Arc<Chunker>,
    aggregator: ConsensusAggregator,
    state: ProcessingState,
    settings: PipelineConfig,
    gateway_permits: Arc<Semaphore>,
}

impl Pipeline {
    /// Assemble a pipeline. The chunker is sized with the gateway's
    /// available budget.
    pub fn new(
        config: &AppConfig,
        text_source: Arc<dyn TextSource>,
        gateway: Arc<dyn ModelGateway>,
        knowledge_base: Arc<dyn KnowledgeBase>,
        state: ProcessingState,
    ) -> Result<Self> {
        config.validate()?;

        let budget = gateway.available_budget();
        if budget == 0 {
            return Err(OntofillError::ConfigError(
                "the system message and task prompt leave no room for text in the model context"
                    .to_string(),
            ));
        }
        let chunker = Chunker::from_config(&config.extraction, budget)?;

        Ok(Self {
            text_source,
            gateway,
            knowledge_base,
            adapter: Arc::new(DefaultJsonAdapter),
            observer: Arc::new(NoopObserver),
            chunker: Arc::new(chunker),
            aggregator: ConsensusAggregator::new(config.extraction.threshold),
            state,
            gateway_permits: Arc::new(Semaphore::new(config.pipeline.gateway_concurrency)),
            settings: config.pipeline.clone(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.aggregator = self.aggregator.with_observer(observer.clone());
        self.observer = observer;
        self
    }

    pub fn with_json_adapter(mut self, adapter: Arc<dyn JsonAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    /// Run the pool until the places are exhausted or the state is stopped.
    /// Returns once every worker has exited.
    pub async fn run(&self, places: impl PlaceSource + 'static) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let places = Arc::new(SharedPlaces::new(Box::new(places)));
        let counters = Arc::new(RunCounters::default());

        tracing::info!(
            %run_id,
            workers = self.settings.workers,
            gateway_concurrency = self.settings.gateway_concurrency,
            token_limit = self.chunker.token_limit(),
            "Starting worker pool"
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.settings.workers {
            let pipeline = self.clone();
            let places = places.clone();
            let counters = counters.clone();
            workers.spawn(async move { pipeline.worker_loop(worker, places, counters).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(%run_id, error = %e, "Worker task failed");
                self.observer
                    .notify(PipelineEvent::error(None, format!("Worker task failed: {e}")));
            }
        }

        self.observer.notify(PipelineEvent::PoolStopped);

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            places_processed: counters.processed.load(Ordering::Relaxed),
            places_failed: counters.failed.load(Ordering::Relaxed),
            facts_written: counters.facts_written.load(Ordering::Relaxed),
        };

        tracing::info!(
            %run_id,
            processed = summary.places_processed,
            failed = summary.places_failed,
            facts = summary.facts_written,
            "Worker pool stopped"
        );

        summary
    }

    async fn worker_loop(
        &self,
        worker: usize,
        places: Arc<SharedPlaces>,
        counters: Arc<RunCounters>,
    ) {
        loop {
            if !self.state.is_running() {
                tracing::debug!(worker, "Stop observed, worker exiting");
                break;
            }

            let place = match places.pull().await {
                Ok(Some(place)) => place,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(worker, error = %e, "Place source failed");
                    self.observer
                        .notify(PipelineEvent::error(None, format!("Place source failed: {e}")));
                    break;
                }
            };

            // The pull may have waited on the source or on other workers
            if !self.state.is_running() {
                tracing::debug!(worker, %place, "Stop observed after pull, place left unprocessed");
                break;
            }

            tracing::info!(worker, %place, "Processing place");

            // A panic inside one place must not take the worker down with it
            let task = {
                let pipeline = self.clone();
                let place = place.clone();
                tokio::spawn(async move { pipeline.process_place(&place).await })
            };

            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(OntofillError::Other(anyhow_from_join(e))),
            };

            match outcome {
                Ok(written) => {
                    counters.processed.fetch_add(1, Ordering::Relaxed);
                    counters.facts_written.fetch_add(written, Ordering::Relaxed);
                    tracing::info!(worker, %place, facts = written, "Place processed");
                    self.observer.notify(PipelineEvent::PlaceProcessed { place });
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(worker, %place, error = %e, "Place failed");
                    self.observer
                        .notify(PipelineEvent::error(Some(&place), e.to_string()));
                }
            }
        }
    }

    /// Run one place through the whole pipeline. Returns the number of facts
    /// the knowledge base stored.
    pub async fn process_place(&self, place: &str) -> Result<usize> {
        let text = self.text_source.get_text(place).await?;

        let chunks = self
            .chunker
            .split(&text, &GatewayTokens(self.gateway.as_ref()));
        tracing::debug!(%place, text_len = text.len(), chunks = chunks.len(), "Text chunked");

        let mut results = stream::iter(chunks)
            .map(|chunk| self.process_chunk(place, chunk))
            .buffer_unordered(self.settings.gateway_concurrency);

        // Chunks are sampled concurrently; writes for this place go one at a time
        let mut written = 0;
        while let Some(result) = results.next().await {
            let facts = result?;
            if !facts.has_entities() {
                continue;
            }
            let report = self.knowledge_base.add_facts(&facts).await?;
            written += report.total();
        }

        Ok(written)
    }

    async fn process_chunk(&self, place: &str, chunk: Chunk) -> Result<FactSet> {
        let samples = self.sample(&chunk.text).await?;

        let mut per_sample = Vec::with_capacity(samples.len());
        for (index, sample) in samples.iter().enumerate() {
            match extract_sample(self.adapter.as_ref(), sample) {
                Ok(facts) => per_sample.push(facts),
                Err(e) => {
                    tracing::warn!(%place, chunk = chunk.index, sample = index, error = %e, "Sample skipped");
                    self.observer
                        .notify(PipelineEvent::error(Some(place), format!("{e}:\n{sample}")));
                }
            }
        }

        Ok(self
            .aggregator
            .accumulate_for(&per_sample, Some(place), Some(chunk.index)))
    }

    /// One gateway call under the pool-wide permit, retried with exponential
    /// backoff when configured
    async fn sample(&self, text: &str) -> Result<Vec<String>> {
        let mut backoff = Duration::from_millis(self.settings.retry_backoff_ms);
        let mut attempt = 0;

        loop {
            let result = {
                let _permit = self
                    .gateway_permits
                    .acquire()
                    .await
                    .map_err(|e| OntofillError::Gateway(format!("gateway permits closed: {e}")))?;
                self.gateway.respond(text).await
            };

            match result {
                Ok(samples) => return Ok(samples),
                Err(e) if attempt < self.settings.gateway_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "Gateway call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn anyhow_from_join(e: tokio::task::JoinError) -> anyhow::Error {
    if e.is_panic() {
        anyhow::anyhow!("place processing panicked")
    } else {
        anyhow::anyhow!("place processing cancelled: {e}")
    }
}
