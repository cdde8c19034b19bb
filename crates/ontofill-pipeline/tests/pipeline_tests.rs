//! Worker pool integration tests
//!
//! Every collaborator is an in-memory fake, so these run without network
//! access or a model.
//!
//! Author: hephaex@gmail.com

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ontofill_core::{
    AppConfig, EntityFact, FactSet, KnowledgeBase, ModelGateway, Observer, OntofillError,
    PipelineEvent, Place, PlaceSource, RelationFact, Result, TextSource, TokenCounter,
    WriteReport,
};
use ontofill_pipeline::{Pipeline, PlaceList, ProcessingState};

const KAZAKHSTAN_SAMPLE: &str = r#"{"objects":[["Country","Kazakhstan",[]]], "object_properties":[["hasBorder",["Kazakhstan","Russia"]]]}"#;

// =============================================================================
// Fakes
// =============================================================================

/// Serves fixed texts and records every place it is asked for
#[derive(Default)]
struct RecordingText {
    texts: HashMap<String, String>,
    default_text: Option<String>,
    requested: Mutex<Vec<String>>,
}

impl RecordingText {
    fn always(text: &str) -> Self {
        Self {
            default_text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn with(mut self, place: &str, text: &str) -> Self {
        self.texts.insert(place.to_string(), text.to_string());
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextSource for RecordingText {
    async fn get_text(&self, place: &str) -> Result<String> {
        self.requested.lock().unwrap().push(place.to_string());
        self.texts
            .get(place)
            .or(self.default_text.as_ref())
            .cloned()
            .ok_or_else(|| OntofillError::fetch(place, "404 Not Found"))
    }
}

/// Blocks every fetch until the test opens the gate
struct GatedText {
    gate: tokio::sync::Semaphore,
    started: AtomicUsize,
}

#[async_trait]
impl TextSource for GatedText {
    async fn get_text(&self, _place: &str) -> Result<String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        Ok("Kazakhstan borders Russia.".to_string())
    }
}

/// Returns the same completions for every chunk, optionally failing
struct ScriptedGateway {
    samples: Vec<String>,
    fail_when_contains: Option<&'static str>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    fn new(samples: &[&str]) -> Self {
        Self {
            samples: samples.iter().map(|s| s.to_string()).collect(),
            fail_when_contains: None,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn kazakhstan() -> Self {
        Self::new(&[KAZAKHSTAN_SAMPLE, KAZAKHSTAN_SAMPLE, "{}"])
    }

    fn failing_on(mut self, needle: &'static str) -> Self {
        self.fail_when_contains = Some(needle);
        self
    }

    fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenCounter for ScriptedGateway {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn respond(&self, chunk: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(needle) = self.fail_when_contains {
            if chunk.contains(needle) {
                return Err(OntofillError::Gateway("Rate limited".to_string()));
            }
        }
        let pending = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(OntofillError::Gateway("connection reset".to_string()));
        }

        Ok(self.samples.clone())
    }

    fn available_budget(&self) -> usize {
        1000
    }
}

/// Records every write
#[derive(Default)]
struct RecordingKb {
    writes: Mutex<Vec<FactSet>>,
}

impl RecordingKb {
    fn writes(&self) -> Vec<FactSet> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeBase for RecordingKb {
    async fn add_facts(&self, facts: &FactSet) -> Result<WriteReport> {
        self.writes.lock().unwrap().push(facts.clone());
        Ok(WriteReport {
            entities: facts.entity_count(),
            relations: facts.relation_count(),
            attributes: facts.attribute_count(),
            rejected: 0,
        })
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<(Option<String>, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Error { place, message } => Some((place, message)),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn notify(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Yields some places, then fails
struct BrokenPlaces(Vec<Place>);

#[async_trait]
impl PlaceSource for BrokenPlaces {
    async fn next_place(&mut self) -> Result<Option<Place>> {
        match self.0.pop() {
            Some(place) => Ok(Some(place)),
            None => Err(OntofillError::PlaceSource("listing truncated".to_string())),
        }
    }
}

/// Hands out `p1` at once; the second pull blocks until the gate opens
struct SlowPlaces {
    pulls: Arc<AtomicUsize>,
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl PlaceSource for SlowPlaces {
    async fn next_place(&mut self) -> Result<Option<Place>> {
        match self.pulls.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(Some("p1".to_string())),
            1 => {
                let _permit = self.gate.acquire().await.unwrap();
                Ok(Some("p2".to_string()))
            }
            _ => Ok(None),
        }
    }
}

/// Records the highest number of calls in flight at once
struct PeakGateway {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl TokenCounter for PeakGateway {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[async_trait]
impl ModelGateway for PeakGateway {
    async fn respond(&self, _chunk: &str) -> Result<Vec<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![KAZAKHSTAN_SAMPLE.to_string(); 2])
    }

    fn available_budget(&self) -> usize {
        3
    }
}

/// Panics on one place
struct PanickingText;

#[async_trait]
impl TextSource for PanickingText {
    async fn get_text(&self, place: &str) -> Result<String> {
        if place == "poison" {
            panic!("text source crashed on {place}");
        }
        Ok("Kazakhstan borders Russia.".to_string())
    }
}

fn config(workers: usize, threshold: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.workers = workers;
    config.extraction.threshold = threshold;
    config
}

fn kazakhstan_entity() -> EntityFact {
    EntityFact::new("Kazakhstan", Vec::new())
}

fn has_border() -> RelationFact {
    RelationFact::new("Kazakhstan", "Russia")
}

// =============================================================================
// Place consumption
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_place_fetched_exactly_once() {
    let text = Arc::new(RecordingText::always("Kazakhstan borders Russia."));
    let kb = Arc::new(RecordingKb::default());
    let places: Vec<String> = (0..200).map(|i| format!("https://example.org/{i}")).collect();

    let pipeline = Pipeline::new(
        &config(8, 2),
        text.clone(),
        Arc::new(ScriptedGateway::kazakhstan()),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap();

    let summary = pipeline.run(PlaceList::new(places.clone())).await;

    let requested = text.requested();
    assert_eq!(requested.len(), 200);
    let unique: HashSet<_> = requested.iter().cloned().collect();
    assert_eq!(unique, places.into_iter().collect::<HashSet<_>>());

    assert_eq!(summary.places_processed, 200);
    assert_eq!(summary.places_failed, 0);
    assert_eq!(kb.writes().len(), 200);
}

#[tokio::test]
async fn test_stopped_state_processes_nothing() {
    let text = Arc::new(RecordingText::always("Kazakhstan borders Russia."));
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(3, 2),
        text.clone(),
        Arc::new(ScriptedGateway::kazakhstan()),
        Arc::new(RecordingKb::default()),
        ProcessingState::new(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline.run(PlaceList::new(["a", "b"])).await;

    assert!(text.requested().is_empty());
    assert_eq!(summary.places_processed, 0);
    assert!(matches!(
        observer.events().as_slice(),
        [PipelineEvent::PoolStopped]
    ));
}

#[tokio::test]
async fn test_stop_lets_in_flight_places_finish() {
    let text = Arc::new(GatedText {
        gate: tokio::sync::Semaphore::new(0),
        started: AtomicUsize::new(0),
    });
    let kb = Arc::new(RecordingKb::default());
    let state = ProcessingState::running();

    let pipeline = Pipeline::new(
        &config(3, 2),
        text.clone(),
        Arc::new(ScriptedGateway::kazakhstan()),
        kb.clone(),
        state.clone(),
    )
    .unwrap();

    let places = PlaceList::new((0..10).map(|i| format!("place-{i}")));
    let run = tokio::spawn(async move { pipeline.run(places).await });

    // Every worker is now blocked inside its first place
    while text.started.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    state.stop();
    text.gate.add_permits(10);

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(text.started.load(Ordering::SeqCst), 3);
    assert_eq!(summary.places_processed, 3);
    assert_eq!(kb.writes().len(), 3);
}

#[tokio::test]
async fn test_stop_during_slow_pull_starts_nothing() {
    let text = Arc::new(RecordingText::always("Kazakhstan borders Russia."));
    let state = ProcessingState::running();
    let pulls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(tokio::sync::Semaphore::new(0));

    let pipeline = Pipeline::new(
        &config(1, 2),
        text.clone(),
        Arc::new(ScriptedGateway::kazakhstan()),
        Arc::new(RecordingKb::default()),
        state.clone(),
    )
    .unwrap();

    let places = SlowPlaces {
        pulls: pulls.clone(),
        gate: gate.clone(),
    };
    let run = tokio::spawn(async move { pipeline.run(places).await });

    // The worker is now blocked inside the second pull
    while pulls.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    state.stop();
    gate.add_permits(1);

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(text.requested(), vec!["p1".to_string()]);
    assert_eq!(summary.places_processed, 1);
}

#[tokio::test]
async fn test_place_source_error_ends_run() {
    let text = Arc::new(RecordingText::always("Kazakhstan borders Russia."));
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(3, 2),
        text.clone(),
        Arc::new(ScriptedGateway::kazakhstan()),
        Arc::new(RecordingKb::default()),
        ProcessingState::running(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline
        .run(BrokenPlaces(vec!["b".to_string(), "a".to_string()]))
        .await;

    assert_eq!(summary.places_processed, 2);
    assert_eq!(text.requested().len(), 2);

    let errors = observer.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, None);
    assert!(errors[0].1.contains("listing truncated"));
}

// =============================================================================
// Consensus end to end
// =============================================================================

#[tokio::test]
async fn test_kazakhstan_threshold_two() {
    let kb = Arc::new(RecordingKb::default());
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(1, 2),
        Arc::new(RecordingText::default().with("kz", "Kazakhstan borders Russia.")),
        Arc::new(ScriptedGateway::kazakhstan()),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline.run(PlaceList::new(["kz"])).await;
    assert_eq!(summary.places_processed, 1);
    assert_eq!(summary.facts_written, 2);

    let writes = kb.writes();
    assert_eq!(writes.len(), 1);
    let facts = &writes[0];
    assert!(facts.contains_entity("Country", &kazakhstan_entity()));
    assert!(facts.contains_relation("hasBorder", &has_border()));
    assert_eq!(facts.entity_count(), 1);
    assert_eq!(facts.relation_count(), 1);
    assert_eq!(facts.attribute_count(), 0);

    let consensus = observer.events().into_iter().find_map(|e| match e {
        PipelineEvent::Consensus { place, chunk, facts } => Some((place, chunk, facts)),
        _ => None,
    });
    let (place, chunk, facts) = consensus.unwrap();
    assert_eq!(place.as_deref(), Some("kz"));
    assert_eq!(chunk, Some(0));
    assert_eq!(facts.entity_count(), 1);
}

#[tokio::test]
async fn test_kazakhstan_threshold_three_writes_nothing() {
    let kb = Arc::new(RecordingKb::default());
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(1, 3),
        Arc::new(RecordingText::always("Kazakhstan borders Russia.")),
        Arc::new(ScriptedGateway::kazakhstan()),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline.run(PlaceList::new(["kz"])).await;

    assert!(kb.writes().is_empty());
    assert_eq!(summary.places_processed, 1);
    assert_eq!(summary.facts_written, 0);
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, PipelineEvent::PlaceProcessed { place } if place == "kz")));
}

#[tokio::test]
async fn test_bad_sample_skipped_siblings_counted() {
    let kb = Arc::new(RecordingKb::default());
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(1, 2),
        Arc::new(RecordingText::always("Kazakhstan borders Russia.")),
        Arc::new(ScriptedGateway::new(&[
            KAZAKHSTAN_SAMPLE,
            "I could not find anything.",
            KAZAKHSTAN_SAMPLE,
        ])),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline.run(PlaceList::new(["kz"])).await;

    assert_eq!(summary.places_failed, 0);
    assert_eq!(kb.writes().len(), 1);

    let errors = observer.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0.as_deref(), Some("kz"));
    assert!(errors[0].1.contains("JSON not found"));
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_failed_places_do_not_stop_others() {
    let text = RecordingText::default()
        .with("ok-1", "Kazakhstan borders Russia.")
        .with("boom", "This text makes the model boom.")
        .with("ok-2", "Kazakhstan borders China.");
    let kb = Arc::new(RecordingKb::default());
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(2, 2),
        Arc::new(text),
        Arc::new(ScriptedGateway::kazakhstan().failing_on("boom")),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline
        .run(PlaceList::new(["ok-1", "missing", "boom", "ok-2"]))
        .await;

    assert_eq!(summary.places_processed, 2);
    assert_eq!(summary.places_failed, 2);
    assert_eq!(kb.writes().len(), 2);

    let failed: HashSet<_> = observer
        .errors()
        .into_iter()
        .filter_map(|(place, _)| place)
        .collect();
    assert_eq!(
        failed,
        HashSet::from(["missing".to_string(), "boom".to_string()])
    );

    let events = observer.events();
    let stops = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::PoolStopped))
        .count();
    assert_eq!(stops, 1);
    assert!(matches!(events.last(), Some(PipelineEvent::PoolStopped)));
}

#[tokio::test]
async fn test_gateway_retried_until_success() {
    let gateway = Arc::new(ScriptedGateway::kazakhstan().failing_first(2));
    let kb = Arc::new(RecordingKb::default());
    let mut config = config(1, 2);
    config.pipeline.gateway_retries = 2;
    config.pipeline.retry_backoff_ms = 1;

    let pipeline = Pipeline::new(
        &config,
        Arc::new(RecordingText::always("Kazakhstan borders Russia.")),
        gateway.clone(),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap();

    let summary = pipeline.run(PlaceList::new(["kz"])).await;

    assert_eq!(gateway.calls(), 3);
    assert_eq!(summary.places_processed, 1);
    assert_eq!(kb.writes().len(), 1);
}

#[tokio::test]
async fn test_gateway_retries_exhausted_fails_place() {
    let gateway = Arc::new(ScriptedGateway::kazakhstan().failing_first(2));
    let mut config = config(1, 2);
    config.pipeline.gateway_retries = 1;
    config.pipeline.retry_backoff_ms = 1;

    let pipeline = Pipeline::new(
        &config,
        Arc::new(RecordingText::always("Kazakhstan borders Russia.")),
        gateway.clone(),
        Arc::new(RecordingKb::default()),
        ProcessingState::running(),
    )
    .unwrap();

    let summary = pipeline.run(PlaceList::new(["kz"])).await;

    assert_eq!(gateway.calls(), 2);
    assert_eq!(summary.places_failed, 1);
    assert_eq!(summary.places_processed, 0);
}

#[tokio::test]
async fn test_panicking_place_is_isolated() {
    let kb = Arc::new(RecordingKb::default());
    let observer = Arc::new(RecordingObserver::default());

    let pipeline = Pipeline::new(
        &config(1, 2),
        Arc::new(PanickingText),
        Arc::new(ScriptedGateway::kazakhstan()),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap()
    .with_observer(observer.clone());

    let summary = pipeline
        .run(PlaceList::new(["kz-1", "poison", "kz-2"]))
        .await;

    assert_eq!(summary.places_processed, 2);
    assert_eq!(summary.places_failed, 1);
    assert_eq!(kb.writes().len(), 2);

    let panicked: Vec<_> = observer
        .errors()
        .into_iter()
        .filter(|(_, message)| message.contains("panicked"))
        .collect();
    assert_eq!(panicked.len(), 1);
    assert_eq!(panicked[0].0.as_deref(), Some("poison"));
}

// =============================================================================
// Gateway concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gateway_calls_bounded_across_pool() {
    let gateway = Arc::new(PeakGateway {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let kb = Arc::new(RecordingKb::default());
    let mut config = config(6, 2);
    config.pipeline.gateway_concurrency = 2;
    config.extraction.overlap_sentences = 0;

    let pipeline = Pipeline::new(
        &config,
        // Four two-word sentences under a three-token budget: four chunks per place
        Arc::new(RecordingText::always("Alpha one. Beta two. Gamma three. Delta four.")),
        gateway.clone(),
        kb.clone(),
        ProcessingState::running(),
    )
    .unwrap();

    let summary = pipeline
        .run(PlaceList::new((0..10).map(|i| format!("place-{i}"))))
        .await;

    assert_eq!(summary.places_processed, 10);
    assert_eq!(kb.writes().len(), 40);
    let peak = gateway.peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "peak of {peak} gateway calls in flight");
}
