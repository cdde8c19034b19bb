//! Consensus voting
//!
//! Every completion of a chunk votes once for each distinct fact it
//! contains. A fact is accepted when its votes reach the threshold, which
//! filters out facts a single sample made up.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ontofill_core::{ConsensusResult, FactGroups, FactSet, NoopObserver, Observer, PipelineEvent};

/// Threshold voter over the per-sample fact sets of one chunk
#[derive(Clone)]
pub struct ConsensusAggregator {
    threshold: usize,
    observer: Arc<dyn Observer>,
}

impl ConsensusAggregator {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report accepted results to an observer
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Vote over the samples of one chunk and report the result
    pub fn accumulate(&self, samples: &[FactSet]) -> ConsensusResult {
        self.accumulate_for(samples, None, None)
    }

    /// Same as [`accumulate`](Self::accumulate), tagging the reported event
    /// with its place and chunk
    pub fn accumulate_for(
        &self,
        samples: &[FactSet],
        place: Option<&str>,
        chunk: Option<usize>,
    ) -> ConsensusResult {
        let result = FactSet {
            entities: vote(samples.iter().map(|s| &s.entities), self.threshold),
            relations: vote(samples.iter().map(|s| &s.relations), self.threshold),
            attributes: vote(samples.iter().map(|s| &s.attributes), self.threshold),
        };

        tracing::debug!(
            place = place.unwrap_or("-"),
            chunk = ?chunk,
            samples = samples.len(),
            entities = result.entity_count(),
            relations = result.relation_count(),
            attributes = result.attribute_count(),
            "Consensus reached"
        );

        self.observer.notify(PipelineEvent::Consensus {
            place: place.map(str::to_string),
            chunk,
            facts: result.clone(),
        });

        result
    }
}

impl std::fmt::Debug for ConsensusAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusAggregator")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Count each distinct fact once per sample and keep those with enough votes
fn vote<'a, F>(groups: impl Iterator<Item = &'a FactGroups<F>>, threshold: usize) -> FactGroups<F>
where
    F: Clone + Eq + Hash + 'a,
{
    let mut counts: HashMap<&'a str, HashMap<&'a F, usize>> = HashMap::new();

    for group in groups {
        for (name, facts) in group {
            let per_name = counts.entry(name.as_str()).or_default();
            for fact in facts {
                *per_name.entry(fact).or_default() += 1;
            }
        }
    }

    let mut accepted = FactGroups::new();
    for (name, per_name) in counts {
        let kept: std::collections::HashSet<F> = per_name
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(fact, _)| fact.clone())
            .collect();
        if !kept.is_empty() {
            accepted.insert(name.to_string(), kept);
        }
    }

    accepted
}
