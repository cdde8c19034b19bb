//! Sentence-aware chunking
//!
//! Splits a text into pieces whose token count fits the model budget.
//! Sentences end at (and include) one of the configured separators; text
//! after the last separator is a final sentence of its own. Consecutive
//! chunks share the trailing `overlap_sentences` sentences of the earlier
//! chunk, so every chunk starts with some context from the previous one.
//!
//! Token bounds assume a subadditive counter (the count of a concatenation
//! never exceeds the sum of the parts), which holds for the approximate
//! character based counter and for BPE tokenizers in practice.

use ontofill_core::{ExtractionConfig, OntofillError, OversizePolicy, Result, TokenCounter};
use regex::Regex;

// ============================================================================
// Chunk
// ============================================================================

/// A token-bounded slice of a place's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position within the place, starting at 0
    pub index: usize,

    /// Chunk text, overlap prefix included
    pub text: String,

    /// Byte length of the prefix repeated from the previous chunk
    pub overlap_len: usize,

    /// Token count of `text`
    pub token_count: usize,
}

impl Chunk {
    /// The part of the chunk not already covered by the previous chunk
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }
}

/// Byte span of one sentence plus its token count
#[derive(Debug, Clone, Copy)]
struct Sentence {
    start: usize,
    end: usize,
    tokens: usize,
}

// ============================================================================
// Chunker
// ============================================================================

/// Splits text into chunks under a fixed token limit
#[derive(Debug, Clone)]
pub struct Chunker {
    separators: Regex,
    token_limit: usize,
    overlap_sentences: usize,
    oversize_policy: OversizePolicy,
}

impl Chunker {
    /// Create a chunker. Empty separators are ignored; at least one must
    /// remain.
    pub fn new(separators: &[String], token_limit: usize, overlap_sentences: usize) -> Result<Self> {
        let mut separators: Vec<&str> = separators
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();

        if separators.is_empty() {
            return Err(OntofillError::ConfigError(
                "at least one sentence separator is required".to_string(),
            ));
        }

        // Prefer the longest separator where several match at one position
        separators.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let pattern = separators
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");

        let separators = Regex::new(&pattern)
            .map_err(|e| OntofillError::ConfigError(format!("invalid separators: {e}")))?;

        Ok(Self {
            separators,
            token_limit,
            overlap_sentences,
            oversize_policy: OversizePolicy::default(),
        })
    }

    /// Create a chunker from the extraction settings and a gateway budget
    pub fn from_config(config: &ExtractionConfig, token_limit: usize) -> Result<Self> {
        Ok(Self::new(&config.separators, token_limit, config.overlap_sentences)?
            .with_oversize_policy(config.oversize_policy))
    }

    pub fn with_oversize_policy(mut self, policy: OversizePolicy) -> Self {
        self.oversize_policy = policy;
        self
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    /// Split text into sentences, each ending with its separator. Nothing
    /// is dropped: the sentences concatenate back to the input.
    pub fn split_into_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.sentence_spans(text)
            .into_iter()
            .map(|(start, end)| &text[start..end])
            .collect()
    }

    fn sentence_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut start = 0;

        for m in self.separators.find_iter(text) {
            spans.push((start, m.end()));
            start = m.end();
        }
        if start < text.len() {
            spans.push((start, text.len()));
        }

        spans
    }

    /// Split text into chunks in text order. A text within the limit comes
    /// back as a single chunk equal to the input.
    pub fn split(&self, text: &str, counter: &dyn TokenCounter) -> Vec<Chunk> {
        let total = counter.count_tokens(text);
        if total <= self.token_limit {
            return vec![Chunk {
                index: 0,
                text: text.to_string(),
                overlap_len: 0,
                token_count: total,
            }];
        }

        let mut builder = ChunkBuilder::new(text, counter, self.token_limit, self.overlap_sentences);

        for (start, end) in self.sentence_spans(text) {
            let tokens = counter.count_tokens(&text[start..end]);
            let sentence = Sentence { start, end, tokens };

            if tokens > self.token_limit && self.oversize_policy == OversizePolicy::Split {
                for piece in hard_split(text, sentence, counter, self.token_limit) {
                    builder.push(piece);
                }
            } else {
                builder.push(sentence);
            }
        }

        builder.finish()
    }
}

/// Greedy accumulation state for [`Chunker::split`]
struct ChunkBuilder<'a> {
    text: &'a str,
    counter: &'a dyn TokenCounter,
    token_limit: usize,
    overlap_sentences: usize,
    chunks: Vec<Chunk>,
    current: Vec<Sentence>,
    /// Leading sentences of `current` carried over as overlap
    seed: usize,
    tokens: usize,
}

impl<'a> ChunkBuilder<'a> {
    fn new(
        text: &'a str,
        counter: &'a dyn TokenCounter,
        token_limit: usize,
        overlap_sentences: usize,
    ) -> Self {
        Self {
            text,
            counter,
            token_limit,
            overlap_sentences,
            chunks: Vec::new(),
            current: Vec::new(),
            seed: 0,
            tokens: 0,
        }
    }

    fn push(&mut self, sentence: Sentence) {
        if self.current.len() > self.seed && self.tokens + sentence.tokens > self.token_limit {
            self.emit();
            self.reseed(sentence.tokens);
        }

        self.current.push(sentence);
        self.tokens += sentence.tokens;
    }

    /// Keep the last sentences of the closed chunk that still leave room for
    /// the incoming one. A sentence over the limit never survives this.
    fn reseed(&mut self, incoming: usize) {
        let keep = self.overlap_sentences.min(self.current.len());
        let mut seed: Vec<Sentence> = self.current[self.current.len() - keep..].to_vec();
        let mut tokens: usize = seed.iter().map(|s| s.tokens).sum();

        while !seed.is_empty() && tokens + incoming > self.token_limit {
            tokens -= seed.remove(0).tokens;
        }

        self.seed = seed.len();
        self.tokens = tokens;
        self.current = seed;
    }

    fn emit(&mut self) {
        let (Some(first), Some(last)) = (self.current.first(), self.current.last()) else {
            return;
        };

        let overlap_len = match self.seed {
            0 => 0,
            n => self.current[n - 1].end - first.start,
        };
        let text = &self.text[first.start..last.end];

        self.chunks.push(Chunk {
            index: self.chunks.len(),
            text: text.to_string(),
            overlap_len,
            token_count: self.counter.count_tokens(text),
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        if self.current.len() > self.seed {
            self.emit();
        }
        self.chunks
    }
}

/// Cut an oversized sentence at character boundaries into pieces that each
/// fit the limit. Every piece holds at least one character.
fn hard_split(
    text: &str,
    sentence: Sentence,
    counter: &dyn TokenCounter,
    token_limit: usize,
) -> Vec<Sentence> {
    let body = &text[sentence.start..sentence.end];
    let mut bounds: Vec<usize> = body.char_indices().map(|(i, _)| i).skip(1).collect();
    bounds.push(body.len());

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut from = 0;

    while from < bounds.len() {
        // Largest end that still fits, found by binary search over the
        // remaining char boundaries
        let fits = |end: usize| counter.count_tokens(&body[start..end]) <= token_limit;
        let (mut lo, mut hi) = (from, bounds.len() - 1);
        let mut best = from;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if fits(bounds[mid]) {
                best = mid;
                lo = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                hi = mid - 1;
            }
        }

        let end = bounds[best];
        pieces.push(Sentence {
            start: sentence.start + start,
            end: sentence.start + end,
            tokens: counter.count_tokens(&body[start..end]),
        });
        start = end;
        from = best + 1;
    }

    pieces
}
