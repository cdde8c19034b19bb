//! Place sources
//!
//! Producers of the places a run consumes, plus [`SharedPlaces`], the
//! mutex-guarded wrapper that hands each place to exactly one worker.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use ontofill_core::{OntofillError, Place, PlaceSource, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

/// Exactly one place
#[derive(Debug, Clone)]
pub struct SinglePlace(Option<Place>);

impl SinglePlace {
    pub fn new(place: impl Into<Place>) -> Self {
        Self(Some(place.into()))
    }
}

#[async_trait]
impl PlaceSource for SinglePlace {
    async fn next_place(&mut self) -> Result<Option<Place>> {
        Ok(self.0.take())
    }
}

/// Places held in memory
#[derive(Debug, Clone, Default)]
pub struct PlaceList(VecDeque<Place>);

impl PlaceList {
    pub fn new<I, P>(places: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Place>,
    {
        Self(places.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
impl PlaceSource for PlaceList {
    async fn next_place(&mut self) -> Result<Option<Place>> {
        Ok(self.0.pop_front())
    }
}

/// One place per non-blank line of a file, read lazily
pub struct LinePlaces {
    lines: Lines<BufReader<File>>,
}

impl LinePlaces {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| {
            OntofillError::PlaceSource(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

#[async_trait]
impl PlaceSource for LinePlaces {
    async fn next_place(&mut self) -> Result<Option<Place>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .map_err(|e| OntofillError::PlaceSource(e.to_string()))?
        {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Shared access
// ============================================================================

struct SharedInner {
    source: Box<dyn PlaceSource>,
    exhausted: bool,
}

/// A place source safe to pull from concurrently.
///
/// Pulls are serialized by a mutex, so no place is handed out twice and none
/// is skipped. Once the source returns `None` or fails it is never polled
/// again.
pub struct SharedPlaces {
    inner: Mutex<SharedInner>,
}

impl SharedPlaces {
    pub fn new(source: Box<dyn PlaceSource>) -> Self {
        Self {
            inner: Mutex::new(SharedInner {
                source,
                exhausted: false,
            }),
        }
    }

    /// Next place for the calling worker. A source error is returned once;
    /// later pulls see an exhausted source.
    pub async fn pull(&self) -> Result<Option<Place>> {
        let mut inner = self.inner.lock().await;
        if inner.exhausted {
            return Ok(None);
        }

        match inner.source.next_place().await {
            Ok(Some(place)) => Ok(Some(place)),
            Ok(None) => {
                inner.exhausted = true;
                Ok(None)
            }
            Err(e) => {
                inner.exhausted = true;
                Err(e)
            }
        }
    }
}
