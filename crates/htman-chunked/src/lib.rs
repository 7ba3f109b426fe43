// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Time-sliced async traversal of an index range.
//!
//! [`ChunkedIterator`] walks `[start, end)` on the current task, awaiting a
//! processor for each index. Whenever more than the yield interval has passed
//! since the last checkpoint it tells the observer and yields to the
//! runtime, so a long traversal shares its thread with other tasks.
//! Dropping the future cancels the traversal.

use std::future::Future;
use std::ops::Range;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

/// One 60 Hz frame.
pub const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_micros(16_600);

/// Why a traversal stopped early.
#[derive(Debug, Error)]
pub enum ChunkError<E> {
    /// The processor failed; nothing after `index` was processed.
    #[error("processor failed at index {index}")]
    Processor {
        /// Index whose processing failed.
        index: usize,
        /// The processor's error.
        #[source]
        source: E,
    },
    /// `start > end`.
    #[error("invalid range {start}..{end}")]
    InvalidRange {
        /// Requested start.
        start: usize,
        /// Requested end.
        end: usize,
    },
}

/// Callbacks around a traversal. Every method defaults to doing nothing.
pub trait ChunkObserver<E> {
    /// About to yield; `index` is the next index to be processed.
    fn on_yield(&mut self, index: usize) -> impl Future<Output = ()> {
        let _ = index;
        async {}
    }

    /// The processor failed at `index`. `on_finish` will not be called.
    fn on_error(&mut self, index: usize, error: &E) -> impl Future<Output = ()> {
        let _ = (index, error);
        async {}
    }

    /// Every index was processed.
    fn on_finish(&mut self, processed: usize) -> impl Future<Output = ()> {
        let _ = processed;
        async {}
    }
}

/// Observer that ignores everything.
impl<E> ChunkObserver<E> for () {}

/// A range plus a yield interval.
#[derive(Debug, Clone)]
pub struct ChunkedIterator {
    range: Range<usize>,
    interval: Duration,
}

impl ChunkedIterator {
    /// Traverse `range` with [`DEFAULT_YIELD_INTERVAL`].
    pub fn new(range: Range<usize>) -> Self {
        Self {
            range,
            interval: DEFAULT_YIELD_INTERVAL,
        }
    }

    /// Replace the yield interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The range to traverse.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Time allowed between yields.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `processor` for every index in order. Returns how many indices
    /// were processed.
    pub async fn run<P, Fut, E, O>(
        &self,
        mut processor: P,
        observer: &mut O,
    ) -> Result<usize, ChunkError<E>>
    where
        P: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        O: ChunkObserver<E>,
    {
        let Range { start, end } = self.range;
        if start > end {
            warn!(start, end, "chunked iteration over an inverted range");
            return Err(ChunkError::InvalidRange { start, end });
        }

        let mut checkpoint = Instant::now();
        for index in start..end {
            if checkpoint.elapsed() > self.interval {
                trace!(index, "yielding");
                observer.on_yield(index).await;
                tokio::task::yield_now().await;
                checkpoint = Instant::now();
            }
            if let Err(source) = processor(index).await {
                warn!(index, "chunk processor failed");
                observer.on_error(index, &source).await;
                return Err(ChunkError::Processor { index, source });
            }
        }

        let processed = end - start;
        debug!(processed, "chunked iteration finished");
        observer.on_finish(processed).await;
        Ok(processed)
    }
}
