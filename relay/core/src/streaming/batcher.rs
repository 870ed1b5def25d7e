//! Stream Batcher
//!
//! Coalesces a live fragment stream into coarser batches under a dual
//! trigger: a batch is cut as soon as it holds `max_fragments` fragments or
//! `max_delay` has passed since its first fragment arrived, whichever comes
//! first.
//!
//! ```text
//!  fragments  a b c ─ ─ ─ ─ ─ ─ ─ d e f g h i j k l m n ─ ┤end
//!             └─────── T ───────┘ └──────── N ────────┘ └┘
//!  batches    [a b c]             [d .. m]              [n] End
//! ```
//!
//! When the source ends the batcher flushes whatever is pending, then yields
//! [`Batch::End`] exactly once, even for a stream that produced nothing.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;

/// Batch trigger thresholds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Cut a batch once it holds this many fragments
    pub max_fragments: usize,
    /// Cut a batch this long after its first fragment arrived
    pub max_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_fragments: 10,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// One unit of batcher output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Batch {
    /// Fragments in arrival order
    Content(Vec<String>),
    /// The source is exhausted; emitted once, after all content
    End,
}

impl Batch {
    /// Concatenated body; empty for the terminator
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Content(fragments) => fragments.concat(),
            Self::End => String::new(),
        }
    }

    /// Content that is not worth publishing: no fragments, or only
    /// whitespace once joined
    ///
    /// The terminator is never trivial.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        match self {
            Self::Content(fragments) => fragments.iter().all(|f| f.trim().is_empty()),
            Self::End => false,
        }
    }

    /// Whether this is the terminator
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Number of fragments carried
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Content(fragments) => fragments.len(),
            Self::End => 0,
        }
    }

    /// Whether no fragments are carried
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-pass batching adapter over a fragment stream
pub struct StreamBatcher<S> {
    source: Option<S>,
    config: BatchConfig,
    pending: Vec<String>,
    deadline: Option<Instant>,
    ended: bool,
}

impl<S> std::fmt::Debug for StreamBatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBatcher")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("source_open", &self.source.is_some())
            .field("ended", &self.ended)
            .finish()
    }
}

impl<S> StreamBatcher<S>
where
    S: Stream<Item = String> + Unpin,
{
    /// Wrap a fragment stream
    pub fn new(source: S, config: BatchConfig) -> Self {
        Self {
            source: Some(source),
            config: BatchConfig {
                max_fragments: config.max_fragments.max(1),
                ..config
            },
            pending: Vec::with_capacity(config.max_fragments.max(1)),
            deadline: None,
            ended: false,
        }
    }

    /// The effective trigger thresholds
    #[must_use]
    pub fn config(&self) -> BatchConfig {
        self.config
    }

    /// Pull the next batch
    ///
    /// Returns `None` once the terminator has been handed out.
    pub async fn next_batch(&mut self) -> Option<Batch> {
        loop {
            let Some(source) = self.source.as_mut() else {
                return self.drain();
            };

            let next = match self.deadline {
                None => source.next().await,
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        () = tokio::time::sleep_until(deadline) => {
                            return Some(self.cut());
                        }
                        next = source.next() => next,
                    }
                }
            };

            match next {
                Some(fragment) => {
                    if self.pending.is_empty() {
                        self.deadline = Some(Instant::now() + self.config.max_delay);
                    }
                    self.pending.push(fragment);
                    if self.pending.len() >= self.config.max_fragments {
                        return Some(self.cut());
                    }
                }
                None => self.source = None,
            }
        }
    }

    /// Consume the batcher as a stream of batches, terminator included
    pub fn into_stream(self) -> impl Stream<Item = Batch> {
        futures::stream::unfold(self, |mut batcher| async move {
            batcher.next_batch().await.map(|batch| (batch, batcher))
        })
    }

    fn cut(&mut self) -> Batch {
        self.deadline = None;
        let capacity = self.config.max_fragments;
        Batch::Content(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(capacity),
        ))
    }

    fn drain(&mut self) -> Option<Batch> {
        if !self.pending.is_empty() {
            return Some(self.cut());
        }
        if self.ended {
            return None;
        }
        self.ended = true;
        Some(Batch::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn fragments(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn batcher_over(items: &[&str], config: BatchConfig) -> StreamBatcher<impl Stream<Item = String> + Unpin> {
        StreamBatcher::new(futures::stream::iter(fragments(items)), config)
    }

    #[test]
    fn test_batch_body_and_triviality() {
        let batch = Batch::Content(fragments(&["Hel", "lo", " world"]));
        assert_eq!(batch.body(), "Hello world");
        assert!(!batch.is_trivial());
        assert_eq!(batch.len(), 3);

        assert!(Batch::Content(Vec::new()).is_trivial());
        assert!(Batch::Content(fragments(&[" ", "\n", "\t"])).is_trivial());
        assert!(!Batch::End.is_trivial());
        assert!(Batch::End.is_end());
        assert_eq!(Batch::End.body(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_trigger_flushes_without_waiting() {
        let items: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let (tx, rx) = mpsc::channel(16);
        for item in items.clone() {
            tx.send(item).await.unwrap();
        }
        let mut batcher = StreamBatcher::new(ReceiverStream::new(rx), BatchConfig::default());

        let start = Instant::now();
        let batch = batcher.next_batch().await.unwrap();
        assert_eq!(batch, Batch::Content(items));
        assert_eq!(Instant::now(), start);

        drop(tx);
        assert_eq!(batcher.next_batch().await, Some(Batch::End));
        assert_eq!(batcher.next_batch().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_trigger_cuts_partial_batch() {
        let (tx, rx) = mpsc::channel(16);
        for item in ["a", "b", "c"] {
            tx.send(item.to_string()).await.unwrap();
        }
        let mut batcher = StreamBatcher::new(ReceiverStream::new(rx), BatchConfig::default());

        let start = Instant::now();
        let batch = batcher.next_batch().await.unwrap();
        assert_eq!(batch, Batch::Content(fragments(&["a", "b", "c"])));
        assert_eq!(Instant::now() - start, Duration::from_secs(5));

        // The timer restarts only with the next batch's first fragment
        tokio::time::advance(Duration::from_secs(60)).await;
        tx.send("d".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(batcher.next_batch().await, Some(Batch::Content(fragments(&["d"]))));
        assert_eq!(batcher.next_batch().await, Some(Batch::End));
    }

    #[tokio::test]
    async fn test_end_flushes_partial_then_terminates_once() {
        let mut batcher = batcher_over(&["x", "y"], BatchConfig::default());
        assert_eq!(batcher.next_batch().await, Some(Batch::Content(fragments(&["x", "y"]))));
        assert_eq!(batcher.next_batch().await, Some(Batch::End));
        assert_eq!(batcher.next_batch().await, None);
        assert_eq!(batcher.next_batch().await, None);
    }

    #[tokio::test]
    async fn test_empty_stream_still_terminates() {
        let batches: Vec<Batch> = batcher_over(&[], BatchConfig::default())
            .into_stream()
            .collect()
            .await;
        assert_eq!(batches, vec![Batch::End]);
    }

    #[tokio::test]
    async fn test_batches_preserve_fragment_order() {
        let items: Vec<String> = (0..25).map(|i| format!("f{i}")).collect();
        let config = BatchConfig {
            max_fragments: 10,
            max_delay: Duration::from_secs(5),
        };
        let batches: Vec<Batch> = StreamBatcher::new(futures::stream::iter(items.clone()), config)
            .into_stream()
            .collect()
            .await;

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, [10, 10, 5, 0]);
        assert!(batches.last().unwrap().is_end());

        let rejoined: Vec<String> = batches
            .into_iter()
            .flat_map(|b| match b {
                Batch::Content(f) => f,
                Batch::End => Vec::new(),
            })
            .collect();
        assert_eq!(rejoined, items);
    }

    #[tokio::test]
    async fn test_zero_max_fragments_is_clamped() {
        let config = BatchConfig {
            max_fragments: 0,
            max_delay: Duration::from_secs(1),
        };
        let mut batcher = batcher_over(&["a", "b"], config);
        assert_eq!(batcher.config().max_fragments, 1);
        assert_eq!(batcher.next_batch().await.unwrap().len(), 1);
    }
}
