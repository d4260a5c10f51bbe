//! The snapshot feed: an append-only sequence of tick summaries.
//!
//! The scheduler publishes one [`TickSummary`] per applied tick into a
//! bounded buffer. A single [`FeedReader`] consumes the buffer at its own
//! pace. What happens when the buffer is full is governed by
//! [`OverflowPolicy`]:
//!
//! - [`OverflowPolicy::DropOldest`] -- the publisher never waits; the oldest
//!   unread summary is discarded and counted
//! - [`OverflowPolicy::Block`] -- the publisher waits until the reader frees
//!   a slot
//!
//! If the reader has gone away, published summaries are discarded so the
//! scheduler is never held up by a consumer that no longer exists.
//!
//! Sinks implement [`SnapshotSink`] and are driven by [`drain_feed`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tally_types::TickSummary;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// What the publisher does when the feed buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest unread summary.
    #[default]
    DropOldest,
    /// Wait for the reader to catch up.
    Block,
}

#[derive(Debug)]
struct Buffer {
    entries: VecDeque<TickSummary>,
    capacity: usize,
    dropped: u64,
    closed: bool,
    reader_gone: bool,
}

#[derive(Debug)]
struct Shared {
    buffer: Mutex<Buffer>,
    readable: Notify,
    writable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a feed holding at most `capacity` unread summaries.
///
/// A `capacity` of zero is treated as one.
pub fn snapshot_feed(capacity: usize, policy: OverflowPolicy) -> (FeedPublisher, FeedReader) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        buffer: Mutex::new(Buffer {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
            closed: false,
            reader_gone: false,
        }),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        FeedPublisher {
            shared: Arc::clone(&shared),
            policy,
        },
        FeedReader {
            shared,
            resume_from: None,
        },
    )
}

/// Writing half of the feed. Owned by the scheduler.
///
/// Dropping the publisher closes the feed.
#[derive(Debug)]
pub struct FeedPublisher {
    shared: Arc<Shared>,
    policy: OverflowPolicy,
}

impl FeedPublisher {
    /// Append a summary to the feed.
    ///
    /// Under [`OverflowPolicy::Block`] this waits while the buffer is full.
    pub async fn publish(&self, summary: TickSummary) {
        loop {
            {
                let mut buffer = self.shared.lock();
                if buffer.reader_gone || buffer.closed {
                    debug!(tick = summary.tick, "Feed has no reader, summary discarded");
                    return;
                }
                if buffer.entries.len() < buffer.capacity {
                    buffer.entries.push_back(summary);
                    drop(buffer);
                    self.shared.readable.notify_one();
                    return;
                }
                if self.policy == OverflowPolicy::DropOldest {
                    let evicted = buffer.entries.pop_front().map(|s| s.tick);
                    buffer.dropped = buffer.dropped.saturating_add(1);
                    let dropped = buffer.dropped;
                    buffer.entries.push_back(summary);
                    drop(buffer);
                    warn!(evicted_tick = ?evicted, dropped, "Feed full, dropped oldest summary");
                    self.shared.readable.notify_one();
                    return;
                }
            }
            self.shared.writable.notified().await;
        }
    }

    /// Close the feed. The reader drains what is buffered, then sees the end.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.readable.notify_one();
    }

    /// Number of summaries discarded by [`OverflowPolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }

    /// The configured overflow policy.
    pub const fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl Drop for FeedPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading half of the feed.
#[derive(Debug)]
pub struct FeedReader {
    shared: Arc<Shared>,
    resume_from: Option<u64>,
}

impl FeedReader {
    /// Skip every summary whose tick is below `tick`.
    ///
    /// Used by a consumer that has already processed earlier ticks and is
    /// reattaching after a restart.
    ///
    /// This only filters what is still buffered or published later. Summaries
    /// already read, or evicted under [`OverflowPolicy::DropOldest`], are not
    /// kept and cannot be replayed. A consumer that needs history reads it
    /// from a persisted output such as the engine's series file.
    pub const fn resume_from(&mut self, tick: u64) {
        self.resume_from = Some(tick);
    }

    /// Wait for the next summary. Returns `None` once the feed is closed and
    /// drained.
    pub async fn next(&mut self) -> Option<TickSummary> {
        loop {
            match self.poll_buffer() {
                Ok(summary) => return summary,
                Err(()) => self.shared.readable.notified().await,
            }
        }
    }

    /// `Ok(Some)` for an entry, `Ok(None)` at end of feed, `Err` if empty.
    fn poll_buffer(&self) -> Result<Option<TickSummary>, ()> {
        let mut buffer = self.shared.lock();
        while let Some(summary) = buffer.entries.pop_front() {
            self.shared.writable.notify_one();
            if self.resume_from.is_none_or(|from| summary.tick >= from) {
                return Ok(Some(summary));
            }
        }
        if buffer.closed {
            Ok(None)
        } else {
            Err(())
        }
    }
}

impl Drop for FeedReader {
    fn drop(&mut self) {
        self.shared.lock().reader_gone = true;
        self.shared.writable.notify_one();
    }
}

/// Error reported by a [`SnapshotSink`].
#[derive(Debug, thiserror::Error)]
#[error("sink error: {message}")]
pub struct SinkError {
    /// Description of the failure.
    pub message: String,
}

impl SinkError {
    /// Create a sink error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A consumer of tick summaries.
pub trait SnapshotSink: Send {
    /// Called once per summary, in tick order.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the summary could not be recorded. The
    /// failure is logged and the feed keeps flowing.
    fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError>;

    /// Called once after the feed closes.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if flushing fails.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: SnapshotSink + ?Sized> SnapshotSink for Box<S> {
    fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
        (**self).on_tick(summary)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

/// Fans each summary out to several sinks in order.
impl SnapshotSink for Vec<Box<dyn SnapshotSink>> {
    fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in self.iter_mut() {
            if let Err(e) = sink.on_tick(summary) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in self.iter_mut() {
            if let Err(e) = sink.finish() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Logs every tick's cumulative counts at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SnapshotSink for LogSink {
    fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
        let counts = summary
            .snapshot
            .entries
            .iter()
            .map(|entry| format!("{}={}", entry.category, entry.count))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            tick = summary.tick,
            events = summary.events,
            tokens = summary.tokens,
            counts = %counts,
            "Tick applied"
        );
        Ok(())
    }
}

/// Pump `reader` into `sink` until the feed closes.
///
/// Returns how many summaries were delivered.
pub async fn drain_feed<S: SnapshotSink>(mut reader: FeedReader, mut sink: S) -> u64 {
    let mut delivered: u64 = 0;
    while let Some(summary) = reader.next().await {
        if let Err(e) = sink.on_tick(&summary) {
            warn!(tick = summary.tick, error = %e, "Sink failed to record tick");
        }
        delivered = delivered.saturating_add(1);
    }
    if let Err(e) = sink.finish() {
        warn!(error = %e, "Sink failed to finish");
    }
    debug!(delivered, "Feed drained");
    delivered
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tally_types::{CategoryCount, Snapshot};

    use super::*;

    fn summary(tick: u64) -> TickSummary {
        TickSummary {
            tick,
            events: 0,
            tokens: 0,
            delta: Vec::new(),
            snapshot: Snapshot {
                entries: vec![CategoryCount::new("positive", tick)],
            },
            applied_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct Recording {
        ticks: Arc<Mutex<Vec<u64>>>,
        finished: Arc<Mutex<bool>>,
    }

    impl SnapshotSink for Recording {
        fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
            self.ticks.lock().unwrap().push(summary.tick);
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn reader_sees_summaries_in_order_then_end() {
        let (publisher, mut reader) = snapshot_feed(8, OverflowPolicy::Block);
        for tick in 0..3 {
            publisher.publish(summary(tick)).await;
        }
        drop(publisher);
        let mut ticks = Vec::new();
        while let Some(s) = reader.next().await {
            ticks.push(s.tick);
        }
        assert_eq!(ticks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn drop_oldest_never_waits_and_counts_drops() {
        let (publisher, mut reader) = snapshot_feed(2, OverflowPolicy::DropOldest);
        for tick in 0..5 {
            publisher.publish(summary(tick)).await;
        }
        assert_eq!(publisher.dropped(), 3);
        publisher.close();
        assert_eq!(reader.next().await.map(|s| s.tick), Some(3));
        assert_eq!(reader.next().await.map(|s| s.tick), Some(4));
        assert_eq!(reader.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn block_waits_for_the_reader() {
        let (publisher, mut reader) = snapshot_feed(1, OverflowPolicy::Block);
        publisher.publish(summary(0)).await;

        let blocked = tokio::spawn(async move {
            publisher.publish(summary(1)).await;
            publisher
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        assert_eq!(reader.next().await.map(|s| s.tick), Some(0));
        let publisher = blocked.await.unwrap();
        assert_eq!(publisher.dropped(), 0);
        assert_eq!(reader.next().await.map(|s| s.tick), Some(1));
    }

    #[tokio::test]
    async fn publish_without_reader_does_not_block() {
        let (publisher, reader) = snapshot_feed(1, OverflowPolicy::Block);
        drop(reader);
        publisher.publish(summary(0)).await;
        publisher.publish(summary(1)).await;
    }

    #[tokio::test]
    async fn resume_from_skips_earlier_ticks() {
        let (publisher, mut reader) = snapshot_feed(8, OverflowPolicy::Block);
        reader.resume_from(2);
        for tick in 0..4 {
            publisher.publish(summary(tick)).await;
        }
        publisher.close();
        assert_eq!(reader.next().await.map(|s| s.tick), Some(2));
        assert_eq!(reader.next().await.map(|s| s.tick), Some(3));
        assert_eq!(reader.next().await, None);
    }

    #[tokio::test]
    async fn drain_feed_delivers_everything_and_finishes() {
        let (publisher, reader) = snapshot_feed(4, OverflowPolicy::Block);
        let sink = Recording::default();
        let ticks = Arc::clone(&sink.ticks);
        let finished = Arc::clone(&sink.finished);

        let drain = tokio::spawn(drain_feed(reader, sink));
        for tick in 0..6 {
            publisher.publish(summary(tick)).await;
        }
        drop(publisher);

        assert_eq!(drain.await.unwrap(), 6);
        assert_eq!(*ticks.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert!(*finished.lock().unwrap());
    }

    #[tokio::test]
    async fn fan_out_reaches_every_sink() {
        let first = Recording::default();
        let second = Recording::default();
        let first_ticks = Arc::clone(&first.ticks);
        let second_ticks = Arc::clone(&second.ticks);
        let sinks: Vec<Box<dyn SnapshotSink>> = vec![Box::new(first), Box::new(second)];

        let (publisher, reader) = snapshot_feed(4, OverflowPolicy::Block);
        publisher.publish(summary(0)).await;
        drop(publisher);
        drain_feed(reader, sinks).await;

        assert_eq!(*first_ticks.lock().unwrap(), vec![0]);
        assert_eq!(*second_ticks.lock().unwrap(), vec![0]);
    }

    #[test]
    fn overflow_policy_uses_snake_case() {
        let policy: OverflowPolicy = serde_json::from_str("\"drop_oldest\"").unwrap();
        assert_eq!(policy, OverflowPolicy::DropOldest);
        let policy: OverflowPolicy = serde_json::from_str("\"block\"").unwrap();
        assert_eq!(policy, OverflowPolicy::Block);
    }
}
