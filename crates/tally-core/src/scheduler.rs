//! The tick scheduler: turns a stream of events into a sequence of
//! cumulative snapshots.
//!
//! [`Scheduler::run`] drives one run through its lifecycle:
//!
//! ```text
//! Idle -> Running -> StoppedGraceful | StoppedTimeout | Failed
//! ```
//!
//! While running, a separate intake task stamps each event with its arrival
//! instant. The scheduler sorts arrivals into buckets by tick boundary, and
//! at every boundary it:
//!
//! 1. closes the in-flight bucket and reduces it to a delta
//! 2. applies the delta to the [`StateStore`] under the tick's index
//! 3. publishes a [`TickSummary`] to the feed and the `latest` watch
//! 4. writes a checkpoint when one is due
//!
//! Stop requests, the run time limit, and source exhaustion are only acted
//! on after step 4, so a tick is either fully applied or not at all. A
//! source failure discards the in-flight bucket instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tally_types::{Event, RunId, Snapshot, TickSummary};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::classifier::Classifier;
use crate::clock::{ClockError, TickClock};
use crate::control::{EndReason, RunControl};
use crate::feed::FeedPublisher;
use crate::intake::{Arrival, IntakeMessage, RetryPolicy, run_intake};
use crate::reducer::reduce_batch;
use crate::source::{EventSource, SourceError};
use crate::store::{StateStore, StoreError};

/// Lifecycle state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Constructed, not yet running.
    Idle,
    /// Processing ticks.
    Running,
    /// Stopped on request or because the source ended.
    StoppedGraceful,
    /// Stopped because the maximum run duration elapsed.
    StoppedTimeout,
    /// Stopped because the source failed past its retry budget.
    Failed,
}

impl SchedulerState {
    /// Whether no further ticks can be issued from this state.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::StoppedGraceful | Self::StoppedTimeout | Self::Failed
        )
    }
}

impl From<&EndReason> for SchedulerState {
    fn from(reason: &EndReason) -> Self {
        match reason {
            EndReason::StopRequested | EndReason::SourceExhausted => Self::StoppedGraceful,
            EndReason::MaxDurationReached => Self::StoppedTimeout,
            EndReason::SourceFailed { .. } => Self::Failed,
        }
    }
}

/// Errors that abort a run outright.
///
/// Source trouble is not an error here: it ends the run in
/// [`SchedulerState::Failed`] with a normal [`RunOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The classifier and the store were built for different categories.
    #[error("classifier categories {classifier:?} do not match store categories {store:?}")]
    CategoryMismatch {
        /// Categories the classifier assigns.
        classifier: Vec<String>,
        /// Categories the store accumulates.
        store: Vec<String>,
    },

    /// The state store rejected a delta.
    #[error("state store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The tick clock could not advance.
    #[error("tick clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Length of one tick.
    pub tick_duration: Duration,
    /// Write a checkpoint after every this many applied ticks.
    pub checkpoint_interval_ticks: u64,
    /// Capacity of the channel between intake and the scheduler.
    pub intake_capacity: usize,
    /// Retry budget for transient source failures.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_secs(10),
            checkpoint_interval_ticks: 1,
            intake_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub struct RunOutcome {
    /// Identifier of the run, as it appears in logs.
    pub run_id: RunId,
    /// Terminal state reached.
    pub state: SchedulerState,
    /// Why the run ended.
    pub end_reason: EndReason,
    /// Ticks applied during this run.
    pub ticks_run: u64,
    /// Index of the last applied tick, including ticks from earlier runs.
    pub last_tick: Option<u64>,
    /// Cumulative counts at the end of the run.
    pub final_snapshot: Snapshot,
    /// Checkpoint writes that failed during the run.
    pub checkpoint_failures: u64,
    /// The store, handed back so a caller can inspect or reuse it.
    pub store: StateStore,
}

/// Drives ticks for one run. Consumed by [`run`](Self::run).
#[derive(Debug)]
pub struct Scheduler {
    run_id: RunId,
    config: SchedulerConfig,
    classifier: Classifier,
    store: StateStore,
    control: Arc<RunControl>,
    publisher: FeedPublisher,
    latest: watch::Sender<Option<TickSummary>>,
    checkpoints: Option<CheckpointStore>,
    state: SchedulerState,
    ticks_run: u64,
    checkpoint_stale: bool,
    checkpoint_failures: u64,
}

impl Scheduler {
    /// Create an idle scheduler.
    ///
    /// `store` may be fresh or restored from a checkpoint; the first tick of
    /// the run is `store.next_tick()`.
    pub fn new(
        config: SchedulerConfig,
        classifier: Classifier,
        store: StateStore,
        control: Arc<RunControl>,
        publisher: FeedPublisher,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            run_id: RunId::new(),
            config,
            classifier,
            store,
            control,
            publisher,
            latest,
            checkpoints: None,
            state: SchedulerState::Idle,
            ticks_run: 0,
            checkpoint_stale: false,
            checkpoint_failures: 0,
        }
    }

    /// Persist checkpoints to `checkpoints` during the run.
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: CheckpointStore) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Identifier of this run.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// Subscribe to the most recently applied summary.
    pub fn latest(&self) -> watch::Receiver<Option<TickSummary>> {
        self.latest.subscribe()
    }

    /// Run until a stop request, the time limit, source exhaustion, or
    /// source failure.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the classifier and store disagree on
    /// categories, or if the store or clock reject a tick. Source failures
    /// are reported through [`RunOutcome::state`] instead.
    pub async fn run<S>(mut self, source: S) -> Result<RunOutcome, SchedulerError>
    where
        S: EventSource + 'static,
    {
        if self.classifier.categories() != self.store.categories() {
            return Err(SchedulerError::CategoryMismatch {
                classifier: self.classifier.categories().names().to_vec(),
                store: self.store.categories().names().to_vec(),
            });
        }

        let first_tick = self.store.next_tick()?;
        let mut clock = TickClock::start(Instant::now(), self.config.tick_duration, first_tick)?;

        let (tx, mut rx) = mpsc::channel(self.config.intake_capacity.max(1));
        let intake = tokio::spawn(run_intake(source, tx, self.config.retry.clone()));

        info!(
            run_id = %self.run_id,
            first_tick,
            tick_ms = u64::try_from(self.config.tick_duration.as_millis()).unwrap_or(u64::MAX),
            max_run_seconds = self.control.max_run_duration().map(|d| d.as_secs()),
            "Scheduler starting"
        );
        self.transition(SchedulerState::Running);

        let result = self.run_ticks(&mut clock, &mut rx).await;
        intake.abort();

        let end_reason = match result {
            Ok(reason) => reason,
            Err(e) => {
                self.transition(SchedulerState::Failed);
                self.write_final_checkpoint().await;
                self.publisher.close();
                return Err(e);
            }
        };

        self.write_final_checkpoint().await;
        self.transition(SchedulerState::from(&end_reason));
        self.publisher.close();

        Ok(RunOutcome {
            run_id: self.run_id,
            state: self.state,
            end_reason,
            ticks_run: self.ticks_run,
            last_tick: self.store.last_applied_tick(),
            final_snapshot: self.store.snapshot(),
            checkpoint_failures: self.checkpoint_failures,
            store: self.store,
        })
    }

    async fn run_ticks(
        &mut self,
        clock: &mut TickClock,
        rx: &mut mpsc::Receiver<IntakeMessage>,
    ) -> Result<EndReason, SchedulerError> {
        let control = Arc::clone(&self.control);
        let mut inbox = Inbox::default();

        loop {
            let boundary = clock.boundary();
            inbox.promote(boundary);

            let mut stop_seen = control.is_stop_requested();
            while inbox.failure.is_none() {
                tokio::select! {
                    biased;
                    () = tokio::time::sleep_until(boundary) => break,
                    message = rx.recv(), if inbox.open => inbox.accept(message, boundary),
                    () = control.stopped(), if !stop_seen => {
                        stop_seen = true;
                        debug!(tick = clock.tick(), "Stop requested, finishing in-flight tick");
                    }
                }
            }
            inbox.drain_ready(rx, boundary);

            if let Some(err) = inbox.failure.take() {
                let discarded = inbox.current.len();
                inbox.current.clear();
                warn!(
                    tick = clock.tick(),
                    discarded,
                    error = %err,
                    "Source failed, in-flight tick discarded"
                );
                return Ok(EndReason::SourceFailed {
                    message: err.to_string(),
                });
            }

            let bucket = std::mem::take(&mut inbox.current);
            self.apply_tick(clock.tick(), &bucket).await?;

            if control.is_stop_requested() {
                info!(tick = clock.tick(), "Stop request honoured");
                return Ok(EndReason::StopRequested);
            }
            if control.time_limit_reached() {
                info!(
                    tick = clock.tick(),
                    elapsed_ms = u64::try_from(control.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Run time limit reached"
                );
                return Ok(EndReason::MaxDurationReached);
            }
            if inbox.exhausted && inbox.carried.is_empty() {
                info!(tick = clock.tick(), "Source exhausted");
                return Ok(EndReason::SourceExhausted);
            }

            clock.advance()?;
        }
    }

    async fn apply_tick(&mut self, tick: u64, bucket: &[Event]) -> Result<(), SchedulerError> {
        let reduction = reduce_batch(bucket, &self.classifier);
        self.store.apply(tick, &reduction.delta)?;
        self.ticks_run = self.ticks_run.saturating_add(1);
        self.checkpoint_stale = true;

        let summary = TickSummary {
            tick,
            events: reduction.events,
            tokens: reduction.tokens,
            delta: reduction.delta.describe(self.store.categories()),
            snapshot: self.store.snapshot(),
            applied_at: Utc::now(),
        };
        debug!(
            tick,
            events = reduction.events,
            matches = reduction.delta.total(),
            "Tick reduced"
        );

        self.latest.send_replace(Some(summary.clone()));
        self.publisher.publish(summary).await;

        if self
            .ticks_run
            .checked_rem(self.config.checkpoint_interval_ticks)
            == Some(0)
        {
            self.write_checkpoint().await;
        }
        Ok(())
    }

    async fn write_checkpoint(&mut self) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        let result = match self.store.checkpoint() {
            Ok(bytes) => checkpoints.write(&bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.checkpoint_stale = false,
            Err(e) => {
                self.checkpoint_failures = self.checkpoint_failures.saturating_add(1);
                warn!(
                    tick = ?self.store.last_applied_tick(),
                    error = %e,
                    "Checkpoint write failed, continuing with in-memory state"
                );
            }
        }
    }

    async fn write_final_checkpoint(&mut self) {
        if self.checkpoint_stale {
            self.write_checkpoint().await;
        }
    }

    fn transition(&mut self, to: SchedulerState) {
        info!(run_id = %self.run_id, from = ?self.state, to = ?to, "Scheduler state changed");
        self.state = to;
    }
}

/// Log the end of a run.
pub fn log_run_end(outcome: &RunOutcome) {
    info!(
        run_id = %outcome.run_id,
        state = ?outcome.state,
        reason = ?outcome.end_reason,
        ticks_run = outcome.ticks_run,
        last_tick = ?outcome.last_tick,
        counts = ?outcome.final_snapshot.counts(),
        checkpoint_failures = outcome.checkpoint_failures,
        "Run ended"
    );
}

/// Arrivals sorted by tick, plus what intake has reported so far.
#[derive(Debug)]
struct Inbox {
    /// Events of the in-flight tick.
    current: Vec<Event>,
    /// Arrivals at or after the in-flight boundary, oldest first.
    carried: VecDeque<Arrival>,
    /// Whether intake may still send messages.
    open: bool,
    /// Intake reported end of stream.
    exhausted: bool,
    /// Intake reported a failure that has not been handled yet.
    failure: Option<SourceError>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self {
            current: Vec::new(),
            carried: VecDeque::new(),
            open: true,
            exhausted: false,
            failure: None,
        }
    }
}

impl Inbox {
    fn accept(&mut self, message: Option<IntakeMessage>, boundary: Instant) {
        match message {
            Some(IntakeMessage::Event(arrival)) => {
                if arrival.at < boundary {
                    self.current.push(arrival.event);
                } else {
                    self.carried.push_back(arrival);
                }
            }
            Some(IntakeMessage::Exhausted) => {
                self.open = false;
                self.exhausted = true;
            }
            Some(IntakeMessage::Failed(err)) => {
                self.open = false;
                self.failure = Some(err);
            }
            None => {
                self.open = false;
                self.failure = Some(SourceError::fatal("intake task ended unexpectedly"));
            }
        }
    }

    /// Take everything intake has already queued without waiting.
    fn drain_ready(&mut self, rx: &mut mpsc::Receiver<IntakeMessage>, boundary: Instant) {
        while self.open && self.failure.is_none() {
            match rx.try_recv() {
                Ok(message) => self.accept(Some(message), boundary),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.accept(None, boundary),
            }
        }
    }

    /// Move carried arrivals that belong before `boundary` into the bucket.
    fn promote(&mut self, boundary: Instant) {
        while self.carried.front().is_some_and(|a| a.at < boundary) {
            if let Some(arrival) = self.carried.pop_front() {
                self.current.push(arrival.event);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tally_types::Categories;

    use super::*;
    use crate::classifier::MembershipSet;
    use crate::feed::{OverflowPolicy, snapshot_feed};
    use crate::source::ChannelEventSource;

    fn classifier() -> Classifier {
        Classifier::new(
            Categories::sentiment(),
            &[
                MembershipSet::new(["good", "great"]),
                MembershipSet::new(["bad"]),
            ],
        )
        .unwrap()
    }

    fn arrival(text: &str, at: Instant) -> Arrival {
        Arrival {
            event: Event::new(text),
            at,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!SchedulerState::Idle.is_terminal());
        assert!(!SchedulerState::Running.is_terminal());
        assert!(SchedulerState::StoppedGraceful.is_terminal());
        assert!(SchedulerState::StoppedTimeout.is_terminal());
        assert!(SchedulerState::Failed.is_terminal());
    }

    #[test]
    fn end_reason_maps_to_terminal_state() {
        assert_eq!(
            SchedulerState::from(&EndReason::SourceExhausted),
            SchedulerState::StoppedGraceful
        );
        assert_eq!(
            SchedulerState::from(&EndReason::MaxDurationReached),
            SchedulerState::StoppedTimeout
        );
        assert_eq!(
            SchedulerState::from(&EndReason::SourceFailed {
                message: "down".to_owned()
            }),
            SchedulerState::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbox_sorts_arrivals_by_boundary() {
        let start = Instant::now();
        let boundary = start + Duration::from_secs(10);
        let mut inbox = Inbox::default();

        inbox.accept(Some(IntakeMessage::Event(arrival("early", start))), boundary);
        inbox.accept(
            Some(IntakeMessage::Event(arrival("late", boundary))),
            boundary,
        );
        assert_eq!(inbox.current, vec![Event::new("early")]);
        assert_eq!(inbox.carried.len(), 1);

        inbox.current.clear();
        inbox.promote(boundary + Duration::from_secs(10));
        assert_eq!(inbox.current, vec![Event::new("late")]);
        assert!(inbox.carried.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_intake_without_terminal_message_is_a_failure() {
        let mut inbox = Inbox::default();
        inbox.accept(None, Instant::now());
        assert!(!inbox.open);
        assert!(inbox.failure.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_categories_are_rejected() {
        let other = Categories::new(["joy", "anger"]).unwrap();
        let (publisher, _reader) = snapshot_feed(4, OverflowPolicy::Block);
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            classifier(),
            StateStore::new(other),
            Arc::new(RunControl::default()),
            publisher,
        );
        let (_tx, source) = ChannelEventSource::channel(1);
        let result = scheduler.run(source).await;
        assert!(matches!(
            result,
            Err(SchedulerError::CategoryMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn latest_tracks_the_last_applied_tick() {
        let (publisher, _reader) = snapshot_feed(4, OverflowPolicy::DropOldest);
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            classifier(),
            StateStore::new(Categories::sentiment()),
            Arc::new(RunControl::default()),
            publisher,
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let latest = scheduler.latest();
        assert!(latest.borrow().is_none());

        let (tx, source) = ChannelEventSource::channel(4);
        tx.send(Event::new("good great")).await.unwrap();
        drop(tx);

        let outcome = scheduler.run(source).await.unwrap();
        assert_eq!(outcome.state, SchedulerState::StoppedGraceful);
        let last = latest.borrow().clone().unwrap();
        assert_eq!(last.tick, 0);
        assert_eq!(last.snapshot.counts(), vec![2, 0]);
    }
}
