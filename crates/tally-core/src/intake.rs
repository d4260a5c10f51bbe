//! The intake task: pulls events from a source and stamps their arrival.
//!
//! Intake runs as its own tokio task so a slow or reconnecting source never
//! stalls the tick loop. Every event is forwarded to the scheduler over a
//! bounded channel together with the instant it arrived; the scheduler uses
//! that instant, not the delivery time, to pick the event's tick.
//!
//! Transient source errors are retried with exponential backoff plus
//! jitter. When the retry budget runs out, or on a fatal error, intake
//! sends [`IntakeMessage::Failed`] and exits.

use std::time::Duration;

use rand::Rng as _;
use tally_types::Event;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::source::{EventSource, SourceError};

/// An event together with the instant it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    /// The received event.
    pub event: Event,
    /// When intake received it.
    pub at: Instant,
}

/// Messages sent from the intake task to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeMessage {
    /// A new event arrived.
    Event(Arrival),
    /// The source has no more events.
    Exhausted,
    /// The source failed for good.
    Failed(SourceError),
}

/// Retry budget for transient source failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive transient failures tolerated before giving up.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// The backoff ceiling for the given retry attempt (1-based).
    ///
    /// Doubles from `initial_backoff` and saturates at `max_backoff`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// The jittered backoff for the given retry attempt (1-based).
    ///
    /// Picks uniformly from the upper half of [`ceiling`](Self::ceiling).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let floor_ms = ceiling_ms / 2;
        Duration::from_millis(rand::rng().random_range(floor_ms..=ceiling_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Pump `source` into `tx` until it ends, fails, or the receiver goes away.
///
/// Exactly one terminal message ([`IntakeMessage::Exhausted`] or
/// [`IntakeMessage::Failed`]) is sent, unless the scheduler has already
/// dropped its receiver.
pub async fn run_intake<S: EventSource>(
    mut source: S,
    tx: mpsc::Sender<IntakeMessage>,
    retry: RetryPolicy,
) {
    let mut failures: u32 = 0;

    loop {
        match source.next_event().await {
            Ok(Some(event)) => {
                failures = 0;
                let arrival = Arrival {
                    event,
                    at: Instant::now(),
                };
                if tx.send(IntakeMessage::Event(arrival)).await.is_err() {
                    debug!("Scheduler receiver closed, stopping intake");
                    return;
                }
            }
            Ok(None) => {
                debug!("Source exhausted");
                let _ = tx.send(IntakeMessage::Exhausted).await;
                return;
            }
            Err(err) if err.is_transient() && failures < retry.max_attempts => {
                failures = failures.saturating_add(1);
                let backoff = retry.backoff(failures);
                warn!(
                    error = %err,
                    attempt = failures,
                    max_attempts = retry.max_attempts,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "Source error, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                error!(error = %err, attempts = failures, "Source failed");
                let _ = tx.send(IntakeMessage::Failed(err)).await;
                return;
            }
        }
    }
}
