//! Run control shared between the scheduler and whoever may stop it.
//!
//! [`RunControl`] is wrapped in [`Arc`](std::sync::Arc) and handed to both
//! the scheduler loop and external stoppers (signal handlers, tests, an
//! embedding application). Stop requests are cooperative: the scheduler
//! only looks at them at tick boundaries, after the in-flight tick has been
//! applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Reason why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// A stop was requested.
    StopRequested,
    /// The configured maximum run duration elapsed.
    MaxDurationReached,
    /// A finite source reported end of stream.
    SourceExhausted,
    /// The source failed past its retry budget.
    SourceFailed {
        /// Description of the last source error.
        message: String,
    },
}

/// Shared stop and time-limit state for one run.
#[derive(Debug)]
pub struct RunControl {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes the scheduler when a stop is requested.
    stop_notify: Notify,

    /// When the run started.
    started_at: Instant,

    /// Maximum run length (`None` = run until stopped).
    max_run_duration: Option<Duration>,
}

impl RunControl {
    /// Create control state for a run starting now.
    ///
    /// A `max_run_duration` of `None` lets the run continue until stopped.
    pub fn new(max_run_duration: Option<Duration>) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            started_at: Instant::now(),
            max_run_duration,
        }
    }

    /// Create control state from a seconds setting where 0 means unlimited.
    pub fn from_max_seconds(max_run_seconds: u64) -> Self {
        let limit = (max_run_seconds > 0).then(|| Duration::from_secs(max_run_seconds));
        Self::new(limit)
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a graceful stop at the next tick boundary.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    // -----------------------------------------------------------------------
    // Time limit
    // -----------------------------------------------------------------------

    /// When the run started.
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The configured maximum run length.
    pub const fn max_run_duration(&self) -> Option<Duration> {
        self.max_run_duration
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the maximum run duration has elapsed.
    ///
    /// Always `false` when running until stopped.
    pub fn time_limit_reached(&self) -> bool {
        self.max_run_duration
            .is_some_and(|limit| self.elapsed() >= limit)
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn initial_state_is_running() {
        let control = RunControl::default();
        assert!(!control.is_stop_requested());
        assert!(!control.time_limit_reached());
    }

    #[test]
    fn stop_request() {
        let control = RunControl::default();
        control.request_stop();
        assert!(control.is_stop_requested());
    }

    #[test]
    fn zero_seconds_means_unlimited() {
        let control = RunControl::from_max_seconds(0);
        assert_eq!(control.max_run_duration(), None);
        let control = RunControl::from_max_seconds(100);
        assert_eq!(control.max_run_duration(), Some(Duration::from_secs(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_follows_tokio_clock() {
        let control = RunControl::new(Some(Duration::from_secs(5)));
        assert!(!control.time_limit_reached());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(control.time_limit_reached());
    }

    #[tokio::test]
    async fn stopped_resolves_after_request() {
        let control = Arc::new(RunControl::default());
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.stopped().await })
        };
        control.request_stop();
        assert!(waiter.await.is_ok());
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_when_already_requested() {
        let control = RunControl::default();
        control.request_stop();
        control.stopped().await;
    }
}
