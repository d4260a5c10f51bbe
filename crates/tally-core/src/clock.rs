//! Wall-clock tick boundaries.
//!
//! Tick `n` of a run covers the half-open interval
//! `[start + n * duration, start + (n + 1) * duration)`. Boundaries are
//! derived by adding whole durations to the previous boundary, never from
//! "now", so processing latency does not make ticks drift.
//!
//! The clock also carries the absolute tick index. A run resumed from a
//! checkpoint starts its first interval at the checkpointed index plus one.

use std::time::Duration;

use tokio::time::Instant;

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter or boundary instant would overflow.
    #[error("tick clock overflow: cannot advance beyond tick {tick}")]
    Overflow {
        /// The tick that could not be advanced past.
        tick: u64,
    },

    /// Invalid clock parameters (e.g. a zero tick duration).
    #[error("invalid tick clock: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong.
        reason: String,
    },
}

/// Tracks the in-flight tick and where it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    /// Length of every tick.
    duration: Duration,

    /// Absolute index of the in-flight tick.
    tick: u64,

    /// Exclusive end of the in-flight tick.
    boundary: Instant,
}

impl TickClock {
    /// Start a clock whose first tick, `first_tick`, begins at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `duration` is zero, or
    /// [`ClockError::Overflow`] if the first boundary is unrepresentable.
    pub fn start(start: Instant, duration: Duration, first_tick: u64) -> Result<Self, ClockError> {
        if duration.is_zero() {
            return Err(ClockError::InvalidConfig {
                reason: "tick duration must be greater than zero".to_owned(),
            });
        }
        let boundary = start
            .checked_add(duration)
            .ok_or(ClockError::Overflow { tick: first_tick })?;
        Ok(Self {
            duration,
            tick: first_tick,
            boundary,
        })
    }

    /// Absolute index of the in-flight tick.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Length of one tick.
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Exclusive end of the in-flight tick.
    pub const fn boundary(&self) -> Instant {
        self.boundary
    }

    /// Whether an arrival at `at` belongs to the in-flight tick or earlier.
    pub fn is_before_boundary(&self, at: Instant) -> bool {
        at < self.boundary
    }

    /// Move to the next tick. Returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Overflow`] if the index or boundary would
    /// overflow.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        let overflow = ClockError::Overflow { tick: self.tick };
        let tick = self.tick.checked_add(1).ok_or_else(|| overflow.clone())?;
        let boundary = self.boundary.checked_add(self.duration).ok_or(overflow)?;
        self.tick = tick;
        self.boundary = boundary;
        Ok(tick)
    }
}
