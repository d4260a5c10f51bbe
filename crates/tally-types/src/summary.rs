//! Per-tick output records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::counts::{CategoryCount, Snapshot};

/// What one tick produced: its delta and the cumulative snapshot after it.
///
/// The ordered sequence of summaries is the engine's visible output. Each
/// tick index appears at most once and indices only increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    /// Tick index, starting at 0 on a cold start.
    pub tick: u64,
    /// Events handed to the reducer for this tick.
    pub events: u64,
    /// Tokens examined across those events.
    pub tokens: u64,
    /// Matches per category within this tick, zero-filled.
    pub delta: Vec<CategoryCount>,
    /// Cumulative counts after applying this tick.
    pub snapshot: Snapshot,
    /// Wall-clock time the tick was applied.
    pub applied_at: DateTime<Utc>,
}
