//! Shared type definitions for the sentiment tally engine.
//!
//! # Modules
//!
//! - [`category`] -- The closed category enumeration and its ids
//! - [`counts`] -- Per-tick deltas, cumulative totals, and snapshots
//! - [`event`] -- Upstream text events
//! - [`ids`] -- Run identifiers
//! - [`summary`] -- Per-tick output records

pub mod category;
pub mod counts;
pub mod event;
pub mod ids;
pub mod summary;

// Re-export all public types at crate root for convenience.
pub use category::{Categories, CategoryError, CategoryId, NEGATIVE, POSITIVE};
pub use counts::{CategoryCount, CumulativeState, Delta, Snapshot};
pub use event::Event;
pub use ids::RunId;
pub use summary::TickSummary;
