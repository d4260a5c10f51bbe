//! Classification, tick scheduling, and state for the sentiment tally engine.
//!
//! Events flow through the crate in one direction:
//!
//! ```text
//! EventSource -> intake -> Scheduler -> reducer -> StateStore -> feed
//!                                                      |
//!                                                  checkpoint
//! ```
//!
//! # Modules
//!
//! - [`checkpoint`] -- Checkpoint document format and atomic file storage.
//! - [`classifier`] -- Token-to-category lookup with priority on overlap.
//! - [`clock`] -- Drift-free tick boundaries.
//! - [`config`] -- Configuration loading from `tally-config.yaml` into
//!   strongly-typed structs.
//! - [`control`] -- Stop requests and the run time limit.
//! - [`feed`] -- Bounded snapshot feed, [`SnapshotSink`] and [`LogSink`].
//! - [`intake`] -- Source polling task with retry and backoff.
//! - [`reducer`] -- Batch reduction of one tick's events to a delta.
//! - [`scheduler`] -- The tick loop and run lifecycle.
//! - [`source`] -- [`EventSource`] trait with channel and file sources.
//! - [`store`] -- Cumulative totals, ordered application, restore.
//! - [`wordlist`] -- Wordlist file parsing.
//!
//! [`SnapshotSink`]: feed::SnapshotSink
//! [`LogSink`]: feed::LogSink
//! [`EventSource`]: source::EventSource

pub mod checkpoint;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod control;
pub mod feed;
pub mod intake;
pub mod reducer;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod wordlist;
