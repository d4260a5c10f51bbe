//! JSON-lines series output.
//!
//! [`SeriesFileSink`] appends one record per tick holding the tick index,
//! its delta, and the cumulative snapshot. The file is the data behind a
//! positive/negative over time plot; every line is flushed as it is
//! written so a crashed run still leaves a usable series.
//!
//! A run that resumed from a checkpoint appends to the existing file, so
//! the series keeps the ticks written before the restart.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::feed::{SinkError, SnapshotSink};
use tally_types::{CategoryCount, TickSummary};

/// One line of the series file.
#[derive(Debug, Serialize)]
struct SeriesRecord<'a> {
    tick: u64,
    applied_at: DateTime<Utc>,
    events: u64,
    delta: &'a [CategoryCount],
    snapshot: &'a [CategoryCount],
}

/// Writes each tick summary as a JSON line.
pub struct SeriesFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SeriesFileSink {
    /// Create (or truncate) the series file at `path` for a cold start.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be created.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_file(path, File::create(path)?))
    }

    /// Open the series file at `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub fn append(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_file(path, file))
    }

    fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        }
    }

    fn io_error(&self, e: &std::io::Error) -> SinkError {
        SinkError::new(format!("failed to write {}: {e}", self.path.display()))
    }
}

impl SnapshotSink for SeriesFileSink {
    fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
        let record = SeriesRecord {
            tick: summary.tick,
            applied_at: summary.applied_at,
            events: summary.events,
            delta: &summary.delta,
            snapshot: &summary.snapshot.entries,
        };
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|e| SinkError::new(format!("failed to encode tick {}: {e}", summary.tick)))?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| self.io_error(&e))
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(|e| self.io_error(&e))
    }
}
