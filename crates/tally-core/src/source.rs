//! Upstream event sources.
//!
//! The scheduler pulls events through the [`EventSource`] trait. It could be
//! backed by a message broker, a replay file, or an in-process channel.
//! Sources do not stamp arrival times; the intake task does that as each
//! event is handed over.
//!
//! Errors come in two flavours. [`SourceError::Transient`] is retried with
//! backoff by the intake task; [`SourceError::Fatal`] ends intake at once.

use std::future::Future;
use std::path::{Path, PathBuf};

use tally_types::Event;
use tokio::io::{AsyncBufReadExt as _, BufReader, Split};
use tokio::sync::mpsc;

/// Errors reported by an [`EventSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// A failure that may clear up on retry (e.g. a dropped connection).
    #[error("transient source error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A failure retrying cannot fix.
    #[error("fatal source error: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },
}

impl SourceError {
    /// Build a [`SourceError::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Build a [`SourceError::Fatal`].
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Whether the intake task should retry after this error.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// An ordered, possibly unbounded feed of events.
///
/// The source owns whatever connection it needs, including reconnecting
/// after a transient failure on the next call.
pub trait EventSource: Send {
    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once a finite source has nothing more to deliver.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the event could not be fetched.
    fn next_event(&mut self) -> impl Future<Output = Result<Option<Event>, SourceError>> + Send;
}

/// A source fed through an in-process channel.
///
/// Ends once every sender has been dropped and the buffer is drained.
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Event>,
}

impl ChannelEventSource {
    /// Wrap an existing receiver.
    pub const fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Create a source along with the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Event>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.rx.recv().await)
    }
}

/// Replays a text file, one event per line.
///
/// Lines are decoded lossily, so invalid UTF-8 yields an event that matches
/// nothing instead of ending the replay.
#[derive(Debug)]
pub struct FileEventSource {
    path: PathBuf,
    lines: Split<BufReader<tokio::fs::File>>,
}

impl FileEventSource {
    /// Open `path` for replay.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fatal`] if the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SourceError::fatal(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).split(b'\n'),
        })
    }

    /// The file being replayed.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for FileEventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        match self.lines.next_segment().await {
            Ok(segment) => Ok(segment.map(|bytes| {
                let line = bytes.strip_suffix(b"\r").unwrap_or(&bytes);
                Event::from_payload(line)
            })),
            Err(e) => Err(SourceError::fatal(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }
}
