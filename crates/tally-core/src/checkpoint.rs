//! Durable checkpoints of the cumulative state.
//!
//! A checkpoint is a JSON document holding every category total plus the
//! last applied tick index. It lives at `<dir>/state.json` and is replaced
//! atomically: the new document is written to a sibling temp file which is
//! then renamed over the old one.
//!
//! Restoring distinguishes three failure kinds so callers can decide what
//! to do on each:
//!
//! - [`CheckpointError::Absent`] -- nothing was ever written (cold start)
//! - [`CheckpointError::Corrupt`] -- the bytes are not a readable document
//! - [`CheckpointError::Incompatible`] -- readable, but written for a
//!   different category set
//!
//! A failed write never touches the in-memory state. If no checkpoint
//! survives, the next run starts counting from zero.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_types::CategoryCount;
use tracing::debug;

/// Current on-disk document version.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// File name of the checkpoint inside the checkpoint directory.
pub const CHECKPOINT_FILE: &str = "state.json";

/// Suffix of the temp file used for atomic replacement.
const TEMP_SUFFIX: &str = ".tmp";

/// Errors that can occur while writing or reading checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// No checkpoint exists yet.
    #[error("no checkpoint at {path}")]
    Absent {
        /// Where the checkpoint was expected.
        path: PathBuf,
    },

    /// The checkpoint exists but cannot be decoded.
    #[error("corrupt checkpoint: {reason}")]
    Corrupt {
        /// What was wrong with it.
        reason: String,
    },

    /// The checkpoint was written for a different category set.
    #[error("checkpoint categories {stored:?} do not match configured {configured:?}")]
    Incompatible {
        /// Category names found in the checkpoint.
        stored: Vec<String>,
        /// Category names currently configured.
        configured: Vec<String>,
    },

    /// Reading or writing the file failed.
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The document could not be serialized.
    #[error("failed to encode checkpoint: {source}")]
    Encode {
        /// The underlying serializer error.
        source: serde_json::Error,
    },
}

impl CheckpointError {
    /// Whether this is a normal cold start rather than a failure.
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent { .. })
    }
}

/// On-disk checkpoint document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    /// Document version, see [`CHECKPOINT_FORMAT_VERSION`].
    pub format_version: u32,
    /// Index of the last tick folded into `totals`, `None` before the first.
    pub last_applied_tick: Option<u64>,
    /// Cumulative totals in category enumeration order.
    pub totals: Vec<CategoryCount>,
    /// When the document was produced.
    pub written_at: DateTime<Utc>,
}

impl CheckpointDocument {
    /// Serialize to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec_pretty(self).map_err(|source| CheckpointError::Encode { source })
    }

    /// Parse bytes produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if the bytes are not a document
    /// or carry an unsupported version.
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let document: Self =
            serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupt {
                reason: e.to_string(),
            })?;
        if document.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::Corrupt {
                reason: format!(
                    "unsupported format version {} (expected {CHECKPOINT_FORMAT_VERSION})",
                    document.format_version
                ),
            });
        }
        Ok(document)
    }
}

/// A checkpoint location on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Use `dir` for checkpoints. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the checkpoint file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Atomically replace the checkpoint with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the directory cannot be created or
    /// the file cannot be written or renamed.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CheckpointError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let target = self.path();
        let temp = self.dir.join(format!("{CHECKPOINT_FILE}{TEMP_SUFFIX}"));
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|source| CheckpointError::Io {
                path: temp.clone(),
                source,
            })?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|source| CheckpointError::Io {
                path: target.clone(),
                source,
            })?;

        debug!(path = %target.display(), bytes = bytes.len(), "Checkpoint written");
        Ok(())
    }

    /// Read the raw checkpoint bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Absent`] if no checkpoint file exists, or
    /// [`CheckpointError::Io`] for any other read failure.
    pub async fn read(&self) -> Result<Vec<u8>, CheckpointError> {
        let path = self.path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CheckpointError::Absent { path })
            }
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }
}
