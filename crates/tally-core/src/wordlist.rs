//! Wordlist loading.
//!
//! A wordlist is a text file with one token per line. Lines are taken
//! verbatim apart from the line terminator; blank lines are skipped.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::classifier::MembershipSet;

/// Errors that can occur while loading a wordlist.
#[derive(Debug, thiserror::Error)]
pub enum WordlistError {
    /// The file could not be read.
    #[error("failed to read wordlist {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Parse wordlist contents into a membership set.
pub fn parse_wordlist(contents: &str) -> MembershipSet {
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Read and parse the wordlist at `path`.
///
/// # Errors
///
/// Returns [`WordlistError::Io`] if the file cannot be read.
pub fn load_wordlist(path: &Path) -> Result<MembershipSet, WordlistError> {
    let contents = std::fs::read_to_string(path).map_err(|source| WordlistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let set = parse_wordlist(&contents);
    debug!(path = %path.display(), tokens = set.len(), "Wordlist loaded");
    Ok(set)
}
