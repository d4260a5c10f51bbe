//! Error types for the tally engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and the run itself.

/// Top-level error for the tally engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tally_core::config::ConfigError,
    },

    /// A wordlist could not be loaded.
    #[error("wordlist error: {source}")]
    Wordlist {
        /// The underlying wordlist error.
        #[from]
        source: tally_core::wordlist::WordlistError,
    },

    /// The classifier could not be built from the wordlists.
    #[error("classifier error: {source}")]
    Classifier {
        /// The underlying classifier error.
        #[from]
        source: tally_core::classifier::ClassifierError,
    },

    /// The checkpoint could not be restored.
    #[error("checkpoint error: {source}")]
    Checkpoint {
        /// The underlying checkpoint error.
        #[from]
        source: tally_core::checkpoint::CheckpointError,
    },

    /// The event source could not be opened.
    #[error("source error: {source}")]
    Source {
        /// The underlying source error.
        #[from]
        source: tally_core::source::SourceError,
    },

    /// The scheduler aborted the run.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: tally_core::scheduler::SchedulerError,
    },

    /// The run ended because the source failed.
    #[error("run failed: {message}")]
    RunFailed {
        /// Description of the source failure.
        message: String,
    },
}
