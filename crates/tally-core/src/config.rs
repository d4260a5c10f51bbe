//! Configuration loading and typed config structures for the tally engine.
//!
//! The configuration lives in `tally-config.yaml`. Every field has a
//! default, so an empty or missing file yields a runnable setup: ten-second
//! ticks, no time limit, the two sentiment categories, and a NATS source on
//! the `twitterstream` subject.
//!
//! Environment variables override a few deployment-specific values, see
//! [`TallyConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tally_types::{Categories, NEGATIVE, POSITIVE};

use crate::feed::OverflowPolicy;
use crate::intake::RetryPolicy;
use crate::scheduler::SchedulerConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `tally-config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TallyConfig {
    /// Tick timing and run bounds.
    #[serde(default)]
    pub scheduler: TickConfig,

    /// Checkpoint persistence.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Categories in priority order, each with its wordlist.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,

    /// Upstream event source.
    #[serde(default)]
    pub source: SourceConfig,

    /// Snapshot feed and output sinks.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            scheduler: TickConfig::default(),
            checkpoint: CheckpointConfig::default(),
            categories: default_categories(),
            source: SourceConfig::default(),
            sink: SinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TallyConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are applied after parsing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file), except that a missing file is
    /// not an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override deployment values with environment variables when set:
    ///
    /// - `NATS_URL` overrides `source.nats_url`
    /// - `TALLY_NATS_SUBJECT` overrides `source.subject`
    /// - `TALLY_CHECKPOINT_DIR` overrides `checkpoint.dir`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` in place of the process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("NATS_URL") {
            self.source.nats_url = val;
        }
        if let Some(val) = lookup("TALLY_NATS_SUBJECT") {
            self.source.subject = val;
        }
        if let Some(val) = lookup("TALLY_CHECKPOINT_DIR") {
            self.checkpoint.dir = PathBuf::from(val);
        }
    }

    /// Check the values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };
        if self.scheduler.tick_interval_ms == 0 {
            return invalid("scheduler.tick_interval_ms must be greater than zero");
        }
        if self.scheduler.intake_capacity == 0 {
            return invalid("scheduler.intake_capacity must be greater than zero");
        }
        if self.checkpoint.interval_ticks == 0 {
            return invalid("checkpoint.interval_ticks must be greater than zero");
        }
        if self.sink.buffer_capacity == 0 {
            return invalid("sink.buffer_capacity must be greater than zero");
        }
        if self.source.kind == SourceKind::File && self.source.file_path.is_none() {
            return invalid("source.file_path is required when source.kind is file");
        }
        self.category_table()?;
        Ok(())
    }

    /// The configured categories in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the list is empty or has
    /// duplicate or blank names.
    pub fn category_table(&self) -> Result<Categories, ConfigError> {
        Categories::new(self.categories.iter().map(|c| c.name.clone())).map_err(|e| {
            ConfigError::Invalid {
                reason: format!("categories: {e}"),
            }
        })
    }

    /// Scheduler settings derived from this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_duration: Duration::from_millis(self.scheduler.tick_interval_ms),
            checkpoint_interval_ticks: self.checkpoint.interval_ticks,
            intake_capacity: self.scheduler.intake_capacity,
            retry: self.source.retry.policy(),
        }
    }
}

/// Tick timing and run bounds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickConfig {
    /// Wall-clock milliseconds per tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stop after this many seconds (0 = run until stopped).
    #[serde(default)]
    pub max_run_seconds: u64,

    /// Capacity of the channel between intake and the scheduler.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_run_seconds: 0,
            intake_capacity: default_intake_capacity(),
        }
    }
}

/// Checkpoint persistence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckpointConfig {
    /// Whether to restore from and write checkpoints.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding `state.json`.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,

    /// Write a checkpoint after every N applied ticks.
    #[serde(default = "default_checkpoint_interval_ticks")]
    pub interval_ticks: u64,

    /// Start fresh instead of failing on a corrupt or incompatible checkpoint.
    #[serde(default)]
    pub discard_invalid: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_checkpoint_dir(),
            interval_ticks: default_checkpoint_interval_ticks(),
            discard_invalid: false,
        }
    }
}

/// One category and the wordlist that defines it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryConfig {
    /// Category name as reported in snapshots.
    pub name: String,
    /// Path of the wordlist file, one token per line.
    pub wordlist: PathBuf,
}

/// Which kind of upstream source to read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Subscribe to a NATS subject.
    #[default]
    Nats,
    /// Replay a text file, one event per line.
    File,
}

/// Upstream event source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Source kind.
    #[serde(default)]
    pub kind: SourceKind,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// NATS subject carrying one event per message.
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Replay file for [`SourceKind::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Retry budget for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            nats_url: default_nats_url(),
            subject: default_subject(),
            file_path: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry budget for transient source failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Consecutive failures tolerated before the run fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Convert to the runtime retry policy.
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Snapshot feed and output sinks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SinkConfig {
    /// Unread summaries the feed holds before the overflow policy applies.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// What to do when the feed is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Optional JSON-lines file receiving one record per tick.
    #[serde(default)]
    pub series_path: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            overflow: OverflowPolicy::default(),
            series_path: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_tick_interval_ms() -> u64 {
    10_000
}

const fn default_intake_capacity() -> usize {
    1024
}

const fn default_true() -> bool {
    true
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoint")
}

const fn default_checkpoint_interval_ticks() -> u64 {
    1
}

fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig {
            name: POSITIVE.to_owned(),
            wordlist: PathBuf::from("positive.txt"),
        },
        CategoryConfig {
            name: NEGATIVE.to_owned(),
            wordlist: PathBuf::from("negative.txt"),
        },
    ]
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_subject() -> String {
    "twitterstream".to_owned()
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_buffer_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_without_env(yaml: &str) -> TallyConfig {
        if yaml.trim().is_empty() {
            TallyConfig::default()
        } else {
            serde_yml::from_str(yaml).unwrap()
        }
    }

    #[test]
    fn defaults_match_the_reference_run() {
        let config = TallyConfig::default();
        assert_eq!(config.scheduler.tick_interval_ms, 10_000);
        assert_eq!(config.scheduler.max_run_seconds, 0);
        assert_eq!(config.source.subject, "twitterstream");
        assert_eq!(config.checkpoint.dir, PathBuf::from("checkpoint"));
        assert_eq!(
            config.category_table().unwrap(),
            Categories::sentiment()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
scheduler:
  tick_interval_ms: 5000
  max_run_seconds: 100
  intake_capacity: 64

checkpoint:
  enabled: false
  dir: "/var/lib/tally"
  interval_ticks: 3
  discard_invalid: true

categories:
  - name: joy
    wordlist: joy.txt
  - name: anger
    wordlist: anger.txt
  - name: fear
    wordlist: fear.txt

source:
  kind: file
  file_path: "tweets.txt"
  retry:
    max_attempts: 2
    initial_backoff_ms: 100
    max_backoff_ms: 1000

sink:
  buffer_capacity: 16
  overflow: block
  series_path: "series.jsonl"

logging:
  level: "debug"
  format: json
"#;
        let config = parse_without_env(yaml);
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_run_seconds, 100);
        assert!(!config.checkpoint.enabled);
        assert_eq!(config.checkpoint.interval_ticks, 3);
        assert_eq!(config.category_table().unwrap().len(), 3);
        assert_eq!(config.source.kind, SourceKind::File);
        assert_eq!(config.sink.overflow, OverflowPolicy::Block);
        assert_eq!(config.sink.series_path, Some(PathBuf::from("series.jsonl")));
        assert_eq!(config.logging.format, LogFormat::Json);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.tick_duration, Duration::from_secs(5));
        assert_eq!(scheduler.checkpoint_interval_ticks, 3);
        assert_eq!(scheduler.retry.max_attempts, 2);
        assert_eq!(scheduler.retry.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = parse_without_env("scheduler:\n  max_run_seconds: 30\n");
        assert_eq!(config.scheduler.max_run_seconds, 30);
        assert_eq!(config.scheduler.tick_interval_ms, 10_000);
        assert_eq!(config.categories.len(), 2);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(TallyConfig::parse("").is_ok());
    }

    #[test]
    fn env_overrides_replace_deployment_values() {
        let env: HashMap<&str, &str> = [
            ("NATS_URL", "nats://broker:4222"),
            ("TALLY_NATS_SUBJECT", "tweets"),
            ("TALLY_CHECKPOINT_DIR", "/tmp/tally"),
        ]
        .into_iter()
        .collect();
        let mut config = TallyConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| (*v).to_owned()));
        assert_eq!(config.source.nats_url, "nats://broker:4222");
        assert_eq!(config.source.subject, "tweets");
        assert_eq!(config.checkpoint.dir, PathBuf::from("/tmp/tally"));
    }

    #[test]
    fn validate_rejects_zero_tick_interval() {
        let mut config = TallyConfig::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn validate_rejects_zero_capacities() {
        let mut config = TallyConfig::default();
        config.sink.buffer_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = TallyConfig::default();
        config.scheduler.intake_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = TallyConfig::default();
        config.checkpoint.interval_ticks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_categories() {
        let mut config = TallyConfig::default();
        config.categories.clear();
        assert!(config.validate().is_err());

        let mut config = TallyConfig::default();
        config.categories[1].name = POSITIVE.to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_file_path_for_file_source() {
        let mut config = TallyConfig::default();
        config.source.kind = SourceKind::File;
        assert!(config.validate().is_err());
        config.source.file_path = Some(PathBuf::from("tweets.txt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TallyConfig::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.scheduler, TickConfig::default());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tally-config.yaml");
        if path.exists() {
            let config = TallyConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
