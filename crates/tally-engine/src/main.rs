//! Sentiment tally engine binary.
//!
//! Reads a stream of short text events, classifies every token against the
//! configured wordlists, and keeps a running per-category tally that is
//! reported once per tick.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tally-config.yaml` (or `$TALLY_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Load wordlists and build the classifier
//! 4. Restore the state store from the last checkpoint, if any
//! 5. Open the snapshot feed and start draining it into the sinks
//! 6. Connect the event source (NATS or a replay file)
//! 7. Start the run clock and wire Ctrl-C to a graceful stop
//! 8. Run the scheduler until stop, time limit, exhaustion, or failure
//! 9. Drain the sinks and log the result

mod error;
mod nats_source;
mod series;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tally_core::checkpoint::CheckpointStore;
use tally_core::classifier::Classifier;
use tally_core::config::{
    CheckpointConfig, LogFormat, LoggingConfig, SourceConfig, SourceKind, TallyConfig,
};
use tally_core::control::RunControl;
use tally_core::feed::{FeedPublisher, LogSink, SnapshotSink, drain_feed, snapshot_feed};
use tally_core::scheduler::{self, RunOutcome, Scheduler, SchedulerConfig, SchedulerState};
use tally_core::source::{EventSource, FileEventSource};
use tally_core::store::StateStore;
use tally_core::wordlist::load_wordlist;
use tally_types::Categories;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats_source::NatsEventSource;
use crate::series::SeriesFileSink;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "tally-config.yaml";

/// Application entry point for the tally engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails or the run ends
/// because the source failed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config_path = std::env::var("TALLY_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = TallyConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate().map_err(EngineError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config = %config_path.display(),
        tick_interval_ms = config.scheduler.tick_interval_ms,
        max_run_seconds = config.scheduler.max_run_seconds,
        source = ?config.source.kind,
        "tally-engine starting"
    );

    // 3. Build the classifier.
    let categories = config.category_table().map_err(EngineError::from)?;
    let classifier = build_classifier(&config, categories.clone())?;
    info!(
        categories = ?categories.names(),
        vocabulary = classifier.vocabulary_size(),
        "Classifier ready"
    );

    // 4. Restore state.
    let (store, checkpoints) = restore_store(&config.checkpoint, categories).await?;
    let resumed = store.last_applied_tick().is_some();

    // 5. Snapshot feed and sinks.
    let (publisher, reader) = snapshot_feed(config.sink.buffer_capacity, config.sink.overflow);
    let mut sinks: Vec<Box<dyn SnapshotSink>> = vec![Box::new(LogSink)];
    if let Some(path) = &config.sink.series_path {
        let sink = if resumed {
            SeriesFileSink::append(path)
        } else {
            SeriesFileSink::create(path)
        }
        .with_context(|| format!("opening series file {}", path.display()))?;
        info!(path = %path.display(), append = resumed, "Writing tick series");
        sinks.push(Box::new(sink));
    }
    let drain = tokio::spawn(drain_feed(reader, sinks));

    let pipeline = Pipeline {
        scheduler: config.scheduler_config(),
        max_run_seconds: config.scheduler.max_run_seconds,
        classifier,
        store,
        checkpoints,
        publisher,
    };

    // 6-8. Connect the source and run.
    let result = connect_and_run(&config.source, pipeline).await;

    // 9. Drain the sinks, then report.
    let (outcome, delivered) = settle(result, drain).await?;
    scheduler::log_run_end(&outcome);
    info!(delivered, "tally-engine shutdown complete");

    if outcome.state == SchedulerState::Failed {
        let message = format!("{:?}", outcome.end_reason);
        return Err(EngineError::RunFailed { message }.into());
    }
    Ok(())
}

/// Connect the configured source and run the pipeline on it.
///
/// The pipeline is consumed on every path, so the feed is closed and the
/// sinks can finish even when connecting fails.
async fn connect_and_run(
    source: &SourceConfig,
    pipeline: Pipeline,
) -> Result<RunOutcome, EngineError> {
    match source.kind {
        SourceKind::Nats => {
            let events = NatsEventSource::connect(&source.nats_url, &source.subject).await?;
            pipeline.run(events).await
        }
        SourceKind::File => {
            let Some(path) = source.file_path.as_deref() else {
                return Err(EngineError::RunFailed {
                    message: "source.file_path is required for a file source".to_owned(),
                });
            };
            let events = FileEventSource::open(path).await?;
            info!(path = %path.display(), "Replaying events from file");
            pipeline.run(events).await
        }
    }
}

/// Wait for the sinks to finish, then surface the run result.
///
/// The drain is awaited even when the run failed, so every sink gets its
/// `finish` call before the error propagates.
async fn settle(
    result: Result<RunOutcome, EngineError>,
    drain: JoinHandle<u64>,
) -> anyhow::Result<(RunOutcome, u64)> {
    let delivered = drain.await.context("snapshot sink task")?;
    Ok((result?, delivered))
}

/// Everything the scheduler needs except the source.
struct Pipeline {
    scheduler: SchedulerConfig,
    max_run_seconds: u64,
    classifier: Classifier,
    store: StateStore,
    checkpoints: Option<CheckpointStore>,
    publisher: FeedPublisher,
}

impl Pipeline {
    /// Start the run clock, wire Ctrl-C, and drive `source` to the end.
    ///
    /// The time limit counts from here, after the source is connected.
    async fn run<S: EventSource + 'static>(self, source: S) -> Result<RunOutcome, EngineError> {
        let control = Arc::new(RunControl::from_max_seconds(self.max_run_seconds));
        let mut scheduler = Scheduler::new(
            self.scheduler,
            self.classifier,
            self.store,
            Arc::clone(&control),
            self.publisher,
        );
        if let Some(checkpoints) = self.checkpoints {
            scheduler = scheduler.with_checkpoints(checkpoints);
        }

        // Ctrl-C requests a stop at the next tick boundary.
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current tick");
                control.request_stop();
            }
        });

        Ok(scheduler.run(source).await?)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Load every category's wordlist, in priority order.
fn build_classifier(config: &TallyConfig, categories: Categories) -> Result<Classifier, EngineError> {
    let sets = config
        .categories
        .iter()
        .map(|category| load_wordlist(&category.wordlist))
        .collect::<Result<Vec<_>, _>>()?;
    for (category, set) in config.categories.iter().zip(&sets) {
        if set.is_empty() {
            warn!(
                category = %category.name,
                path = %category.wordlist.display(),
                "Wordlist is empty, category will never match"
            );
        }
    }
    Ok(Classifier::new(categories, &sets)?)
}

/// Restore the state store from the checkpoint directory.
///
/// A missing checkpoint is a cold start. A corrupt or incompatible one is
/// fatal unless `discard_invalid` is set.
async fn restore_store(
    config: &CheckpointConfig,
    categories: Categories,
) -> Result<(StateStore, Option<CheckpointStore>), EngineError> {
    if !config.enabled {
        info!("Checkpointing disabled, starting from zero");
        return Ok((StateStore::new(categories), None));
    }

    let checkpoints = CheckpointStore::new(&config.dir);
    let store = match checkpoints.read().await {
        Ok(bytes) => match StateStore::restore(categories.clone(), &bytes) {
            Ok(store) => {
                info!(
                    path = %checkpoints.path().display(),
                    last_tick = ?store.last_applied_tick(),
                    counts = ?store.snapshot().counts(),
                    "Checkpoint restored"
                );
                store
            }
            Err(e) if config.discard_invalid => {
                warn!(error = %e, "Discarding invalid checkpoint, starting from zero");
                StateStore::new(categories)
            }
            Err(e) => return Err(e.into()),
        },
        Err(e) if e.is_absent() => {
            info!(path = %checkpoints.path().display(), "No checkpoint found, starting from zero");
            StateStore::new(categories)
        }
        Err(e) => return Err(e.into()),
    };
    Ok((store, Some(checkpoints)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tally_core::classifier::MembershipSet;
    use tally_core::control::EndReason;
    use tally_core::feed::{FeedReader, OverflowPolicy, SinkError};
    use tally_core::source::ChannelEventSource;
    use tally_types::TickSummary;

    use super::*;

    fn pipeline(max_run_seconds: u64) -> (Pipeline, FeedReader) {
        let categories = Categories::sentiment();
        let classifier = Classifier::new(
            categories.clone(),
            &[MembershipSet::new(["good"]), MembershipSet::new(["bad"])],
        )
        .unwrap();
        let (publisher, reader) = snapshot_feed(16, OverflowPolicy::DropOldest);
        let pipeline = Pipeline {
            scheduler: SchedulerConfig {
                tick_duration: Duration::from_secs(10),
                ..SchedulerConfig::default()
            },
            max_run_seconds,
            classifier,
            store: StateStore::new(categories),
            checkpoints: None,
            publisher,
        };
        (pipeline, reader)
    }

    /// Records what the drain task delivered.
    #[derive(Clone, Default)]
    struct Recorder {
        ticks: Arc<Mutex<Vec<u64>>>,
        finished: Arc<Mutex<bool>>,
    }

    impl SnapshotSink for Recorder {
        fn on_tick(&mut self, summary: &TickSummary) -> Result<(), SinkError> {
            self.ticks.lock().unwrap().push(summary.tick);
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn time_limit_counts_from_the_start_of_the_run() {
        let (pipeline, _reader) = pipeline(20);
        // Time spent before `run`, e.g. connecting, is not part of the limit.
        tokio::time::advance(Duration::from_secs(30)).await;

        let (_tx, source) = ChannelEventSource::channel(4);
        let outcome = pipeline.run(source).await.unwrap();
        assert_eq!(outcome.end_reason, EndReason::MaxDurationReached);
        assert_eq!(outcome.ticks_run, 2);
    }

    #[tokio::test]
    async fn sinks_finish_when_the_source_cannot_be_opened() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, reader) = pipeline(0);
        let recorder = Recorder::default();
        let drain = tokio::spawn(drain_feed(reader, recorder.clone()));

        let source = SourceConfig {
            kind: SourceKind::File,
            file_path: Some(dir.path().join("missing.txt")),
            ..SourceConfig::default()
        };
        let result = connect_and_run(&source, pipeline).await;
        assert!(matches!(result, Err(EngineError::Source { .. })));

        assert!(settle(result, drain).await.is_err());
        assert!(*recorder.finished.lock().unwrap());
        assert!(recorder.ticks.lock().unwrap().is_empty());
    }
}
