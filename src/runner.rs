//! Batch run orchestration
//!
//! A run moves through `Idle -> Locating -> Validating -> Writing -> Done`; any aborting
//! failure ends it in `Failed(kind)`. Every transition is published to the observer as
//! [`ProgressEvent::StateChanged`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;

use crate::error::{BatchError, FailureKind, Result};
use crate::file_discovery::{DEFAULT_PATTERN, FileLocator};
use crate::progress::{
    CancellationToken, NoopObserver, ProgressCollector, ProgressEvent, ProgressObserver,
};
use crate::report::{self, ReportFormat, Summary, WriteOptions};
use crate::schema_loader::SchemaLoader;
use crate::validator::{ValidationConfig, ValidationEngine};

/// Lifecycle state of a [`BatchRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Locating,
    Validating,
    Writing,
    Done,
    Failed(FailureKind),
}

impl RunState {
    /// Whether a run is currently in progress
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Locating | RunState::Validating | RunState::Writing
        )
    }
}

/// Inputs of a single batch run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub root: PathBuf,
    pub pattern: String,
    pub schema: PathBuf,
    pub output_dir: PathBuf,
    pub format: ReportFormat,
    pub threads: usize,
    pub follow_symlinks: bool,
    /// Write the completed results as a partial artifact when the run is cancelled
    pub best_effort_on_cancel: bool,
    pub write_retries: u32,
    pub write_retry_delay: Duration,
}

impl BatchConfig {
    /// Configuration with default pattern, output directory and format
    pub fn new(root: impl Into<PathBuf>, schema: impl Into<PathBuf>) -> Self {
        let write = WriteOptions::default();
        Self {
            root: root.into(),
            pattern: DEFAULT_PATTERN.to_string(),
            schema: schema.into(),
            output_dir: PathBuf::from("./logs"),
            format: ReportFormat::default(),
            threads: num_cpus::get(),
            follow_symlinks: false,
            best_effort_on_cancel: false,
            write_retries: write.retries,
            write_retry_delay: write.retry_delay,
        }
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions {
            retries: self.write_retries,
            retry_delay: self.write_retry_delay,
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed { artifact: PathBuf, summary: Summary },
    Failed(BatchError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RunOutcome::Completed { .. } => None,
            RunOutcome::Failed(e) => Some(e.kind()),
        }
    }
}

/// Sequences discovery, schema loading, validation and report writing
pub struct BatchRunner {
    state: Mutex<RunState>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
    schema_loader: SchemaLoader,
}

impl BatchRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
            schema_loader: SchemaLoader::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an externally owned cancellation token
    ///
    /// The token is never reset by the runner; once cancelled, later runs stop at
    /// their first check point.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Run one batch to completion
    ///
    /// Rejected with [`BatchError::Busy`] while another run is in progress on this
    /// runner; a runner in `Done` or `Failed` accepts a new run.
    pub async fn run_batch(&self, config: BatchConfig) -> RunOutcome {
        {
            let mut state = self.state.lock();
            if state.is_active() {
                tracing::warn!("Rejected batch run for {}: busy", config.root.display());
                return RunOutcome::Failed(BatchError::Busy);
            }
            *state = RunState::Locating;
        }
        self.publish(RunState::Locating);

        match self.execute(&config).await {
            Ok((artifact, summary)) => {
                self.transition(RunState::Done);
                tracing::info!(
                    valid = summary.valid_count,
                    invalid = summary.invalid_count,
                    "Batch {} finished",
                    config.root.display()
                );
                RunOutcome::Completed { artifact, summary }
            }
            Err(e) => {
                self.transition(RunState::Failed(e.kind()));
                tracing::error!("Batch {} failed: {}", config.root.display(), e);
                RunOutcome::Failed(e)
            }
        }
    }

    async fn execute(&self, config: &BatchConfig) -> Result<(PathBuf, Summary)> {
        let locator = FileLocator::new(&config.pattern)?
            .with_follow_symlinks(config.follow_symlinks);
        let entries = locator
            .locate(&config.root, self.observer.as_ref(), &self.cancel)
            .await?;
        tracing::info!(
            "Found {} file(s) matching '{}' under {}",
            entries.len(),
            config.pattern,
            config.root.display()
        );

        self.transition(RunState::Validating);
        let schema = self.schema_loader.load(&config.schema).await?;

        let engine = ValidationEngine::new(ValidationConfig {
            max_concurrent_validations: config.threads,
        });
        let collector = ProgressCollector::spawn(Arc::clone(&self.observer));
        let run = engine
            .validate_files(&schema, &entries, Some(collector.sender()), &self.cancel)
            .await;
        collector.finish().await;
        let run = run?;

        let batch_name = batch_name(&config.root).await;

        if run.cancelled {
            let completed = run.results.len();
            let partial_report = if config.best_effort_on_cancel {
                self.transition(RunState::Writing);
                let report = report::aggregate(&batch_name, run.results, Local::now());
                let path = report::write(
                    &report,
                    &config.output_dir,
                    config.format,
                    config.write_options(),
                )
                .await?;
                tracing::warn!("Partial report written to {}", path.display());
                Some(path)
            } else {
                None
            };
            return Err(BatchError::Cancelled {
                completed,
                total: entries.len(),
                partial_report,
            });
        }

        self.transition(RunState::Writing);
        let report = report::aggregate(&batch_name, run.results, Local::now());
        let artifact = report::write(
            &report,
            &config.output_dir,
            config.format,
            config.write_options(),
        )
        .await?;

        Ok((artifact, report.summary))
    }

    fn transition(&self, next: RunState) {
        *self.state.lock() = next;
        self.publish(next);
    }

    fn publish(&self, state: RunState) {
        tracing::debug!("Run state: {:?}", state);
        self.observer.on_progress(&ProgressEvent::StateChanged(state));
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Base name of the canonicalized root, used in artifact names
async fn batch_name(root: &Path) -> String {
    let resolved = tokio::fs::canonicalize(root)
        .await
        .unwrap_or_else(|_| root.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string())
}
