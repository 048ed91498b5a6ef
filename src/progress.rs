//! Progress notifications and cancellation
//!
//! Observers are invoked synchronously from a single producer at a time: the locator
//! calls them directly while walking, and validation workers funnel their events
//! through [`ProgressCollector`], which replays them in arrival order on one task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::runner::RunState;

/// Progress update emitted during a batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The runner entered a new state
    StateChanged(RunState),
    /// The locator is looking at a file, matched or not
    Examining { file_name: String },
    /// A file finished validation
    Validated {
        file_name: String,
        completed: usize,
        total: usize,
    },
}

/// Receiver of progress notifications
#[cfg_attr(test, mockall::automock)]
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Observer that drops every event
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Cooperative cancellation signal shared between the caller and a run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops at its next check point
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Serializes events from concurrent producers onto one observer
pub struct ProgressCollector {
    sender: mpsc::UnboundedSender<ProgressEvent>,
    task: JoinHandle<()>,
}

impl ProgressCollector {
    /// Spawn the collector task feeding `observer`
    pub fn spawn(observer: Arc<dyn ProgressObserver>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ProgressEvent>();
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                observer.on_progress(&event);
            }
        });
        Self { sender, task }
    }

    /// Handle for producers; sending never blocks
    pub fn sender(&self) -> mpsc::UnboundedSender<ProgressEvent> {
        self.sender.clone()
    }

    /// Close the channel and wait until every queued event has been delivered
    pub async fn finish(self) {
        drop(self.sender);
        if let Err(e) = self.task.await {
            tracing::warn!("Progress collector stopped abnormally: {}", e);
        }
    }
}
