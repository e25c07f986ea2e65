//! Progress reporting and cancellation for pipeline runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::PipelineStats;

/// Receives progress lines and the final summary of a run.
///
/// Implement this trait to surface progress somewhere other than the log.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, message: &str);

    fn summary(&self, stats: &PipelineStats);
}

/// Default sink: writes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn progress(&self, message: &str) {
        tracing::info!(target: "pipeline", "{}", message);
    }

    fn summary(&self, stats: &PipelineStats) {
        tracing::info!(
            target: "pipeline",
            created = stats.created,
            duplicates_removed = stats.duplicates_removed,
            errors = stats.errors(),
            "{}",
            stats
        );
    }
}

/// Stops a running pipeline from starting new candidates.
///
/// Candidates already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
