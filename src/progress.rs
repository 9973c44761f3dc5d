//! Progress reporting for upload runs
//!
//! The pipeline publishes a consistent totals snapshot after every task
//! completion; rendering is behind the [`ProgressObserver`] trait so the
//! console output can be swapped without touching orchestration logic.

use serde::Serialize;

use crate::models::{TaskOutcome, UploadResult};

/// Aggregate counters published after every task completion
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTotals {
    /// Total number of tasks in the run
    pub total: u64,
    /// Tasks that reached a terminal outcome
    pub completed: u64,
    /// Tasks whose bytes were transferred
    pub uploaded: u64,
    /// Tasks skipped by dedup
    pub skipped: u64,
    /// Tasks that failed permanently
    pub failed: u64,
    /// Bytes transferred so far
    pub bytes_uploaded: u64,
    /// Uploads currently in flight
    pub in_flight: u64,
}

impl RunTotals {
    /// Create totals for a run of `total` tasks
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Fold one terminal result into the counters.
    ///
    /// Each result lands in exactly one bucket, so a task can never be
    /// reported both complete and errored.
    pub fn record(&mut self, result: &UploadResult) {
        self.completed += 1;
        match &result.outcome {
            TaskOutcome::Uploaded { .. } => {
                self.uploaded += 1;
                self.bytes_uploaded += result.task.file.size;
            }
            TaskOutcome::Skipped { .. } => self.skipped += 1,
            TaskOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Observer notified as the pipeline makes progress
pub trait ProgressObserver {
    /// Called once before the first task is dispatched
    fn on_run_started(&mut self, _total: u64) {}

    /// Called after every task completion with a consistent snapshot
    fn on_task_completed(&mut self, result: &UploadResult, totals: &RunTotals);

    /// Called once after the last task completes or the run is cancelled
    fn on_run_finished(&mut self, _totals: &RunTotals) {}
}

/// Observer that routes progress through the `log` crate
#[derive(Debug, Default)]
pub struct LogObserver {
    /// Also log retry attempt counts per task
    pub verbose: bool,
}

impl LogObserver {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressObserver for LogObserver {
    fn on_run_started(&mut self, total: u64) {
        log::info!("starting upload of {} files", total);
    }

    fn on_task_completed(&mut self, result: &UploadResult, totals: &RunTotals) {
        let path = result.task.file.path.display();
        match &result.outcome {
            TaskOutcome::Uploaded { remote_id } => {
                log::info!(
                    "uploaded {} -> item {} ({}/{})",
                    path,
                    remote_id,
                    totals.completed,
                    totals.total
                );
            }
            TaskOutcome::Skipped { remote_id } => {
                log::info!(
                    "skipped {} (already uploaded{})",
                    path,
                    remote_id
                        .as_deref()
                        .map(|id| format!(", item {}", id))
                        .unwrap_or_default()
                );
            }
            TaskOutcome::Failed(err) => {
                log::error!("failed {}: {}", path, err.message);
            }
        }
        if self.verbose && result.attempts > 1 {
            log::info!("{} took {} attempts", path, result.attempts);
        }
    }

    fn on_run_finished(&mut self, totals: &RunTotals) {
        log::info!(
            "upload finished: {} uploaded, {} skipped, {} failed, {} bytes",
            totals.uploaded,
            totals.skipped,
            totals.failed,
            totals.bytes_uploaded
        );
    }
}

/// Observer that discards everything (silent mode and tests)
#[derive(Debug, Default)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_task_completed(&mut self, _result: &UploadResult, _totals: &RunTotals) {}
}
