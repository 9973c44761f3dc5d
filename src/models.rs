//! Core data models for the uploader

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{TaskError, TaskErrorKind};

/// A candidate file discovered by the scanner, with its content fingerprint
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Full path to the file
    pub path: PathBuf,
    /// File name without path
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time as Unix timestamp
    pub mtime: i64,
    /// Content fingerprint (hex digest of the full file)
    pub fingerprint: String,
    /// Whether the fingerprint came from the cache rather than a fresh digest
    pub cache_hit: bool,
}

impl LocalFile {
    /// Create a local file record with a computed fingerprint
    pub fn new(path: PathBuf, size: u64, mtime: i64, fingerprint: String, cache_hit: bool) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        Self {
            path,
            name,
            size,
            mtime,
            fingerprint,
            cache_hit,
        }
    }
}

/// Snapshot of an item the remote library already holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Remote identifier
    pub id: String,
    /// Content fingerprint the service stored for the item
    pub fingerprint: String,
    /// Display name on the remote side
    pub name: String,
}

/// Per-file decision made by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Content already known remotely, or claimed by an earlier in-run
    /// upload. `existing` is `None` for an in-run duplicate whose remote id
    /// is resolved once the first copy finishes uploading.
    Skip { existing: Option<String> },
    /// Content must be transferred
    Upload,
}

impl Decision {
    /// Whether this decision requires a transfer
    pub fn is_upload(&self) -> bool {
        matches!(self, Decision::Upload)
    }
}

/// One unit of work: a local file plus its upload decision
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file: LocalFile,
    pub decision: Decision,
}

/// Terminal outcome of a single task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Bytes were transferred and the service registered a new item
    Uploaded { remote_id: String },
    /// No transfer happened; `remote_id` is `None` when the matching in-run
    /// upload failed and the content never reached the service
    Skipped { remote_id: Option<String> },
    /// The task failed permanently (possibly after exhausting retries)
    Failed(TaskError),
}

/// Outcome of one task, with the number of attempts it took
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub task: UploadTask,
    pub outcome: TaskOutcome,
    /// Number of upload attempts made (0 for skips)
    pub attempts: u32,
}

impl UploadResult {
    /// Whether the task ended in failure
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }

    /// The remote id this task resolved to, if any
    pub fn remote_id(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Uploaded { remote_id } => Some(remote_id),
            TaskOutcome::Skipped { remote_id } => remote_id.as_deref(),
            TaskOutcome::Failed(_) => None,
        }
    }
}

/// A single failed path, as listed in the final summary
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub path: String,
    pub kind: TaskErrorKind,
    pub message: String,
}

impl FailureRecord {
    /// Build a record from a task error, falling back to an empty path
    pub fn from_task_error(err: &TaskError) -> Self {
        Self {
            path: err
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            kind: err.kind,
            message: err.message.clone(),
        }
    }
}

/// Final summary of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Total candidate files considered
    pub total: u64,
    /// Files whose bytes were transferred
    pub uploaded: u64,
    /// Files skipped because their content was already remote
    pub skipped: u64,
    /// Files that failed permanently
    pub failed: u64,
    /// Bytes transferred by successful uploads
    pub bytes_uploaded: u64,
    /// Per-file failures, with their error kinds
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
    /// Tag/playlist assignment failures (non-fatal, never rolled back)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_process_failures: Vec<String>,
    /// Total run duration in milliseconds
    pub duration_ms: u64,
}

impl RunSummary {
    /// Record one pipeline result into the counters
    pub fn record(&mut self, result: &UploadResult) {
        self.total += 1;
        match &result.outcome {
            TaskOutcome::Uploaded { .. } => {
                self.uploaded += 1;
                self.bytes_uploaded += result.task.file.size;
            }
            TaskOutcome::Skipped { .. } => self.skipped += 1,
            TaskOutcome::Failed(err) => {
                self.failed += 1;
                let mut record = FailureRecord::from_task_error(err);
                if record.path.is_empty() {
                    record.path = result.task.file.path.to_string_lossy().to_string();
                }
                self.failures.push(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(path: &str, fingerprint: &str) -> LocalFile {
        LocalFile::new(PathBuf::from(path), 10, 1_700_000_000, fingerprint.into(), false)
    }

    #[test]
    fn test_local_file_name() {
        let file = local("/music/album/track.mp3", "aa");
        assert_eq!(file.name, "track.mp3");
    }

    #[test]
    fn test_result_remote_id() {
        let task = UploadTask {
            file: local("/m/a.mp3", "x"),
            decision: Decision::Upload,
        };
        let result = UploadResult {
            task: task.clone(),
            outcome: TaskOutcome::Uploaded {
                remote_id: "42".into(),
            },
            attempts: 1,
        };
        assert_eq!(result.remote_id(), Some("42"));
        assert!(!result.is_failure());

        let result = UploadResult {
            task,
            outcome: TaskOutcome::Skipped { remote_id: None },
            attempts: 0,
        };
        assert_eq!(result.remote_id(), None);
    }

    #[test]
    fn test_summary_counters() {
        let mut summary = RunSummary::default();
        let task = UploadTask {
            file: local("/m/a.mp3", "x"),
            decision: Decision::Upload,
        };
        summary.record(&UploadResult {
            task: task.clone(),
            outcome: TaskOutcome::Uploaded {
                remote_id: "1".into(),
            },
            attempts: 1,
        });
        summary.record(&UploadResult {
            task: task.clone(),
            outcome: TaskOutcome::Failed(TaskError::permanent(None, "rejected")),
            attempts: 1,
        });
        assert_eq!(summary.total, 2);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes_uploaded, 10);
        // The failure record falls back to the task's path
        assert_eq!(summary.failures[0].path, "/m/a.mp3");
    }
}
