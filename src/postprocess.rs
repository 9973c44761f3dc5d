//! Post-processing - tag and playlist assignment
//!
//! After the pipeline drains, every successfully uploaded or
//! skipped-but-matched item gets the requested tags and playlist
//! membership. Assignments are idempotent on the service side, so
//! re-running them is safe. Failures here are per-item and never roll
//! back a completed upload.

use std::collections::HashSet;

use crate::models::{TaskOutcome, UploadResult};
use crate::reconciler::RemoteIndex;
use crate::remote::RemoteLibrary;

/// Outcome of tag/playlist application for one remote item
#[derive(Debug, Clone)]
pub struct AssignmentOutcome {
    pub remote_id: String,
    /// Assignment failures, as human-readable messages
    pub errors: Vec<String>,
}

impl AssignmentOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies tags and playlist membership to the run's resulting item set
pub struct PostProcessor<'a> {
    remote: &'a dyn RemoteLibrary,
    index: &'a RemoteIndex,
}

impl<'a> PostProcessor<'a> {
    pub fn new(remote: &'a dyn RemoteLibrary, index: &'a RemoteIndex) -> Self {
        Self { remote, index }
    }

    /// Apply each tag and the optional playlist to every item the run
    /// resolved. In-run duplicates whose skip recorded no id yet are
    /// resolved through the index; if the matching upload failed, the
    /// item is reported as unresolvable.
    pub fn apply(
        &self,
        tags: &[String],
        playlist: Option<&str>,
        results: &[UploadResult],
    ) -> Vec<AssignmentOutcome> {
        if tags.is_empty() && playlist.is_none() {
            return Vec::new();
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::new();

        for result in results {
            let remote_id = match &result.outcome {
                TaskOutcome::Uploaded { remote_id } => Some(remote_id.clone()),
                TaskOutcome::Skipped { remote_id } => remote_id.clone().or_else(|| {
                    self.index
                        .get(&result.task.file.fingerprint)
                        .map(|item| item.id)
                }),
                TaskOutcome::Failed(_) => None,
            };

            let Some(remote_id) = remote_id else {
                if !result.is_failure() {
                    log::warn!(
                        "no remote item resolved for {}, skipping tag/playlist assignment",
                        result.task.file.path.display()
                    );
                }
                continue;
            };
            // Duplicate local files resolve to one remote item; assign once
            if !seen.insert(remote_id.clone()) {
                continue;
            }

            let mut errors = Vec::new();
            for tag in tags {
                if let Err(err) = self.remote.add_tag(&remote_id, tag) {
                    errors.push(format!("tag '{}': {}", tag, err.message));
                }
            }
            if let Some(playlist) = playlist {
                if let Err(err) = self.remote.add_to_playlist(&remote_id, playlist) {
                    errors.push(format!("playlist '{}': {}", playlist, err.message));
                }
            }
            if !errors.is_empty() {
                log::warn!(
                    "post-processing failures for item {}: {}",
                    remote_id,
                    errors.join("; ")
                );
            }
            outcomes.push(AssignmentOutcome { remote_id, errors });
        }

        outcomes
    }
}
