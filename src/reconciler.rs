//! Reconciler - decides, per local file, whether to upload or skip
//!
//! The remote index is a run-scoped snapshot of the fingerprints the
//! service already holds. It is also updated in-memory after every
//! successful upload so in-run duplicates resolve without a second
//! transfer.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::models::{Decision, LocalFile, RemoteItem, UploadTask};

/// Run-scoped view of the fingerprints known to the remote service.
///
/// Readers and the pipeline's post-upload inserts share this map; a
/// successful-upload insert is atomic and visible to every later lookup
/// in the same run.
#[derive(Debug, Default)]
pub struct RemoteIndex {
    inner: Mutex<HashMap<String, RemoteItem>>,
}

impl RemoteIndex {
    /// Build the index from the service's inventory listing
    pub fn from_items(items: Vec<RemoteItem>) -> Self {
        let map = items
            .into_iter()
            .map(|item| (item.fingerprint.clone(), item))
            .collect();
        Self {
            inner: Mutex::new(map),
        }
    }

    /// Item registered for this fingerprint, if any
    pub fn get(&self, fingerprint: &str) -> Option<RemoteItem> {
        match self.inner.lock() {
            Ok(guard) => guard.get(fingerprint).cloned(),
            Err(poisoned) => poisoned.into_inner().get(fingerprint).cloned(),
        }
    }

    /// Whether the fingerprint is already known remotely
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.get(fingerprint).is_some()
    }

    /// Register a newly uploaded item
    pub fn insert(&self, item: RemoteItem) {
        match self.inner.lock() {
            Ok(mut guard) => {
                guard.insert(item.fingerprint.clone(), item);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(item.fingerprint.clone(), item);
            }
        }
    }

    /// Number of distinct fingerprints known
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the index holds no fingerprints
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Knobs affecting classification
#[derive(Debug, Clone, Copy)]
pub struct ClassifyOptions {
    /// Upload even when the fingerprint is already known remotely
    pub reupload: bool,
    /// Under `reupload`, still collapse in-run duplicates to one transfer
    pub dedup_within_run: bool,
}

/// Classifies local files against the remote index, claiming one upload
/// per unique fingerprint within the run
pub struct Reconciler<'a> {
    index: &'a RemoteIndex,
    options: ClassifyOptions,
    claimed: HashSet<String>,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a RemoteIndex, options: ClassifyOptions) -> Self {
        Self {
            index,
            options,
            claimed: HashSet::new(),
        }
    }

    /// Decide what to do with one local file.
    ///
    /// Without `reupload`: known fingerprints skip (recording the existing
    /// remote id), unknown fingerprints upload. With `reupload`: always
    /// upload, except that an in-run duplicate of an already-claimed
    /// fingerprint still skips unless in-run dedup is disabled.
    pub fn classify(&mut self, file: LocalFile) -> UploadTask {
        let fingerprint = file.fingerprint.clone();

        let decision = if self.claimed.contains(&fingerprint) {
            if self.options.reupload && !self.options.dedup_within_run {
                Decision::Upload
            } else {
                // The id resolves once the first copy's upload finishes
                Decision::Skip {
                    existing: self.index.get(&fingerprint).map(|item| item.id),
                }
            }
        } else if !self.options.reupload {
            match self.index.get(&fingerprint) {
                Some(item) => Decision::Skip {
                    existing: Some(item.id),
                },
                None => {
                    self.claimed.insert(fingerprint);
                    Decision::Upload
                }
            }
        } else {
            self.claimed.insert(fingerprint);
            Decision::Upload
        };

        UploadTask { file, decision }
    }

    /// Classify a batch in discovery order
    pub fn classify_all(&mut self, files: Vec<LocalFile>) -> Vec<UploadTask> {
        files.into_iter().map(|file| self.classify(file)).collect()
    }
}
