//! Run orchestration
//!
//! Ties the stages together: authenticate, scan, fingerprint, reconcile
//! against the remote inventory, upload, post-process, summarize.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::HashCache;
use crate::config::UploadConfig;
use crate::error::{TaskError, UploadError};
use crate::models::{FailureRecord, RunSummary, UploadTask};
use crate::pipeline::UploadPipeline;
use crate::postprocess::PostProcessor;
use crate::progress::ProgressObserver;
use crate::reconciler::{ClassifyOptions, Reconciler, RemoteIndex};
use crate::remote::RemoteLibrary;
use crate::scanner;

/// Everything decided before any byte is transferred
#[derive(Debug)]
pub struct RunPlan {
    /// Classified tasks, in discovery order
    pub tasks: Vec<UploadTask>,
    /// Remote fingerprint snapshot, updated in-run by the pipeline
    pub index: Arc<RemoteIndex>,
    /// Files that failed during scan or fingerprinting
    pub local_errors: Vec<TaskError>,
}

impl RunPlan {
    /// Number of tasks classified as Upload
    pub fn upload_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.decision.is_upload())
            .count()
    }
}

/// One upload run over a configured root directory
pub struct Uploader {
    config: UploadConfig,
    remote: Arc<dyn RemoteLibrary>,
    cache: HashCache,
}

impl Uploader {
    /// Validate the root and open the fingerprint cache
    pub fn new(config: UploadConfig, remote: Arc<dyn RemoteLibrary>) -> Result<Self, UploadError> {
        if !config.root.is_dir() {
            return Err(UploadError::InvalidRoot(config.root.clone()));
        }
        let cache =
            HashCache::open(&config.cache_path).map_err(|e| UploadError::Cache(e.to_string()))?;
        Ok(Self {
            config,
            remote,
            cache,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Authenticate, discover local files, and classify them against the
    /// remote inventory. No bytes are transferred yet.
    pub fn prepare(&mut self) -> Result<RunPlan, UploadError> {
        self.remote.authenticate()?;

        let supported = self.remote.supported_extensions()?;
        self.config.restrict_extensions(&supported);

        log::info!("scanning {}", self.config.root.display());
        let candidates = scanner::scan(&self.config)?;
        log::info!("found {} candidate files", candidates.len());

        let (files, local_errors) =
            scanner::fingerprint_files(candidates, &mut self.cache, self.config.use_cache);

        let items = self.remote.list_items()?;
        log::info!("remote inventory holds {} items", items.len());
        let index = Arc::new(RemoteIndex::from_items(items));

        let mut reconciler = Reconciler::new(
            &index,
            ClassifyOptions {
                reupload: self.config.reupload,
                dedup_within_run: self.config.force_reupload_dedup_within_run,
            },
        );
        let tasks = reconciler.classify_all(files);

        Ok(RunPlan {
            tasks,
            index,
            local_errors,
        })
    }

    /// Run the pipeline over a prepared plan, apply tags/playlists, and
    /// build the final summary. Per-file failures never fail the run;
    /// only an authentication-class rejection does.
    pub fn execute(
        &mut self,
        plan: RunPlan,
        observers: Vec<Box<dyn ProgressObserver>>,
    ) -> Result<RunSummary, UploadError> {
        let started = Instant::now();

        let mut pipeline = UploadPipeline::new(
            Arc::clone(&self.remote),
            Arc::clone(&plan.index),
            self.config.effective_parallel_uploads(),
        )
        .with_reupload(self.config.reupload);
        for observer in observers {
            pipeline.add_observer(observer);
        }

        let results = pipeline.run(plan.tasks)?;

        let post = PostProcessor::new(self.remote.as_ref(), &plan.index);
        let outcomes = post.apply(
            &self.config.tags,
            self.config.playlist.as_deref(),
            &results,
        );

        let mut summary = RunSummary::default();
        for result in &results {
            summary.record(result);
        }
        for err in &plan.local_errors {
            summary.total += 1;
            summary.failed += 1;
            summary.failures.push(FailureRecord::from_task_error(err));
        }
        for outcome in &outcomes {
            for err in &outcome.errors {
                summary
                    .post_process_failures
                    .push(format!("item {}: {}", outcome.remote_id, err));
            }
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;

        Ok(summary)
    }
}
