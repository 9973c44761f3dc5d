//! Content-addressed media library uploader
//!
//! This library uploads a local collection of media files to a remote
//! media-library service, using a persistent fingerprint cache and a
//! remote inventory snapshot to avoid redundant re-uploads and re-hashing
//! across runs.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod reconciler;
pub mod remote;
pub mod runner;
pub mod scanner;

pub use cache::{CacheEntry, HashCache};
pub use config::UploadConfig;
pub use error::{TaskError, TaskErrorKind, UploadError};
pub use models::{
    Decision, FailureRecord, LocalFile, RemoteItem, RunSummary, TaskOutcome, UploadResult,
    UploadTask,
};
pub use pipeline::{RetryPolicy, Sleeper, ThreadSleeper, UploadPipeline};
pub use postprocess::{AssignmentOutcome, PostProcessor};
pub use progress::{LogObserver, NullObserver, ProgressObserver, RunTotals};
pub use reconciler::{ClassifyOptions, Reconciler, RemoteIndex};
pub use remote::{HttpRemote, RemoteLibrary, Session};
pub use runner::{RunPlan, Uploader};
pub use scanner::{compute_fingerprint, fingerprint_files, scan};
