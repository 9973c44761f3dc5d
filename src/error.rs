//! Error types for the uploader

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort the whole run with a non-zero exit
#[derive(Debug, Error)]
pub enum UploadError {
    /// The remote service rejected the session or credentials
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The upload root does not exist or is not a directory
    #[error("invalid root directory: {}", .0.display())]
    InvalidRoot(PathBuf),
    /// The remote service could not be reached or returned a bad inventory
    #[error("remote service error: {0}")]
    Remote(String),
    /// The local fingerprint store could not be opened at all
    #[error("cache store error: {0}")]
    Cache(String),
}

/// Classification of a per-task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorKind {
    /// Network blip, rate limit, or server-side failure; retried with backoff
    Transient,
    /// Validation rejection, client-side failure, or unreadable local file;
    /// recorded and never retried
    Permanent,
    /// Session/credential rejection surfaced mid-run; stops the pipeline
    Auth,
}

impl TaskErrorKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::Transient => "transient",
            TaskErrorKind::Permanent => "permanent",
            TaskErrorKind::Auth => "auth",
        }
    }
}

/// Represents a failure scoped to a single task
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct TaskError {
    /// The kind of error
    pub kind: TaskErrorKind,
    /// The local path the task was working on, if any
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl TaskError {
    /// Create a new task error
    pub fn new(kind: TaskErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a transient (retryable) error
    pub fn transient(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Transient, path, message)
    }

    /// Create a permanent error
    pub fn permanent(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Permanent, path, message)
    }

    /// Create an authentication-class error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Auth, None, message)
    }

    /// Whether the error is worth another attempt
    pub fn is_transient(&self) -> bool {
        self.kind == TaskErrorKind::Transient
    }

    /// Demote a transient error whose retry budget is exhausted
    pub fn demoted(mut self) -> Self {
        if self.kind == TaskErrorKind::Transient {
            self.kind = TaskErrorKind::Permanent;
        }
        self
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        // Local I/O problems are never retried; the file will not get
        // more readable between attempts.
        Self::permanent(None, err.to_string())
    }
}
