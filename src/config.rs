//! Configuration for an upload run

use std::collections::HashSet;
use std::path::PathBuf;

/// Minimum number of parallel uploads
pub const MIN_PARALLEL_UPLOADS: usize = 1;

/// Maximum number of parallel uploads
pub const MAX_PARALLEL_UPLOADS: usize = 6;

/// Default number of parallel uploads
pub const DEFAULT_PARALLEL_UPLOADS: usize = 3;

/// Default cache file name, placed in the user's home directory
pub const DEFAULT_CACHE_FILE: &str = ".media_uploader_cache.db";

/// Configuration for the uploader
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root directory to scan for media files
    pub root: PathBuf,

    /// Path of the persistent fingerprint cache
    pub cache_path: PathBuf,

    /// Number of parallel upload workers, clamped to [1, 6]
    pub parallel_uploads: usize,

    /// Tags to apply to every uploaded or matched item
    pub tags: Vec<String>,

    /// Playlist to append every uploaded or matched item to
    pub playlist: Option<String>,

    /// Force re-upload even when the content is already remote
    pub reupload: bool,

    /// Under `reupload`, still skip the second in-run copy of identical
    /// content once the first copy has been transferred
    pub force_reupload_dedup_within_run: bool,

    /// Consult the local fingerprint cache (false bypasses, never deletes)
    pub use_cache: bool,

    /// Skip the interactive confirmation dialog
    pub skip_confirmation: bool,

    /// Print per-file detail, including retry attempts
    pub verbose: bool,

    /// Suppress all non-error output
    pub silent: bool,

    /// File extensions to consider (lowercase, without dot)
    pub extensions: HashSet<String>,

    /// Directory names to skip while scanning
    pub ignore_dirs: HashSet<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cache_path: default_cache_path(),
            parallel_uploads: DEFAULT_PARALLEL_UPLOADS,
            tags: Vec::new(),
            playlist: None,
            reupload: false,
            force_reupload_dedup_within_run: true,
            use_cache: true,
            skip_confirmation: false,
            verbose: false,
            silent: false,
            extensions: Self::default_extensions(),
            ignore_dirs: Self::default_ignore_dirs(),
        }
    }
}

/// Default cache location: home directory when known, working dir otherwise
pub fn default_cache_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_CACHE_FILE)
}

impl UploadConfig {
    /// Create a new config for the given root directory
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> UploadConfigBuilder {
        UploadConfigBuilder::new()
    }

    /// Get the default media extensions the scanner considers
    pub fn default_extensions() -> HashSet<String> {
        [
            "mp3", "flac", "wav", "aac", "ogg", "oga", "opus", "wma", "m4a", "m4b", "mp4", "aiff",
            "alac", "ape",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            "@eaDir",
            "node_modules",
            "__pycache__",
            ".cache",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if an extension should be included
    pub fn should_include_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a directory should be skipped
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        // Hidden directories are always skipped
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Restrict the extension set to what the remote service accepts.
    /// An empty service list leaves the local set untouched.
    pub fn restrict_extensions(&mut self, supported: &HashSet<String>) {
        if supported.is_empty() {
            return;
        }
        self.extensions.retain(|ext| supported.contains(ext));
    }

    /// The worker count actually used by the pipeline
    pub fn effective_parallel_uploads(&self) -> usize {
        self.parallel_uploads
            .clamp(MIN_PARALLEL_UPLOADS, MAX_PARALLEL_UPLOADS)
    }
}

/// Builder for UploadConfig
#[derive(Debug, Default)]
pub struct UploadConfigBuilder {
    config: UploadConfig,
}

impl UploadConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root directory
    pub fn root(mut self, root: PathBuf) -> Self {
        self.config.root = root;
        self
    }

    /// Set the cache file path
    pub fn cache_path(mut self, path: PathBuf) -> Self {
        self.config.cache_path = path;
        self
    }

    /// Set the number of parallel uploads (clamped to the allowed range)
    pub fn parallel_uploads(mut self, n: usize) -> Self {
        self.config.parallel_uploads = n.clamp(MIN_PARALLEL_UPLOADS, MAX_PARALLEL_UPLOADS);
        self
    }

    /// Set the tags to apply
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.config.tags = tags;
        self
    }

    /// Set the playlist to append items to
    pub fn playlist(mut self, playlist: Option<String>) -> Self {
        self.config.playlist = playlist;
        self
    }

    /// Force re-upload regardless of dedup match
    pub fn reupload(mut self, enabled: bool) -> Self {
        self.config.reupload = enabled;
        self
    }

    /// Control in-run dedup under forced re-upload
    pub fn force_reupload_dedup_within_run(mut self, enabled: bool) -> Self {
        self.config.force_reupload_dedup_within_run = enabled;
        self
    }

    /// Enable or disable the fingerprint cache
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.config.use_cache = enabled;
        self
    }

    /// Skip the confirmation dialog
    pub fn skip_confirmation(mut self, enabled: bool) -> Self {
        self.config.skip_confirmation = enabled;
        self
    }

    /// Enable verbose output
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.config.verbose = enabled;
        self
    }

    /// Suppress non-error output
    pub fn silent(mut self, enabled: bool) -> Self {
        self.config.silent = enabled;
        self
    }

    /// Set the extension whitelist
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Build the config
    pub fn build(self) -> UploadConfig {
        self.config
    }
}
