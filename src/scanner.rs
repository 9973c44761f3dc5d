//! Scanner module - candidate discovery and fingerprint computation

use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::cache::{normalize_path, CacheEntry, HashCache};
use crate::config::UploadConfig;
use crate::error::{TaskError, UploadError};
use crate::models::LocalFile;

/// Walk `root` and collect candidate media file paths.
///
/// Recurses into subdirectories, skips hidden entries and ignored
/// directory names, and follows symlinks while tracking visited canonical
/// directories so link cycles terminate. Unreadable entries are logged and
/// skipped; only a missing root is fatal.
pub fn scan(config: &UploadConfig) -> Result<Vec<PathBuf>, UploadError> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(UploadError::InvalidRoot(root.clone()));
    }

    let mut visited_dirs: HashSet<PathBuf> = HashSet::new();
    let mut candidates = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(move |entry| {
            if !entry.file_type().is_dir() {
                // Hidden files are skipped, everything else is examined
                return entry
                    .file_name()
                    .to_str()
                    .map(|name| !name.starts_with('.'))
                    .unwrap_or(true);
            }
            if entry.depth() > 0 {
                if let Some(name) = entry.file_name().to_str() {
                    if config.should_ignore_dir(name) {
                        return false;
                    }
                }
            }
            // Prune directories already seen through another link
            match std::fs::canonicalize(entry.path()) {
                Ok(real) => visited_dirs.insert(real),
                Err(err) => {
                    log::warn!("cannot resolve {}: {}", entry.path().display(), err);
                    false
                }
            }
        });

    for entry in walker {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let extension = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
                    .unwrap_or_default();
                if config.should_include_extension(&extension) {
                    candidates.push(path.to_path_buf());
                }
            }
            Err(err) => {
                // Per-entry failure: log and keep scanning
                log::warn!("scan error: {}", err);
            }
        }
    }

    candidates.sort();
    Ok(candidates)
}

/// Stat each candidate, consult the cache, and digest misses in parallel.
///
/// Cache hits reuse the recorded fingerprint without touching the file's
/// contents. Misses are hashed on the rayon pool and the fresh entries are
/// flushed back to the cache in one batch. Files that disappear or become
/// unreadable mid-run are reported as permanent task errors.
pub fn fingerprint_files(
    paths: Vec<PathBuf>,
    cache: &mut HashCache,
    use_cache: bool,
) -> (Vec<LocalFile>, Vec<TaskError>) {
    let mut files = Vec::with_capacity(paths.len());
    let mut errors = Vec::new();
    let mut misses = Vec::new();

    for path in paths {
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(err) => {
                errors.push(TaskError::permanent(
                    Some(path.clone()),
                    format!("stat failed: {}", err),
                ));
                continue;
            }
        };
        let size = metadata.len();
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if use_cache {
            if let Some(fingerprint) = cache.lookup(&path, size, mtime) {
                files.push(LocalFile::new(path, size, mtime, fingerprint, true));
                continue;
            }
        }
        misses.push((path, size, mtime));
    }

    // Hash the misses in parallel; the digest itself is CPU/IO bound and
    // independent per file.
    let hashed: Vec<_> = misses
        .into_par_iter()
        .map(|(path, size, mtime)| {
            let result = compute_fingerprint(&path);
            (path, size, mtime, result)
        })
        .collect();

    let mut fresh = Vec::new();
    for (path, size, mtime, result) in hashed {
        match result {
            Ok(fingerprint) => {
                fresh.push(CacheEntry {
                    path: normalize_path(&path),
                    size,
                    mtime,
                    fingerprint: fingerprint.clone(),
                });
                files.push(LocalFile::new(path, size, mtime, fingerprint, false));
            }
            Err(err) => {
                errors.push(TaskError::permanent(
                    Some(path),
                    format!("fingerprint failed: {}", err),
                ));
            }
        }
    }

    if let Err(err) = cache.store_batch(&fresh) {
        // Cache write failures cost a re-hash next run, nothing more
        log::warn!("failed to flush {} cache entries: {}", fresh.len(), err);
    }

    (files, errors)
}

/// Compute the content fingerprint of a file.
///
/// Streams the whole file through the digest; partial or sampled hashing
/// would risk false dedup matches.
pub fn compute_fingerprint(path: &Path) -> std::io::Result<String> {
    use md5::{Digest, Md5};

    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    fn config_for(root: &Path) -> UploadConfig {
        UploadConfig::new(root.to_path_buf())
    }

    #[test]
    fn test_scan_filters_extensions_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.mp3", b"a");
        write_file(dir.path(), "notes.txt", b"n");
        write_file(dir.path(), ".hidden.mp3", b"h");
        write_file(dir.path(), "sub/b.flac", b"b");

        let found = scan(&config_for(dir.path())).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp3", "b.flac"]);
    }

    #[test]
    fn test_scan_skips_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "keep/a.mp3", b"a");
        write_file(dir.path(), ".git/b.mp3", b"b");
        write_file(dir.path(), "node_modules/c.mp3", b"c");

        let found = scan(&config_for(dir.path())).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("keep/a.mp3"));
    }

    #[test]
    fn test_scan_invalid_root() {
        let err = scan(&config_for(Path::new("/definitely/not/here"))).unwrap_err();
        assert!(matches!(err, UploadError::InvalidRoot(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_symlink_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "sub/a.mp3", b"a");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        let found = scan(&config_for(dir.path())).unwrap();
        // The walk terminates and the file is reported at most once per
        // distinct path, never endlessly.
        assert!(!found.is_empty());
    }

    #[test]
    fn test_compute_fingerprint_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "x.mp3", b"hello world");
        // md5("hello world")
        assert_eq!(
            compute_fingerprint(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_fingerprint_files_uses_cache_on_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp3", b"aaa");
        let b = write_file(dir.path(), "b.mp3", b"bbb");
        let mut cache = HashCache::open_memory().unwrap();

        let (files, errors) = fingerprint_files(vec![a.clone(), b.clone()], &mut cache, true);
        assert!(errors.is_empty());
        assert!(files.iter().all(|f| !f.cache_hit));

        // Unchanged files: every fingerprint must come from the cache
        let (files, errors) = fingerprint_files(vec![a, b], &mut cache, true);
        assert!(errors.is_empty());
        assert!(files.iter().all(|f| f.cache_hit));
    }

    #[test]
    fn test_fingerprint_files_detects_modification() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp3", b"aaa");
        let mut cache = HashCache::open_memory().unwrap();

        let (files, _) = fingerprint_files(vec![a.clone()], &mut cache, true);
        let first = files[0].fingerprint.clone();

        write_file(dir.path(), "a.mp3", b"aaaa");
        let (files, _) = fingerprint_files(vec![a], &mut cache, true);
        assert!(!files[0].cache_hit);
        assert_ne!(files[0].fingerprint, first);
    }

    #[test]
    fn test_fingerprint_files_bypasses_cache_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mp3", b"aaa");
        let mut cache = HashCache::open_memory().unwrap();

        fingerprint_files(vec![a.clone()], &mut cache, true);
        let (files, _) = fingerprint_files(vec![a], &mut cache, false);
        assert!(!files[0].cache_hit);
    }

    #[test]
    fn test_fingerprint_files_reports_missing_file() {
        let mut cache = HashCache::open_memory().unwrap();
        let (files, errors) =
            fingerprint_files(vec![PathBuf::from("/no/such/file.mp3")], &mut cache, true);
        assert!(files.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
