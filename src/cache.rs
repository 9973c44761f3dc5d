//! Persistent fingerprint cache
//!
//! Maps normalized file paths to content fingerprints together with the
//! (size, mtime) signature the fingerprint was computed against. A lookup
//! only hits when the current signature matches the recorded one; stale
//! entries are overwritten by the next store.

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;

/// One persisted cache record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Normalized absolute path (forward slashes on every platform)
    pub path: String,
    /// File size the fingerprint was computed for
    pub size: u64,
    /// File mtime the fingerprint was computed for
    pub mtime: i64,
    /// Content fingerprint (hex digest)
    pub fingerprint: String,
}

/// Normalize path separators for cross-platform cache keys
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Store of path → fingerprint records for the run's lifetime
pub struct HashCache {
    conn: Connection,
    /// True when the on-disk store failed to open and we fell back to an
    /// in-memory store for this run
    degraded: bool,
}

impl HashCache {
    /// Open or create the cache store at `path`.
    ///
    /// A corrupt or unreadable store never aborts the run: it degrades to
    /// an empty in-memory cache, so every fingerprint is recomputed once
    /// and nothing is persisted until the next run with a healthy store.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        match Connection::open(path).and_then(|conn| {
            init_schema(&conn)?;
            Ok(conn)
        }) {
            Ok(conn) => Ok(Self {
                conn,
                degraded: false,
            }),
            Err(err) => {
                log::warn!(
                    "fingerprint cache at {} unusable ({}), starting with an empty cache",
                    path.display(),
                    err
                );
                let cache = Self::open_memory()?;
                Ok(Self {
                    degraded: true,
                    ..cache
                })
            }
        }
    }

    /// Open an in-memory cache (used for tests and degraded mode)
    pub fn open_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            degraded: false,
        })
    }

    /// Whether the on-disk store was unusable this run
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Look up the fingerprint recorded for `path`.
    ///
    /// Returns `None` on a miss or when the recorded (size, mtime) no
    /// longer matches the file, which forces a fresh computation.
    pub fn lookup(&self, path: &Path, size: u64, mtime: i64) -> Option<String> {
        let key = normalize_path(path);
        let row = self
            .conn
            .query_row(
                "SELECT size, mtime, fingerprint FROM fingerprints WHERE path = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional();

        match row {
            Ok(Some((rec_size, rec_mtime, fingerprint))) => {
                if rec_size == size && rec_mtime == mtime {
                    Some(fingerprint)
                } else {
                    log::debug!("stale cache entry for {}", key);
                    None
                }
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("cache lookup failed for {}: {}", key, err);
                None
            }
        }
    }

    /// Upsert a single entry
    pub fn store(&mut self, entry: &CacheEntry) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO fingerprints (path, size, mtime, fingerprint, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.path,
                entry.size as i64,
                entry.mtime,
                entry.fingerprint,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Upsert a batch of entries in one transaction.
    ///
    /// The transaction makes the batch atomic: a crash mid-flush loses the
    /// whole increment but never corrupts prior entries.
    pub fn store_batch(&mut self, entries: &[CacheEntry]) -> SqliteResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO fingerprints (path, size, mtime, fingerprint, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.path,
                    entry.size as i64,
                    entry.mtime,
                    entry.fingerprint,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove every entry (explicit cache reset)
    pub fn reset(&mut self) -> SqliteResult<()> {
        self.conn.execute("DELETE FROM fingerprints", [])?;
        Ok(())
    }

    /// Get the number of cached entries
    pub fn len(&self) -> SqliteResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> SqliteResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn init_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS fingerprints (
            path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fingerprints_fingerprint
            ON fingerprints(fingerprint);
        ",
    )?;
    Ok(())
}
