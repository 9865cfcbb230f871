use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::StorageResult;

/// Process-wide map from database-file path to an open connection.
///
/// One queue per file, one writer per file: this is the simplest scheme
/// that honors SQLite's single-writer discipline while still letting many
/// queues share a process. Generalizes the single static handle the task
/// manager this crate is built from keeps for its one database file into a
/// map keyed by path, since a storage root may have many request queues
/// open at once.
pub struct ConnectionCache {
    handles: AsyncMutex<HashMap<PathBuf, Arc<AsyncMutex<Connection>>>>,
    wal_mode: AtomicBool,
}

impl ConnectionCache {
    pub fn new(enable_wal_mode: bool) -> Self {
        Self {
            handles: AsyncMutex::new(HashMap::new()),
            wal_mode: AtomicBool::new(enable_wal_mode),
        }
    }

    /// Handles opened after this call use the new journaling mode; already
    /// cached handles are left alone.
    pub fn set_wal_mode(&self, enabled: bool) {
        self.wal_mode.store(enabled, Ordering::SeqCst);
    }

    /// Returns the cached handle for `path`, opening (and creating, if
    /// absent) it otherwise. Fails distinguishably with a `NotFound` io
    /// error if the parent directory does not exist.
    pub async fn open(&self, path: &Path) -> StorageResult<Arc<AsyncMutex<Connection>>> {
        let mut handles = self.handles.lock().await;
        if let Some(conn) = handles.get(path) {
            debug!(path = %path.display(), "connection cache hit");
            return Ok(conn.clone());
        }

        debug!(path = %path.display(), "connection cache miss, opening");
        let wal_mode = self.wal_mode.load(Ordering::SeqCst);
        let conn = open_connection(path, wal_mode)?;
        let conn = Arc::new(AsyncMutex::new(conn));
        handles.insert(path.to_path_buf(), conn.clone());
        Ok(conn)
    }

    /// Closes and drops the cached handle for `path`, if any.
    pub async fn close(&self, path: &Path) {
        let mut handles = self.handles.lock().await;
        if handles.remove(path).is_some() {
            debug!(path = %path.display(), "closed cached connection");
        }
    }

    pub async fn close_all(&self) {
        let mut handles = self.handles.lock().await;
        debug!(count = handles.len(), "closing all cached connections");
        handles.clear();
    }
}

fn open_connection(path: &Path, enable_wal_mode: bool) -> StorageResult<Connection> {
    if !path.parent().map_or(false, Path::exists) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("parent directory of {} does not exist", path.display()),
        )
        .into());
    }

    let conn = Connection::open(path)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    if enable_wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    } else {
        conn.pragma_update(None, "journal_mode", "DELETE")?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_fails_when_parent_directory_missing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope/db.sqlite");
        let cache = ConnectionCache::new(true);
        let err = cache.open(&missing).await.unwrap_err();
        assert!(err.is_not_found(), "expected not-found error, got {err:?}");
    }

    #[tokio::test]
    async fn open_caches_the_same_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        let cache = ConnectionCache::new(true);
        let a = cache.open(&path).await.unwrap();
        let b = cache.open(&path).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn close_drops_the_cached_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        let cache = ConnectionCache::new(true);
        let a = cache.open(&path).await.unwrap();
        cache.close(&path).await;
        let b = cache.open(&path).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
