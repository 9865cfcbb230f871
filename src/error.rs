use std::io;

/// Error taxonomy for the storage emulator.
///
/// `Sql`/`Io`/`Serde` wrap the underlying library error so that callers who
/// want the raw cause can still get at it, while the four named variants
/// carry the text the remote service itself would surface.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Request queue with id: {0} does not exist.")]
    QueueNotFound(String),

    #[error("Request queue name is not unique.")]
    NameConflict(String),

    #[error("Request is not locked or missing: {0}")]
    NotLockedOrMissing(String),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// True if this looks like the directory holding the database file was
    /// missing rather than the database being malformed or locked.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
