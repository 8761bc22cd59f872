use secstore_types::StoragePath;

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Nothing exists at the path.
    #[error("not found: {0}")]
    NotFound(StoragePath),

    /// The path names a directory where a leaf was required.
    #[error("is a directory: {0}")]
    IsDirectory(StoragePath),

    /// An ancestor of the path is a leaf, so the path cannot exist.
    #[error("not a directory: {0}")]
    NotADirectory(StoragePath),

    /// The destination of a rename already exists.
    #[error("already exists: {0}")]
    AlreadyExists(StoragePath),

    /// The medium has no room for the requested bytes.
    #[error("no space: requested {requested} bytes, {available} available")]
    NoSpace { requested: u64, available: u64 },

    /// The medium is currently inaccessible.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal backend failure (poisoned lock, injected fault).
    #[error("backend fault: {0}")]
    Fault(String),
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
