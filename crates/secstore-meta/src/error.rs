use secstore_backend::BackendError;

/// Errors from integrity metadata operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// No digest has been computed or loaded yet.
    #[error("meta data not initialized")]
    NotInitialized,

    /// The backend failed while reading content or persisting the journal.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Encoding or decoding of a snapshot failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An encoded snapshot failed validation.
    #[error("corrupt meta snapshot: {0}")]
    Corrupt(String),

    /// An internal lock was poisoned by a panicking thread.
    #[error("meta lock poisoned: {0}")]
    Poisoned(String),
}

/// Result alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;
