use std::fmt;

use secstore_backend::BackendError;
use secstore_meta::MetaError;
use secstore_types::{StoragePath, TypeError};

/// Errors returned by [`PathStore`](crate::PathStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No content or metadata exists at the target.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's buffer is too small. Nothing was copied.
    #[error("buffer too small: {required} bytes required, {provided} provided")]
    Overflow { required: usize, provided: usize },

    /// The path is malformed, reserved, or names the wrong kind of entry.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// The medium cannot hold the requested bytes.
    #[error("no space: requested {requested} bytes, {available} available")]
    NoSpace { requested: u64, available: u64 },

    /// The backend is unreachable, a rebuild is running, or a lock wait
    /// timed out. Safe to retry.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The copy or move destination already holds content.
    #[error("destination not empty: {0}")]
    DestinationNotEmpty(StoragePath),

    /// Stored content does not match the integrity metadata.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Internal failure: poisoned lock, serialization, or I/O.
    #[error("fault: {0}")]
    Fault(String),
}

/// Coarse error taxonomy for callers that branch on category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Overflow,
    BadParameter,
    ResourceExhausted,
    Unavailable,
    DestinationNotEmpty,
    Fault,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::Overflow => "overflow",
            ErrorKind::BadParameter => "bad-parameter",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DestinationNotEmpty => "destination-not-empty",
            ErrorKind::Fault => "fault",
        };
        f.write_str(name)
    }
}

impl StoreError {
    /// The taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Overflow { .. } => ErrorKind::Overflow,
            StoreError::BadParameter(_) => ErrorKind::BadParameter,
            StoreError::NoSpace { .. } => ErrorKind::ResourceExhausted,
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::DestinationNotEmpty(_) => ErrorKind::DestinationNotEmpty,
            StoreError::IntegrityViolation(_) | StoreError::Fault(_) => ErrorKind::Fault,
        }
    }

    /// Only unavailability clears up without remediation.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    pub(crate) fn not_found(path: &StoragePath) -> Self {
        StoreError::NotFound(path.to_string())
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(path) => StoreError::not_found(&path),
            BackendError::IsDirectory(path) => {
                StoreError::BadParameter(format!("{path} is a directory"))
            }
            BackendError::NotADirectory(path) => {
                StoreError::BadParameter(format!("{path} is a leaf, not a directory"))
            }
            BackendError::AlreadyExists(path) => StoreError::DestinationNotEmpty(path),
            BackendError::NoSpace {
                requested,
                available,
            } => StoreError::NoSpace {
                requested,
                available,
            },
            BackendError::Unavailable(msg) => StoreError::Unavailable(msg),
            BackendError::Io(e) => StoreError::Fault(format!("I/O error: {e}")),
            BackendError::Fault(msg) => StoreError::Fault(msg),
        }
    }
}

impl From<MetaError> for StoreError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::NotInitialized => StoreError::NotFound("meta data".into()),
            MetaError::Backend(e) => e.into(),
            MetaError::Corrupt(msg) => StoreError::IntegrityViolation(msg),
            MetaError::Serialization(msg) | MetaError::Poisoned(msg) => StoreError::Fault(msg),
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        StoreError::BadParameter(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(StoreError::Unavailable("offline".into()).is_retryable());
        assert!(!StoreError::Fault("boom".into()).is_retryable());
        assert!(!StoreError::NoSpace {
            requested: 1,
            available: 0
        }
        .is_retryable());
    }

    #[test]
    fn backend_errors_map_to_taxonomy() {
        let path = StoragePath::parse("/a").unwrap();
        let cases = [
            (BackendError::NotFound(path.clone()), ErrorKind::NotFound),
            (BackendError::IsDirectory(path.clone()), ErrorKind::BadParameter),
            (BackendError::AlreadyExists(path.clone()), ErrorKind::DestinationNotEmpty),
            (
                BackendError::NoSpace {
                    requested: 2,
                    available: 1,
                },
                ErrorKind::ResourceExhausted,
            ),
            (BackendError::Unavailable("x".into()), ErrorKind::Unavailable),
            (BackendError::Fault("x".into()), ErrorKind::Fault),
        ];
        for (err, kind) in cases {
            assert_eq!(StoreError::from(err).kind(), kind);
        }
    }

    #[test]
    fn missing_meta_is_not_found() {
        let err: StoreError = MetaError::NotInitialized.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(ErrorKind::ResourceExhausted.to_string(), "resource-exhausted");
    }
}
