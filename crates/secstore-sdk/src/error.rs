use thiserror::Error;

use secstore_backend::BackendError;
use secstore_store::{ErrorKind, StoreError};
use secstore_types::TypeError;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SdkError {
    /// Store taxonomy bucket, if the error came from a storage operation.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SdkError::Store(e) => Some(e.kind()),
            SdkError::Config(_) | SdkError::Io(_) => None,
        }
    }
}

impl From<BackendError> for SdkError {
    fn from(err: BackendError) -> Self {
        SdkError::Store(err.into())
    }
}

impl From<TypeError> for SdkError {
    fn from(err: TypeError) -> Self {
        SdkError::Store(err.into())
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
