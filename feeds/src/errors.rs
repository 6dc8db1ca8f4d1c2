use crate::storage::StorageError;
use thiserror::Error;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Errors surfaced by the registry to its callers.
#[derive(Error, Debug, PartialEq)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(id) => ServiceError::Conflict(id),
            StorageError::NotFound(id) => ServiceError::NotFound(id),
            StorageError::InvalidPattern(e) => ServiceError::InvalidInput(e.to_string()),
            other => ServiceError::Unexpected(other.to_string()),
        }
    }
}
