//! Object store error types

use crate::error::ErrorKind;
use crate::query::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur talking to a blob store
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    /// Bucket does not exist
    #[error("Bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    /// Object does not exist
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Conditional write lost a race
    #[error("Precondition failed for {bucket}/{key}: {reason}")]
    PreconditionFailed {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Bucket name or key cannot be stored by this backend
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Object was rewritten between reading its version and its bytes
    #[error("Version of {bucket}/{key} changed from {expected} to {found} during read")]
    VersionChanged {
        bucket: String,
        key: String,
        expected: String,
        found: String,
    },

    /// Backend call exceeded the request timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored object metadata could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Select expression could not be compiled
    #[error("Invalid select expression: {0}")]
    InvalidSelect(#[from] QueryError),

    /// Select input could not be read as the requested format
    #[error("Select error: {0}")]
    Select(String),
}

impl ObjectStoreError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ObjectStoreError::BucketNotFound { .. } | ObjectStoreError::ObjectNotFound { .. } => {
                ErrorKind::NotFound
            }
            ObjectStoreError::InvalidSelect(_) => ErrorKind::InvalidQuery,
            ObjectStoreError::Serialization(_) | ObjectStoreError::Select(_) => {
                ErrorKind::Serialization
            }
            ObjectStoreError::PreconditionFailed { .. }
            | ObjectStoreError::VersionChanged { .. }
            | ObjectStoreError::InvalidName(_)
            | ObjectStoreError::Timeout { .. }
            | ObjectStoreError::Io(_) => ErrorKind::IoFailure,
        }
    }

    /// True for missing buckets and objects
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for ObjectStoreError {
    fn from(err: serde_json::Error) -> Self {
        ObjectStoreError::Serialization(err.to_string())
    }
}

/// Result type alias for object store operations
pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;
