//! Event store error types
//!
//! Defines all errors that can occur in the hot stores and the tiered facade.

use crate::archive::ArchiveError;
use crate::error::ErrorKind;
use crate::query::QueryError;
use thiserror::Error;

/// Errors that can occur in an event store
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, truncated record)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Metadata or dimension filter could not be compiled
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Namespace name is not usable
    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),

    /// WAL format or recovery error
    #[error("WAL error: {0}")]
    Wal(String),

    /// Cold tier operation failed
    #[error("Archive error: {0}")]
    Archive(Box<ArchiveError>),
}

impl EventStoreError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::Io(_) | EventStoreError::Wal(_) => ErrorKind::IoFailure,
            EventStoreError::Serialization(_) | EventStoreError::Corruption(_) => {
                ErrorKind::Serialization
            }
            EventStoreError::InvalidQuery(_) | EventStoreError::InvalidNamespace(_) => {
                ErrorKind::InvalidQuery
            }
            EventStoreError::Archive(err) => err.kind(),
        }
    }
}

impl From<ArchiveError> for EventStoreError {
    fn from(err: ArchiveError) -> Self {
        EventStoreError::Archive(Box::new(err))
    }
}

impl From<bincode::Error> for EventStoreError {
    fn from(err: bincode::Error) -> Self {
        EventStoreError::Serialization(err.to_string())
    }
}

/// Result type alias for event store operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;
