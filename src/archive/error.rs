//! Archive error types

use crate::error::ErrorKind;
use crate::events::EventStoreError;
use crate::objects::ObjectStoreError;
use crate::query::QueryError;
use thiserror::Error;

/// Errors that can occur while archiving or restoring
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Blob store call failed
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// Source or destination event store failed
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Filters could not be compiled
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Chunk encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Chunk framing or checksum mismatch
    #[error("Corrupt chunk: {0}")]
    Corruption(String),

    /// Window size must be positive
    #[error("Invalid window size: {0}")]
    InvalidWindow(i64),

    /// Conditional chunk write kept losing races
    #[error("Write conflict on {key} after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    /// One chunk failed; the listed chunks had already completed
    #[error("Chunk {key} failed after {} chunk(s) completed: {source}", .completed.len())]
    ChunkFailed {
        key: String,
        completed: Vec<String>,
        source: Box<ArchiveError>,
    },
}

impl ArchiveError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::ObjectStore(err) => err.kind(),
            ArchiveError::EventStore(err) => err.kind(),
            ArchiveError::InvalidQuery(_) | ArchiveError::InvalidWindow(_) => {
                ErrorKind::InvalidQuery
            }
            ArchiveError::Serialization(_) | ArchiveError::Corruption(_) => {
                ErrorKind::Serialization
            }
            ArchiveError::Conflict { .. } => ErrorKind::IoFailure,
            ArchiveError::ChunkFailed { source, .. } => source.kind(),
        }
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Serialization(err.to_string())
    }
}

/// Result type alias for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;
