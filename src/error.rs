//! Error classification shared by every layer
//!
//! Each module defines its own error enum; [`ErrorKind`] folds them into the
//! four categories callers branch on.

/// Coarse category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing bucket, object or namespace
    NotFound,
    /// Malformed metadata, dimension or select query
    InvalidQuery,
    /// Transport, storage, timeout or write-conflict failure
    IoFailure,
    /// Chunk or log content that cannot be decoded
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::InvalidQuery => write!(f, "invalid-query"),
            ErrorKind::IoFailure => write!(f, "io-failure"),
            ErrorKind::Serialization => write!(f, "serialization"),
        }
    }
}
