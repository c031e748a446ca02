//! Query error types
//!
//! Defines the error conditions raised while compiling event filters and
//! select expressions.

use crate::error::ErrorKind;
use thiserror::Error;

/// Errors that can occur during query compilation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A metadata filter entry could not be compiled
    #[error("Invalid metadata query for '{key}': {reason}")]
    InvalidMetadataQuery { key: String, reason: String },

    /// A dimension filter entry could not be compiled
    #[error("Invalid dimension query for '{key}': {reason}")]
    InvalidDimensionQuery { key: String, reason: String },

    /// Wildcard or LIKE pattern produced an unusable regex
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Select expression parsing failed
    #[error("Parse error: {0}")]
    Parse(String),
}

impl QueryError {
    /// Every query error is the caller's fault
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidQuery
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::InvalidDimensionQuery {
            key: "cpu".to_string(),
            reason: "'abc' is not a number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid dimension query for 'cpu': 'abc' is not a number"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }
}
