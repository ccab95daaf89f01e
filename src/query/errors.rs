//! # Query Errors
//!
//! The terminal fault of an async query. Every observer receives its own
//! copy, so the type is `Clone`.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for async query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Async query faults
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Evaluating the query failed
    #[error("Query failed ({code}): {message}")]
    Execution { code: &'static str, message: String },

    /// The session the query ran against was closed under it
    #[error("Query source was closed")]
    SourceClosed,
}

impl QueryError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Execution { .. } => "AERO_QUERY_EXECUTION",
            QueryError::SourceClosed => "AERO_QUERY_SOURCE_CLOSED",
        }
    }
}

impl From<EngineError> for QueryError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Closed => QueryError::SourceClosed,
            other => QueryError::Execution {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_engine_error_keeps_code() {
        let err = QueryError::from(EngineError::NoSuchTable("dogs".into()));
        assert_eq!(err.code(), "AERO_QUERY_EXECUTION");
        match &err {
            QueryError::Execution { code, message } => {
                assert_eq!(*code, "AERO_ENGINE_NO_SUCH_TABLE");
                assert!(message.contains("dogs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_closed_maps_to_source_closed() {
        assert_eq!(QueryError::from(EngineError::Closed), QueryError::SourceClosed);
    }
}
