//! Engine errors
//!
//! Codes follow the `AERO_ENGINE_*` scheme so they can be matched in logs.

use std::io;

use thiserror::Error;

use super::schema::ColumnKind;
use crate::mvcc::VersionId;
use crate::observability::Severity;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the storage engine
#[derive(Debug, Error)]
pub enum EngineError {
    // ==================
    // Transaction Errors
    // ==================
    /// Operation needs a transaction and the session has none
    #[error("No active transaction")]
    NoActiveTransaction,

    /// A transaction of the given kind is already running on this session
    #[error("A {0} transaction is already in progress")]
    TransactionInProgress(&'static str),

    /// Write attempted through a read-only session
    #[error("Store is opened read-only")]
    ReadOnly,

    /// Session was closed
    #[error("Session is closed")]
    Closed,

    /// Handed-over value was captured at a version this session is not at
    #[error("Handover from version {capsule} cannot be imported at version {current}")]
    VersionMismatch {
        capsule: VersionId,
        current: VersionId,
    },

    // ==================
    // Data Errors
    // ==================
    /// Table does not exist at the session's version
    #[error("No such table: {0}")]
    NoSuchTable(String),

    /// Column index past the end of the table's schema
    #[error("Table '{table}' has no column {column}")]
    NoSuchColumn { table: String, column: usize },

    /// Row has the wrong number of values
    #[error("Row for table '{table}' has {actual} values, expected {expected}")]
    ArityMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// Value does not fit the column's kind
    #[error("Value for column '{column}' of table '{table}' is not {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnKind,
    },

    /// Row index past the end of a table
    #[error("Row {index} out of range for table '{table}'")]
    RowOutOfRange { table: String, index: usize },

    /// Table already exists with different columns
    #[error("Table '{0}' already exists with a different definition")]
    TableConflict(String),

    // ==================
    // Persistence Errors
    // ==================
    /// Store file failed validation
    #[error("Store file corrupted: {0}")]
    Corruption(String),

    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Store file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        EngineError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoActiveTransaction => "AERO_ENGINE_NO_TRANSACTION",
            EngineError::TransactionInProgress(_) => "AERO_ENGINE_TRANSACTION_IN_PROGRESS",
            EngineError::ReadOnly => "AERO_ENGINE_READ_ONLY",
            EngineError::Closed => "AERO_ENGINE_CLOSED",
            EngineError::VersionMismatch { .. } => "AERO_ENGINE_VERSION_MISMATCH",
            EngineError::NoSuchTable(_) => "AERO_ENGINE_NO_SUCH_TABLE",
            EngineError::NoSuchColumn { .. } => "AERO_ENGINE_NO_SUCH_COLUMN",
            EngineError::ArityMismatch { .. } => "AERO_ENGINE_ARITY_MISMATCH",
            EngineError::TypeMismatch { .. } => "AERO_ENGINE_TYPE_MISMATCH",
            EngineError::RowOutOfRange { .. } => "AERO_ENGINE_ROW_OUT_OF_RANGE",
            EngineError::TableConflict(_) => "AERO_ENGINE_TABLE_CONFLICT",
            EngineError::Corruption(_) => "AERO_ENGINE_CORRUPTION",
            EngineError::Io { .. } => "AERO_ENGINE_IO",
            EngineError::Serialization(_) => "AERO_ENGINE_SERIALIZATION",
        }
    }

    /// Corruption means the store file cannot be trusted at all
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Corruption(_))
    }

    pub fn severity(&self) -> Severity {
        if self.is_fatal() {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::ReadOnly.code(), "AERO_ENGINE_READ_ONLY");
        assert_eq!(
            EngineError::NoSuchTable("dogs".into()).code(),
            "AERO_ENGINE_NO_SUCH_TABLE"
        );
    }

    #[test]
    fn test_display_names_the_table() {
        let err = EngineError::ArityMismatch {
            table: "dogs".into(),
            expected: 2,
            actual: 3,
        };
        let message = err.to_string();
        assert!(message.contains("dogs"));
        assert!(message.contains("expected 2"));
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(EngineError::Corruption("bad checksum".into()).is_fatal());
        assert!(!EngineError::Closed.is_fatal());
    }
}
