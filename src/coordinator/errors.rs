//! # Coordinator Errors
//!
//! Errors surfaced synchronously to whoever opens a store handle.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::config::ConfigField;
use crate::engine::EngineError;
use crate::observability::Severity;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    // ==================
    // Configuration Errors
    // ==================
    /// A later opener disagrees with the path's established configuration
    #[error("Store at '{path}' already opened with {field}")]
    ConfigMismatch { field: ConfigField, path: PathBuf },

    /// A later opener's schema has a table that differs from the existing one
    #[error("Store at '{path}' already has a different definition of table '{table}'")]
    SchemaMismatch { table: String, path: PathBuf },

    // ==================
    // Runtime Errors
    // ==================
    /// The handle was closed, or its coordinator was cleared
    #[error("Store handle is closed")]
    HandleClosed,

    /// Storage engine failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The notifier pump could not be started
    #[error("Failed to start commit notifier: {0}")]
    Notifier(#[source] io::Error),
}

impl CoordinatorError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::ConfigMismatch { .. } => "AERO_COORDINATOR_CONFIG_MISMATCH",
            CoordinatorError::SchemaMismatch { .. } => "AERO_COORDINATOR_SCHEMA_MISMATCH",
            CoordinatorError::HandleClosed => "AERO_COORDINATOR_HANDLE_CLOSED",
            CoordinatorError::Engine(err) => err.code(),
            CoordinatorError::Notifier(_) => "AERO_COORDINATOR_NOTIFIER",
        }
    }

    /// Whether the caller can fix this by choosing a compatible configuration
    pub fn is_config_conflict(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ConfigMismatch { .. } | CoordinatorError::SchemaMismatch { .. }
        )
    }

    /// Conflicts are the caller's to fix; everything else is an engine fault
    pub fn severity(&self) -> Severity {
        match self {
            CoordinatorError::Engine(err) => err.severity(),
            CoordinatorError::Notifier(_) => Severity::Error,
            _ => Severity::Warn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_mismatch_names_field() {
        let err = CoordinatorError::ConfigMismatch {
            field: ConfigField::InMemory,
            path: PathBuf::from("/data/a.aero"),
        };
        assert_eq!(
            err.to_string(),
            "Store at '/data/a.aero' already opened with different in-memory settings"
        );
        assert!(err.is_config_conflict());
        assert_eq!(err.code(), "AERO_COORDINATOR_CONFIG_MISMATCH");
    }

    #[test]
    fn test_engine_errors_keep_their_code() {
        let err = CoordinatorError::from(EngineError::ReadOnly);
        assert_eq!(err.code(), "AERO_ENGINE_READ_ONLY");
        assert!(!err.is_config_conflict());
        assert_eq!(err.severity(), Severity::Error);
    }

    #[test]
    fn test_corruption_is_fatal() {
        let err = CoordinatorError::from(EngineError::Corruption("bad checksum".into()));
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(CoordinatorError::HandleClosed.severity(), Severity::Warn);
    }
}
