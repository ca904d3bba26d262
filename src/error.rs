//! Migration-specific error types and operator-facing error codes

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Structured, operator-facing error codes.
///
/// Every failure surfaced through a result shape carries one of these codes so
/// operators and tooling can react without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A migration script failed during execution (MIG-001).
    ExecutionFailed,
    /// The migration lock could not be acquired within the timeout (MIG-002).
    LockTimeout,
    /// An applied migration's script no longer matches its recorded checksum (MIG-003).
    ChecksumMismatch,
    /// A rollback was requested for a migration without a down script (MIG-004).
    MissingDownScript,
    /// A rollback failed during execution (MIG-005).
    RollbackFailed,
    /// A hole was detected in the numeric version sequence (MIG-006).
    VersionGapDetected,
    /// The database connection failed during a migration operation (MIG-007).
    ConnectionFailed,
    /// A pre-migration backup could not be created (MIG-008).
    BackupFailed,
    /// Two migration sources provided the same version (MIG-009).
    DuplicateVersion,
}

impl ErrorCode {
    /// Stable string form of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ExecutionFailed => "MIG-001",
            ErrorCode::LockTimeout => "MIG-002",
            ErrorCode::ChecksumMismatch => "MIG-003",
            ErrorCode::MissingDownScript => "MIG-004",
            ErrorCode::RollbackFailed => "MIG-005",
            ErrorCode::VersionGapDetected => "MIG-006",
            ErrorCode::ConnectionFailed => "MIG-007",
            ErrorCode::BackupFailed => "MIG-008",
            ErrorCode::DuplicateVersion => "MIG-009",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the migration engine.
///
/// Only discovery-time structural defects and collaborator failures unwind as
/// `Err`. Everything past discovery is reported through typed result shapes
/// ([`crate::BootstrapResult`], [`crate::MigrationResult`], ...) so orchestrators
/// choose whether to stop, continue, or surface.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two sources (embedded or file) yielded the same migration version.
    /// This is a structural defect in the migration set, not a runtime state.
    #[error("duplicate migration version '{0}': two sources provide the same version")]
    DuplicateVersion(String),

    /// A migration file or lock file could not be read or written.
    #[error("migration i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by the SQL or history collaborator.
    #[error("database error: {0}")]
    Database(String),

    /// The migration lock could not be acquired within the timeout.
    #[error("could not acquire migration lock within {0:?}")]
    LockTimeout(Duration),

    /// A migration script failed while executing.
    #[error("migration '{version}' failed during execution: {detail}")]
    ExecutionFailed { version: String, detail: String },

    /// A rollback was requested for a migration that has no down script.
    #[error("migration '{0}' does not have a down script for rollback")]
    MissingDownScript(String),
}

impl MigrationError {
    /// Wrap a collaborator error as a database failure.
    pub fn database(error: impl fmt::Display) -> Self {
        MigrationError::Database(error.to_string())
    }

    /// The operator-facing code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            MigrationError::DuplicateVersion(_) => ErrorCode::DuplicateVersion,
            MigrationError::Io { .. } => ErrorCode::ExecutionFailed,
            MigrationError::Database(_) => ErrorCode::ConnectionFailed,
            MigrationError::LockTimeout(_) => ErrorCode::LockTimeout,
            MigrationError::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            MigrationError::MissingDownScript(_) => ErrorCode::MissingDownScript,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ErrorCode::ExecutionFailed.as_str(), "MIG-001");
        assert_eq!(ErrorCode::LockTimeout.as_str(), "MIG-002");
        assert_eq!(ErrorCode::ChecksumMismatch.as_str(), "MIG-003");
        assert_eq!(ErrorCode::MissingDownScript.as_str(), "MIG-004");
        assert_eq!(ErrorCode::RollbackFailed.as_str(), "MIG-005");
        assert_eq!(ErrorCode::VersionGapDetected.as_str(), "MIG-006");
        assert_eq!(ErrorCode::ConnectionFailed.as_str(), "MIG-007");
        assert_eq!(ErrorCode::BackupFailed.as_str(), "MIG-008");
        assert_eq!(ErrorCode::DuplicateVersion.as_str(), "MIG-009");
    }

    #[test]
    fn duplicate_version_maps_to_its_code() {
        let err = MigrationError::DuplicateVersion("003".into());
        assert_eq!(err.code(), ErrorCode::DuplicateVersion);
        assert!(err.to_string().contains("003"));
    }

    #[test]
    fn missing_down_script_message_mentions_down_script() {
        let err = MigrationError::MissingDownScript("002".into());
        assert!(err.to_string().contains("down script"));
        assert_eq!(err.code(), ErrorCode::MissingDownScript);
    }
}
