//! Transactional execution of a single migration

use std::time::Duration;

use crate::clock::Clock;
use crate::error::{ErrorCode, MigrationError};
use crate::history::HistoryStore;
use crate::migration::Migration;
use crate::record::AppliedMigration;
use crate::sql::{SqlConnection, SqlTransaction};

/// Outcome of applying or rolling back one migration.
///
/// The executor never panics and never returns `Err`: every failure is carried
/// in the result so orchestrators decide how to react.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub version: String,
    /// The SQL execution span only, not bookkeeping.
    pub duration: Duration,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl ExecutionResult {
    fn succeeded(version: &str, duration: Duration) -> Self {
        Self {
            success: true,
            version: version.to_string(),
            duration,
            error: None,
            error_code: None,
        }
    }

    fn failed(version: &str, duration: Duration, code: ErrorCode, error: String) -> Self {
        Self {
            success: false,
            version: version.to_string(),
            duration,
            error: Some(error),
            error_code: Some(code),
        }
    }
}

/// Applies or rolls back one migration inside a single transaction.
///
/// The schema change and its history bookkeeping commit together or not at
/// all. The executor performs no locking of its own; callers are expected to
/// hold the distributed migration lock.
pub struct MigrationExecutor<'a> {
    connection: &'a mut dyn SqlConnection,
    history: &'a dyn HistoryStore,
    clock: &'a dyn Clock,
    applied_by: Option<String>,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(
        connection: &'a mut dyn SqlConnection,
        history: &'a dyn HistoryStore,
        clock: &'a dyn Clock,
        applied_by: Option<String>,
    ) -> Self {
        Self {
            connection,
            history,
            clock,
            applied_by,
        }
    }

    /// Apply a migration: execute its up script and record it in the history,
    /// both inside one transaction.
    pub fn apply(&mut self, migration: &Migration) -> ExecutionResult {
        log::info!("applying migration {}", migration.version);

        let mut tx = match self.connection.begin() {
            Ok(tx) => tx,
            Err(e) => {
                log::error!(
                    "failed to open transaction for migration {}: {e}",
                    migration.version
                );
                return ExecutionResult::failed(
                    &migration.version,
                    Duration::ZERO,
                    ErrorCode::ConnectionFailed,
                    e.to_string(),
                );
            }
        };

        let started = self.clock.monotonic();
        if let Err(e) = tx.execute(&migration.up_content) {
            let duration = self.clock.monotonic().saturating_sub(started);
            log::error!("migration {} failed: {e}", migration.version);
            rollback_quietly(tx, &migration.version);
            return ExecutionResult::failed(
                &migration.version,
                duration,
                ErrorCode::ExecutionFailed,
                e.to_string(),
            );
        }
        let duration = self.clock.monotonic().saturating_sub(started);

        let record = AppliedMigration::applied(
            &migration.version,
            &migration.checksum,
            self.clock.now(),
            duration,
            self.applied_by.clone(),
        );
        if let Err(e) = self.history.record(tx.as_mut(), &record) {
            log::error!(
                "failed to record migration {} in history: {e}",
                migration.version
            );
            rollback_quietly(tx, &migration.version);
            return ExecutionResult::failed(
                &migration.version,
                duration,
                ErrorCode::ExecutionFailed,
                e.to_string(),
            );
        }

        if let Err(e) = tx.commit() {
            log::error!("failed to commit migration {}: {e}", migration.version);
            return ExecutionResult::failed(
                &migration.version,
                duration,
                ErrorCode::ExecutionFailed,
                e.to_string(),
            );
        }

        log::info!(
            "applied migration {} in {}ms",
            migration.version,
            duration.as_millis()
        );
        ExecutionResult::succeeded(&migration.version, duration)
    }

    /// Roll a migration back: execute its down script and remove its history
    /// record, both inside one transaction.
    ///
    /// A missing down script is an expected, recoverable condition reported as
    /// a failed result, not an error.
    pub fn rollback(&mut self, migration: &Migration) -> ExecutionResult {
        let Some(down_content) = migration.down_content.as_deref() else {
            log::warn!(
                "migration {} has no down script for rollback",
                migration.version
            );
            return ExecutionResult::failed(
                &migration.version,
                Duration::ZERO,
                ErrorCode::MissingDownScript,
                MigrationError::MissingDownScript(migration.version.clone()).to_string(),
            );
        };

        log::info!("rolling back migration {}", migration.version);

        let mut tx = match self.connection.begin() {
            Ok(tx) => tx,
            Err(e) => {
                return ExecutionResult::failed(
                    &migration.version,
                    Duration::ZERO,
                    ErrorCode::ConnectionFailed,
                    e.to_string(),
                );
            }
        };

        let started = self.clock.monotonic();
        if let Err(e) = tx.execute(down_content) {
            let duration = self.clock.monotonic().saturating_sub(started);
            log::error!("rollback of migration {} failed: {e}", migration.version);
            rollback_quietly(tx, &migration.version);
            return ExecutionResult::failed(
                &migration.version,
                duration,
                ErrorCode::RollbackFailed,
                e.to_string(),
            );
        }
        let duration = self.clock.monotonic().saturating_sub(started);

        if let Err(e) = self.history.remove(tx.as_mut(), &migration.version) {
            log::error!(
                "failed to remove migration {} from history: {e}",
                migration.version
            );
            rollback_quietly(tx, &migration.version);
            return ExecutionResult::failed(
                &migration.version,
                duration,
                ErrorCode::RollbackFailed,
                e.to_string(),
            );
        }

        if let Err(e) = tx.commit() {
            return ExecutionResult::failed(
                &migration.version,
                duration,
                ErrorCode::RollbackFailed,
                e.to_string(),
            );
        }

        log::info!(
            "rolled back migration {} in {}ms",
            migration.version,
            duration.as_millis()
        );
        ExecutionResult::succeeded(&migration.version, duration)
    }
}

/// Roll the transaction back; a rollback failure only gets logged since the
/// original error is what the caller needs to see.
fn rollback_quietly(tx: Box<dyn SqlTransaction + '_>, version: &str) {
    if let Err(e) = tx.rollback() {
        log::error!("failed to roll back transaction for migration {version}: {e}");
    }
}
