//! Operator-facing migration runner: migrate, rollback, status, dry-run

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::discovery::MigrationDiscovery;
use crate::error::{ErrorCode, MigrationError};
use crate::executor::MigrationExecutor;
use crate::history::HistoryStore;
use crate::lock::MigrationLock;
use crate::record::AppliedMigration;
use crate::sql::SqlConnection;
use crate::validator::{self, ValidationResult};

/// Options for [`MigrationRunner`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// How long to wait for the migration lock before giving up.
    pub lock_timeout: Duration,
    /// Backend name echoed in status reports.
    pub provider_name: String,
    /// Recorded as the applier in the history.
    pub applied_by: Option<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(60),
            provider_name: "default".into(),
            applied_by: None,
        }
    }
}

/// Outcome of a migrate or dry run.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub success: bool,
    /// Migrations applied in this run.
    pub applied_count: usize,
    /// Wall time of the whole run.
    pub duration: Duration,
    /// Versions applied, in order.
    pub applied_migrations: Vec<String>,
    /// Versions a dry run would apply, in order. Empty for a real run.
    pub would_apply: Vec<String>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl MigrationResult {
    fn failed(code: ErrorCode, error: String) -> Self {
        Self {
            success: false,
            applied_count: 0,
            duration: Duration::ZERO,
            applied_migrations: Vec::new(),
            would_apply: Vec::new(),
            error: Some(error),
            error_code: Some(code),
        }
    }
}

/// Outcome of a rollback run.
#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub success: bool,
    /// Migrations rolled back in this run (at most one).
    pub rolled_back_count: usize,
    /// Wall time of the whole run.
    pub duration: Duration,
    /// Latest applied version after the rollback, if any remain.
    pub current_version: Option<String>,
    /// Versions rolled back, in order.
    pub rolled_back_versions: Vec<String>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl RollbackResult {
    fn failed(code: ErrorCode, error: String) -> Self {
        Self {
            success: false,
            rolled_back_count: 0,
            duration: Duration::ZERO,
            current_version: None,
            rolled_back_versions: Vec::new(),
            error: Some(error),
            error_code: Some(code),
        }
    }
}

/// Read-only snapshot of where the schema stands.
#[derive(Debug, Clone)]
pub struct MigrationStatusReport {
    /// Latest applied version by apply time, if any.
    pub current_version: Option<String>,
    /// Applied history, ordered by apply time.
    pub applied_migrations: Vec<AppliedMigration>,
    /// Pending versions, in apply order.
    pub pending_migrations: Vec<String>,
    /// Backend name from the runner options.
    pub provider_name: String,
    /// Whether every applied script still matches its recorded checksum.
    pub checksums_valid: bool,
    /// Human-readable description of each mismatch.
    pub checksum_warnings: Vec<String>,
}

/// Operator-facing orchestrator for deliberate migration operations.
///
/// More permissive than [`crate::MigrationBootstrapper`]: checksum mismatches
/// only warn here, since an operator running `migrate` by hand has already
/// decided to proceed. Version gaps remain fatal. Mutating operations take the
/// distributed lock; `status`, `validate` and `dry_run` are lock-free reads.
pub struct MigrationRunner {
    lock: Box<dyn MigrationLock>,
    discovery: MigrationDiscovery,
    history: Box<dyn HistoryStore>,
    connection: Box<dyn SqlConnection>,
    clock: Arc<dyn Clock>,
    options: RunnerOptions,
}

impl MigrationRunner {
    pub fn new(
        lock: Box<dyn MigrationLock>,
        discovery: MigrationDiscovery,
        history: Box<dyn HistoryStore>,
        connection: Box<dyn SqlConnection>,
        clock: Arc<dyn Clock>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            lock,
            discovery,
            history,
            connection,
            clock,
            options,
        }
    }

    /// Apply every pending migration in version order, stopping at the first
    /// failure.
    pub fn migrate(&mut self) -> MigrationResult {
        let started = self.clock.monotonic();

        match self.lock.try_acquire(self.options.lock_timeout) {
            Ok(true) => {}
            Ok(false) => {
                let e = MigrationError::LockTimeout(self.options.lock_timeout);
                log::error!("migrate failed: {e}");
                return MigrationResult::failed(ErrorCode::LockTimeout, e.to_string());
            }
            Err(e) => {
                log::error!("migrate failed acquiring migration lock: {e}");
                return MigrationResult::failed(e.code(), e.to_string());
            }
        }

        let mut result = self.migrate_locked();

        if let Err(e) = self.lock.release() {
            log::error!("failed to release migration lock after migrate: {e}");
        }

        result.duration = self.clock.monotonic().saturating_sub(started);
        result
    }

    fn migrate_locked(&mut self) -> MigrationResult {
        let validation = match self.validate() {
            Ok(validation) => validation,
            Err(e) => {
                log::error!("migrate validation failed: {e}");
                return MigrationResult::failed(e.code(), e.to_string());
            }
        };

        // Mismatches were already warn-logged by validation; only gaps stop
        // a deliberate migrate.
        if !validation.version_gaps.is_empty() {
            let missing: Vec<&str> = validation
                .version_gaps
                .iter()
                .map(|g| g.missing_version.as_str())
                .collect();
            let message = format!("version gap detected, missing: {}", missing.join(", "));
            log::error!("migrate failed: {message}");
            return MigrationResult::failed(ErrorCode::VersionGapDetected, message);
        }

        let pending = validation.pending_migrations;
        if pending.is_empty() {
            log::info!("schema is up to date, no pending migrations");
            return MigrationResult {
                success: true,
                applied_count: 0,
                duration: Duration::ZERO,
                applied_migrations: Vec::new(),
                would_apply: Vec::new(),
                error: None,
                error_code: None,
            };
        }

        let mut executor = MigrationExecutor::new(
            self.connection.as_mut(),
            self.history.as_ref(),
            self.clock.as_ref(),
            self.options.applied_by.clone(),
        );

        let mut applied = Vec::new();
        for migration in &pending {
            let outcome = executor.apply(migration);
            if !outcome.success {
                let message = outcome
                    .error
                    .unwrap_or_else(|| format!("migration {} failed", migration.version));
                log::error!(
                    "migrate stopped at migration {} after applying {}: {message}",
                    migration.version,
                    applied.len()
                );
                return MigrationResult {
                    success: false,
                    applied_count: applied.len(),
                    duration: Duration::ZERO,
                    applied_migrations: applied,
                    would_apply: Vec::new(),
                    error: Some(message),
                    error_code: outcome.error_code.or(Some(ErrorCode::ExecutionFailed)),
                };
            }
            applied.push(migration.version.clone());
        }

        log::info!("migrate applied {} migration(s)", applied.len());
        MigrationResult {
            success: true,
            applied_count: applied.len(),
            duration: Duration::ZERO,
            applied_migrations: applied,
            would_apply: Vec::new(),
            error: None,
            error_code: None,
        }
    }

    /// Report what [`MigrationRunner::migrate`] would apply, without taking
    /// the lock or touching the database.
    pub fn dry_run(&self) -> MigrationResult {
        let validation = match self.validate() {
            Ok(validation) => validation,
            Err(e) => return MigrationResult::failed(e.code(), e.to_string()),
        };

        if !validation.version_gaps.is_empty() {
            let missing: Vec<&str> = validation
                .version_gaps
                .iter()
                .map(|g| g.missing_version.as_str())
                .collect();
            return MigrationResult::failed(
                ErrorCode::VersionGapDetected,
                format!("version gap detected, missing: {}", missing.join(", ")),
            );
        }

        let would_apply: Vec<String> = validation
            .pending_migrations
            .iter()
            .map(|m| m.version.clone())
            .collect();

        MigrationResult {
            success: true,
            applied_count: 0,
            duration: Duration::ZERO,
            applied_migrations: Vec::new(),
            would_apply,
            error: None,
            error_code: None,
        }
    }

    /// Roll back the most recently applied migration (by apply time).
    pub fn rollback(&mut self) -> RollbackResult {
        let started = self.clock.monotonic();

        match self.lock.try_acquire(self.options.lock_timeout) {
            Ok(true) => {}
            Ok(false) => {
                let e = MigrationError::LockTimeout(self.options.lock_timeout);
                log::error!("rollback failed: {e}");
                return RollbackResult::failed(ErrorCode::LockTimeout, e.to_string());
            }
            Err(e) => {
                log::error!("rollback failed acquiring migration lock: {e}");
                return RollbackResult::failed(e.code(), e.to_string());
            }
        }

        let mut result = self.rollback_locked();

        if let Err(e) = self.lock.release() {
            log::error!("failed to release migration lock after rollback: {e}");
        }

        result.duration = self.clock.monotonic().saturating_sub(started);
        result
    }

    fn rollback_locked(&mut self) -> RollbackResult {
        let latest = match self.history.latest_applied() {
            Ok(latest) => latest,
            Err(e) => {
                log::error!("rollback failed reading migration history: {e}");
                return RollbackResult::failed(e.code(), e.to_string());
            }
        };

        let Some(latest) = latest else {
            let message = "no applied migrations to roll back".to_string();
            log::warn!("{message}");
            return RollbackResult::failed(ErrorCode::RollbackFailed, message);
        };

        let discovered = match self.discovery.discover() {
            Ok(discovered) => discovered,
            Err(e) => {
                log::error!("rollback discovery failed: {e}");
                return RollbackResult::failed(e.code(), e.to_string());
            }
        };

        let Some(target) = discovered.iter().find(|m| m.version == latest.version) else {
            let message = format!(
                "script for applied migration {} is no longer discoverable",
                latest.version
            );
            log::error!("rollback failed: {message}");
            return RollbackResult::failed(ErrorCode::RollbackFailed, message);
        };

        let mut executor = MigrationExecutor::new(
            self.connection.as_mut(),
            self.history.as_ref(),
            self.clock.as_ref(),
            self.options.applied_by.clone(),
        );

        let outcome = executor.rollback(target);
        if !outcome.success {
            return RollbackResult::failed(
                outcome.error_code.unwrap_or(ErrorCode::RollbackFailed),
                outcome
                    .error
                    .unwrap_or_else(|| format!("rollback of {} failed", target.version)),
            );
        }

        let current_version = match self.history.latest_applied() {
            Ok(latest) => latest.map(|m| m.version),
            Err(e) => {
                log::warn!("could not read current version after rollback: {e}");
                None
            }
        };

        log::info!("rolled back migration {}", target.version);
        RollbackResult {
            success: true,
            rolled_back_count: 1,
            duration: Duration::ZERO,
            current_version,
            rolled_back_versions: vec![target.version.clone()],
            error: None,
            error_code: None,
        }
    }

    /// Read-only snapshot of applied and pending migrations. Takes no lock.
    pub fn status(&self) -> Result<MigrationStatusReport, MigrationError> {
        let validation = self.validate()?;

        let mut applied = self.history.applied_migrations()?;
        applied.sort_by_key(|m| m.applied_at);
        let current_version = applied.last().map(|m| m.version.clone());

        let pending_migrations: Vec<String> = validation
            .pending_migrations
            .iter()
            .map(|m| m.version.clone())
            .collect();

        let checksum_warnings: Vec<String> = validation
            .checksum_mismatches
            .iter()
            .map(|m| {
                format!(
                    "migration {} was modified after being applied at {}",
                    m.version, m.applied_at
                )
            })
            .collect();

        Ok(MigrationStatusReport {
            current_version,
            applied_migrations: applied,
            pending_migrations,
            provider_name: self.options.provider_name.clone(),
            checksums_valid: checksum_warnings.is_empty(),
            checksum_warnings,
        })
    }

    /// Validate discovered migrations against the applied history. Takes no
    /// lock and never mutates.
    pub fn validate(&self) -> Result<ValidationResult, MigrationError> {
        let discovered = self.discovery.discover()?;
        let applied = self.history.applied_migrations()?;
        Ok(validator::validate(&discovered, &applied))
    }
}
