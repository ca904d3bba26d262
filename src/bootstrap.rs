//! Startup gate: strict validation and optional auto-apply before serving

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::discovery::MigrationDiscovery;
use crate::error::{ErrorCode, MigrationError};
use crate::executor::MigrationExecutor;
use crate::history::HistoryStore;
use crate::lock::MigrationLock;
use crate::sql::SqlConnection;
use crate::validator;

/// Options for [`MigrationBootstrapper`].
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// How long to wait for the migration lock before giving up.
    pub lock_timeout: Duration,
    /// Apply pending migrations during bootstrap. When disabled the
    /// bootstrapper only validates and reports what is pending.
    pub auto_migrate: bool,
    /// Recorded as the applier in the history.
    pub applied_by: Option<String>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(60),
            auto_migrate: true,
            applied_by: None,
        }
    }
}

/// Outcome of a bootstrap run. Never an `Err`: the host checks `success` and
/// refuses to start serving when it is false.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    pub success: bool,
    /// Pending migrations found before applying.
    pub pending_count: usize,
    /// Migrations actually applied in this run.
    pub applied_count: usize,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl BootstrapResult {
    fn succeeded(pending_count: usize, applied_count: usize) -> Self {
        Self {
            success: true,
            pending_count,
            applied_count,
            error: None,
            error_code: None,
        }
    }

    fn failed(code: ErrorCode, error: String) -> Self {
        Self::failed_with_pending(code, error, 0)
    }

    /// Validation failures still report how far behind the schema is.
    fn failed_with_pending(code: ErrorCode, error: String, pending_count: usize) -> Self {
        Self {
            success: false,
            pending_count,
            applied_count: 0,
            error: Some(error),
            error_code: Some(code),
        }
    }
}

/// Application-startup orchestrator.
///
/// Stricter than [`crate::MigrationRunner`]: at startup both checksum
/// mismatches and version gaps are fatal, since a host must never serve
/// traffic over a schema whose provenance is in doubt. The whole
/// discover → validate → apply sequence runs under the distributed lock, so
/// concurrent replicas starting at once migrate exactly once.
pub struct MigrationBootstrapper {
    lock: Box<dyn MigrationLock>,
    discovery: MigrationDiscovery,
    history: Box<dyn HistoryStore>,
    connection: Box<dyn SqlConnection>,
    clock: Arc<dyn Clock>,
    options: BootstrapOptions,
}

impl MigrationBootstrapper {
    pub fn new(
        lock: Box<dyn MigrationLock>,
        discovery: MigrationDiscovery,
        history: Box<dyn HistoryStore>,
        connection: Box<dyn SqlConnection>,
        clock: Arc<dyn Clock>,
        options: BootstrapOptions,
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

    /// Run the startup gate: acquire the lock, validate strictly, optionally
    /// apply pending migrations, release the lock.
    pub fn bootstrap(&mut self) -> BootstrapResult {
        log::info!("running migration bootstrap");

        match self.lock.try_acquire(self.options.lock_timeout) {
            Ok(true) => {}
            Ok(false) => {
                let e = MigrationError::LockTimeout(self.options.lock_timeout);
                log::error!("bootstrap failed: {e}");
                return BootstrapResult::failed(ErrorCode::LockTimeout, e.to_string());
            }
            Err(e) => {
                log::error!("bootstrap failed acquiring migration lock: {e}");
                return BootstrapResult::failed(e.code(), e.to_string());
            }
        }

        let result = self.bootstrap_locked();

        // Release no matter how the locked section went.
        if let Err(e) = self.lock.release() {
            log::error!("failed to release migration lock after bootstrap: {e}");
        }

        result
    }

    fn bootstrap_locked(&mut self) -> BootstrapResult {
        let discovered = match self.discovery.discover() {
            Ok(discovered) => discovered,
            Err(e) => {
                log::error!("bootstrap discovery failed: {e}");
                return BootstrapResult::failed(e.code(), e.to_string());
            }
        };

        let applied = match self.history.applied_migrations() {
            Ok(applied) => applied,
            Err(e) => {
                log::error!("bootstrap failed reading migration history: {e}");
                return BootstrapResult::failed(e.code(), e.to_string());
            }
        };

        let validation = validator::validate(&discovered, &applied);

        // Startup is strict: a mismatch means an applied script was edited
        // after the fact, and the schema can no longer be trusted.
        if !validation.checksum_mismatches.is_empty() {
            let versions: Vec<&str> = validation
                .checksum_mismatches
                .iter()
                .map(|m| m.version.as_str())
                .collect();
            let message = format!(
                "checksum mismatch for applied migration(s): {}",
                versions.join(", ")
            );
            log::error!("bootstrap failed: {message}");
            return BootstrapResult::failed_with_pending(
                ErrorCode::ChecksumMismatch,
                message,
                validation.pending_migrations.len(),
            );
        }

        if !validation.version_gaps.is_empty() {
            let missing: Vec<&str> = validation
                .version_gaps
                .iter()
                .map(|g| g.missing_version.as_str())
                .collect();
            let message = format!("version gap detected, missing: {}", missing.join(", "));
            log::error!("bootstrap failed: {message}");
            return BootstrapResult::failed_with_pending(
                ErrorCode::VersionGapDetected,
                message,
                validation.pending_migrations.len(),
            );
        }

        let pending = validation.pending_migrations;
        let pending_count = pending.len();

        if pending_count == 0 {
            log::info!("schema is up to date, no pending migrations");
            return BootstrapResult::succeeded(0, 0);
        }

        if !self.options.auto_migrate {
            log::info!("auto-migrate disabled, {pending_count} migration(s) pending");
            return BootstrapResult::succeeded(pending_count, 0);
        }

        let mut executor = MigrationExecutor::new(
            self.connection.as_mut(),
            self.history.as_ref(),
            self.clock.as_ref(),
            self.options.applied_by.clone(),
        );

        let mut applied_count = 0;
        for migration in &pending {
            let result = executor.apply(migration);
            if !result.success {
                let message = result
                    .error
                    .unwrap_or_else(|| format!("migration {} failed", migration.version));
                log::error!(
                    "bootstrap stopped at migration {} after applying {applied_count} of \
                     {pending_count}: {message}",
                    migration.version
                );
                return BootstrapResult {
                    success: false,
                    pending_count,
                    applied_count,
                    error: Some(message),
                    error_code: result.error_code.or(Some(ErrorCode::ExecutionFailed)),
                };
            }
            applied_count += 1;
        }

        log::info!("bootstrap applied {applied_count} migration(s)");
        BootstrapResult::succeeded(pending_count, applied_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticEmbedded;
    use crate::file_lock::FileMigrationLock;
    use crate::testing::{ManualClock, MemoryDatabase};
    use chrono::Utc;
    use tempfile::TempDir;

    fn bootstrapper(
        db: &MemoryDatabase,
        dir: &TempDir,
        embedded: &'static [(&'static str, &'static str)],
        options: BootstrapOptions,
    ) -> MigrationBootstrapper {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let lock = FileMigrationLock::new(dir.path().join("schemastep.lock"), clock.clone());
        MigrationBootstrapper::new(
            Box::new(lock),
            MigrationDiscovery::new(Box::new(StaticEmbedded(embedded)), dir.path()),
            Box::new(db.history()),
            Box::new(db.connection()),
            clock,
            options,
        )
    }

    #[test]
    fn applies_pending_migrations_in_order() {
        const EMBEDDED: &[(&str, &str)] = &[
            ("001_first.sql", "CREATE TABLE a (id INTEGER);"),
            ("002_second.sql", "CREATE TABLE b (id INTEGER);"),
        ];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");
        let mut b = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default());

        let result = b.bootstrap();

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.pending_count, 2);
        assert_eq!(result.applied_count, 2);
        assert_eq!(
            db.executed(),
            ["CREATE TABLE a (id INTEGER);", "CREATE TABLE b (id INTEGER);"]
        );
    }

    #[test]
    fn up_to_date_schema_succeeds_with_zero_counts() {
        const EMBEDDED: &[(&str, &str)] = &[("001_first.sql", "SELECT 1;")];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");

        let mut first = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default());
        assert!(first.bootstrap().success);

        let mut second = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default());
        let result = second.bootstrap();
        assert!(result.success);
        assert_eq!(result.pending_count, 0);
        assert_eq!(result.applied_count, 0);
    }

    #[test]
    fn auto_migrate_disabled_reports_pending_without_applying() {
        const EMBEDDED: &[(&str, &str)] = &[("001_first.sql", "SELECT 1;")];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");
        let options = BootstrapOptions {
            auto_migrate: false,
            ..BootstrapOptions::default()
        };
        let mut b = bootstrapper(&db, &dir, EMBEDDED, options);

        let result = b.bootstrap();

        assert!(result.success);
        assert_eq!(result.pending_count, 1);
        assert_eq!(result.applied_count, 0);
        assert!(db.executed().is_empty());
    }

    #[test]
    fn checksum_mismatch_is_fatal_at_startup() {
        const ORIGINAL: &[(&str, &str)] = &[("001_first.sql", "CREATE TABLE a (id INTEGER);")];
        const TAMPERED: &[(&str, &str)] = &[("001_first.sql", "CREATE TABLE a (id TEXT);")];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");

        let mut first = bootstrapper(&db, &dir, ORIGINAL, BootstrapOptions::default());
        assert!(first.bootstrap().success);

        let mut second = bootstrapper(&db, &dir, TAMPERED, BootstrapOptions::default());
        let result = second.bootstrap();

        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::ChecksumMismatch));
        assert!(result.error.expect("error").contains("001"));
    }

    #[test]
    fn validation_failure_still_reports_how_many_are_pending() {
        const ORIGINAL: &[(&str, &str)] = &[("001_first.sql", "CREATE TABLE a (id INTEGER);")];
        const TAMPERED: &[(&str, &str)] = &[
            ("001_first.sql", "CREATE TABLE a (id TEXT);"),
            ("002_second.sql", "CREATE TABLE b (id INTEGER);"),
        ];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");

        let mut first = bootstrapper(&db, &dir, ORIGINAL, BootstrapOptions::default());
        assert!(first.bootstrap().success);

        let mut second = bootstrapper(&db, &dir, TAMPERED, BootstrapOptions::default());
        let result = second.bootstrap();

        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::ChecksumMismatch));
        assert_eq!(result.pending_count, 1, "operator must see the backlog");
        assert_eq!(result.applied_count, 0);
    }

    #[test]
    fn version_gap_is_fatal_at_startup() {
        const EMBEDDED: &[(&str, &str)] = &[
            ("001_first.sql", "SELECT 1;"),
            ("003_third.sql", "SELECT 3;"),
        ];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");
        let mut b = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default());

        let result = b.bootstrap();

        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::VersionGapDetected));
        assert!(result.error.expect("error").contains("002"));
        assert_eq!(result.pending_count, 2, "both discovered migrations are pending");
        assert!(db.executed().is_empty(), "nothing applies past a gap");
    }

    #[test]
    fn held_lock_fails_bootstrap_with_lock_timeout() {
        const EMBEDDED: &[(&str, &str)] = &[("001_first.sql", "SELECT 1;")];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut holder =
            FileMigrationLock::new(dir.path().join("schemastep.lock"), clock.clone());
        assert!(holder
            .try_acquire(Duration::from_secs(1))
            .expect("acquire"));

        // Same simulated clock: the holder's record never goes stale within
        // the bootstrap timeout.
        let lock = FileMigrationLock::new(dir.path().join("schemastep.lock"), clock.clone());
        let mut b = MigrationBootstrapper::new(
            Box::new(lock),
            MigrationDiscovery::new(Box::new(StaticEmbedded(EMBEDDED)), dir.path()),
            Box::new(db.history()),
            Box::new(db.connection()),
            clock,
            BootstrapOptions {
                lock_timeout: Duration::from_millis(300),
                ..BootstrapOptions::default()
            },
        );

        let result = b.bootstrap();

        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::LockTimeout));
        assert!(db.executed().is_empty());
    }

    #[test]
    fn stops_at_first_failing_migration_with_partial_counts() {
        const EMBEDDED: &[(&str, &str)] = &[
            ("001_first.sql", "CREATE TABLE good (id INTEGER);"),
            ("002_second.sql", "CREATE TABLE broken (id INTEGER);"),
            ("003_third.sql", "CREATE TABLE never (id INTEGER);"),
        ];
        let db = MemoryDatabase::new();
        db.fail_on("CREATE TABLE broken");
        let dir = TempDir::new().expect("tempdir");
        let mut b = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default());

        let result = b.bootstrap();

        assert!(!result.success);
        assert_eq!(result.pending_count, 3);
        assert_eq!(result.applied_count, 1);
        assert_eq!(result.error_code, Some(ErrorCode::ExecutionFailed));
        // Only the committed migration is visible.
        assert_eq!(db.executed(), ["CREATE TABLE good (id INTEGER);"]);
        let history = db.history().applied_migrations().expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, "001");
    }

    #[test]
    fn lock_is_released_even_when_validation_fails() {
        const EMBEDDED: &[(&str, &str)] = &[
            ("001_first.sql", "SELECT 1;"),
            ("003_third.sql", "SELECT 3;"),
        ];
        let db = MemoryDatabase::new();
        let dir = TempDir::new().expect("tempdir");

        let mut failing = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default());
        assert!(!failing.bootstrap().success);

        assert!(
            !dir.path().join("schemastep.lock").exists(),
            "lock file must be gone after bootstrap"
        );
    }
}
