//! Startup-gate flows over the in-memory backend

use std::sync::Arc;
use std::time::Duration;

use schemastep::testing::{ManualClock, MemoryDatabase};
use schemastep::{
    BootstrapOptions, ErrorCode, FileMigrationLock, HistoryStore, MigrationBootstrapper,
    MigrationDiscovery, MigrationLock, StaticEmbedded,
};
use tempfile::TempDir;

fn bootstrapper(
    db: &MemoryDatabase,
    dir: &TempDir,
    embedded: &'static [(&'static str, &'static str)],
    options: BootstrapOptions,
) -> MigrationBootstrapper {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
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
fn fresh_database_bootstraps_to_the_latest_version() {
    const EMBEDDED: &[(&str, &str)] = &[
        ("001_users.sql", "CREATE TABLE users (id INTEGER);"),
        ("002_orders.sql", "CREATE TABLE orders (id INTEGER);"),
    ];
    let db = MemoryDatabase::new();
    let dir = TempDir::new().expect("tempdir");

    let result = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default()).bootstrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.pending_count, 2);
    assert_eq!(result.applied_count, 2);
    let history = db.history().applied_migrations().expect("history");
    assert_eq!(history.len(), 2);
}

#[test]
fn auto_migrate_disabled_only_reports_pending() {
    const EMBEDDED: &[(&str, &str)] = &[("001_users.sql", "CREATE TABLE users (id INTEGER);")];
    let db = MemoryDatabase::new();
    let dir = TempDir::new().expect("tempdir");
    let options = BootstrapOptions {
        auto_migrate: false,
        ..BootstrapOptions::default()
    };

    let result = bootstrapper(&db, &dir, EMBEDDED, options).bootstrap();

    assert!(result.success);
    assert_eq!(result.pending_count, 1);
    assert_eq!(result.applied_count, 0);
    assert!(db.executed().is_empty());
}

#[test]
fn tampered_applied_script_blocks_startup() {
    const ORIGINAL: &[(&str, &str)] = &[("001_users.sql", "CREATE TABLE users (id INTEGER);")];
    const TAMPERED: &[(&str, &str)] = &[("001_users.sql", "CREATE TABLE users (id BIGINT);")];
    let db = MemoryDatabase::new();
    let dir = TempDir::new().expect("tempdir");
    assert!(bootstrapper(&db, &dir, ORIGINAL, BootstrapOptions::default())
        .bootstrap()
        .success);

    let result = bootstrapper(&db, &dir, TAMPERED, BootstrapOptions::default()).bootstrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::ChecksumMismatch));
}

#[test]
fn version_gap_blocks_startup_before_anything_applies() {
    const EMBEDDED: &[(&str, &str)] = &[
        ("001_users.sql", "CREATE TABLE users (id INTEGER);"),
        ("004_audit.sql", "CREATE TABLE audit (id INTEGER);"),
    ];
    let db = MemoryDatabase::new();
    let dir = TempDir::new().expect("tempdir");

    let result = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default()).bootstrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::VersionGapDetected));
    let message = result.error.expect("error");
    assert!(message.contains("002") && message.contains("003"));
    assert!(db.executed().is_empty());
}

#[test]
fn concurrent_holder_times_out_the_bootstrap() {
    const EMBEDDED: &[(&str, &str)] = &[("001_users.sql", "CREATE TABLE users (id INTEGER);")];
    let db = MemoryDatabase::new();
    let dir = TempDir::new().expect("tempdir");

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let mut holder = FileMigrationLock::new(dir.path().join("schemastep.lock"), clock.clone());
    assert!(holder.try_acquire(Duration::from_secs(1)).expect("acquire"));

    let lock = FileMigrationLock::new(dir.path().join("schemastep.lock"), clock.clone());
    let result = MigrationBootstrapper::new(
        Box::new(lock),
        MigrationDiscovery::new(Box::new(StaticEmbedded(EMBEDDED)), dir.path()),
        Box::new(db.history()),
        Box::new(db.connection()),
        clock,
        BootstrapOptions {
            lock_timeout: Duration::from_millis(500),
            ..BootstrapOptions::default()
        },
    )
    .bootstrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::LockTimeout));
    assert!(db.executed().is_empty());
}

#[test]
fn failing_migration_stops_the_sequence_atomically() {
    const EMBEDDED: &[(&str, &str)] = &[
        ("001_users.sql", "CREATE TABLE users (id INTEGER);"),
        ("002_bad.sql", "CREATE TABLE bad (id INTEGER);"),
        ("003_audit.sql", "CREATE TABLE audit (id INTEGER);"),
    ];
    let db = MemoryDatabase::new();
    db.fail_on("CREATE TABLE bad");
    let dir = TempDir::new().expect("tempdir");

    let result = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default()).bootstrap();

    assert!(!result.success);
    assert_eq!(result.pending_count, 3);
    assert_eq!(result.applied_count, 1);
    // The failed migration left neither SQL nor a history record behind.
    assert_eq!(db.executed(), ["CREATE TABLE users (id INTEGER);"]);
    let history = db.history().applied_migrations().expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, "001");

    // After fixing the cause, a rerun picks up where it stopped.
    db.clear_failures();
    let retry = bootstrapper(&db, &dir, EMBEDDED, BootstrapOptions::default()).bootstrap();
    assert!(retry.success, "{:?}", retry.error);
    assert_eq!(retry.pending_count, 2);
    assert_eq!(retry.applied_count, 2);
}
