//! # schemastep
//!
//! Versioned SQL schema migration engine.
//!
//! `schemastep` evolves a database schema forward (and one step backward) through
//! an ordered sequence of versioned SQL scripts. Migrations come from two sources:
//! resources embedded in the application binary and `.sql` files operators drop
//! into a directory. The engine detects tampering (checksum mismatches against the
//! applied history) and structural gaps in the version sequence, and serializes
//! concurrent process starts behind a distributed lock.
//!
//! The crate deliberately does not talk to a database itself. The transactional
//! SQL primitive, the applied-migration history store, and the advisory-lock
//! session are collaborator traits ([`SqlConnection`], [`HistoryStore`],
//! [`AdvisorySession`]) implemented by the host for its backend.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use schemastep::{
//!     BootstrapOptions, FileMigrationLock, MigrationBootstrapper, MigrationDiscovery,
//!     StaticEmbedded, SystemClock,
//! };
//! # use schemastep::testing::MemoryDatabase;
//!
//! const EMBEDDED: &[(&str, &str)] = &[
//!     ("001_initial_schema.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);"),
//! ];
//!
//! # let db = MemoryDatabase::new();
//! let clock = Arc::new(SystemClock::new());
//! let discovery = MigrationDiscovery::new(Box::new(StaticEmbedded(EMBEDDED)), "./migrations");
//! let lock = FileMigrationLock::new("./migrations/schemastep.lock", clock.clone());
//!
//! let mut bootstrapper = MigrationBootstrapper::new(
//!     Box::new(lock),
//!     discovery,
//!     Box::new(db.history()),
//!     Box::new(db.connection()),
//!     clock,
//!     BootstrapOptions::default(),
//! );
//!
//! let result = bootstrapper.bootstrap();
//! assert!(result.success, "startup must not proceed on a failed bootstrap");
//! ```

pub mod advisory_lock;
pub mod bootstrap;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod file_lock;
pub mod history;
pub mod lock;
pub mod migration;
pub mod record;
pub mod runner;
pub mod sql;
pub mod testing;
pub mod validator;

pub use advisory_lock::{advisory_lock_key, AdvisoryMigrationLock, ADVISORY_LOCK_NAME};
pub use bootstrap::{BootstrapOptions, BootstrapResult, MigrationBootstrapper};
pub use checksum::checksum;
pub use clock::{Clock, SystemClock};
pub use config::MigrationConfig;
pub use discovery::{EmbeddedProvider, EmbeddedResource, MigrationDiscovery, StaticEmbedded};
pub use error::{ErrorCode, MigrationError};
pub use executor::{ExecutionResult, MigrationExecutor};
pub use file_lock::FileMigrationLock;
pub use history::HistoryStore;
pub use lock::{LockInfo, MigrationLock, LOCK_RETRY_INTERVAL};
pub use migration::{Migration, MigrationSource};
pub use record::{AppliedMigration, AppliedStatus};
pub use runner::{
    MigrationResult, MigrationRunner, MigrationStatusReport, RollbackResult, RunnerOptions,
};
pub use sql::{AdvisorySession, SqlConnection, SqlTransaction};
pub use validator::{validate, ChecksumMismatch, ValidationResult, VersionGap};
