//! Collaborator traits for the transactional SQL primitive and advisory locks
//!
//! The engine never opens a database connection itself. Hosts implement these
//! traits for their backend (an embedded single-file engine, a client/server
//! engine, ...) and hand them to the orchestrators.

use crate::error::MigrationError;

/// One open transaction on the backend.
///
/// A single apply or rollback is exactly one transaction: the schema change and
/// its history bookkeeping commit together or not at all.
pub trait SqlTransaction {
    /// Execute a SQL command inside this transaction, returning affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, MigrationError>;

    /// Commit the transaction, consuming it.
    fn commit(self: Box<Self>) -> Result<(), MigrationError>;

    /// Roll the transaction back, consuming it.
    fn rollback(self: Box<Self>) -> Result<(), MigrationError>;
}

/// A connection capable of opening transactions.
pub trait SqlConnection {
    /// Begin a new transaction.
    fn begin(&mut self) -> Result<Box<dyn SqlTransaction + '_>, MigrationError>;
}

/// Session-scoped advisory lock primitive of a client/server backend
/// (e.g. `pg_try_advisory_lock`).
///
/// Advisory locks are implicitly released when the underlying session closes;
/// implementations should therefore tolerate release calls against a session
/// that is already gone.
pub trait AdvisorySession: Send + Sync {
    /// Non-blocking attempt to take the advisory lock for `key`.
    fn try_lock(&self, key: i64) -> Result<bool, MigrationError>;

    /// Release the advisory lock for `key`. Returns whether a lock was held.
    fn unlock(&self, key: i64) -> Result<bool, MigrationError>;

    /// Release every advisory lock held by this session. Manual recovery only.
    fn unlock_all(&self) -> Result<(), MigrationError>;
}
