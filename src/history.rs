//! Applied-migration history collaborator

use crate::error::MigrationError;
use crate::record::AppliedMigration;
use crate::sql::SqlTransaction;

/// Persistent store of which migrations ran.
///
/// The store owns its own schema and location; the engine only reads the full
/// history and writes individual records. Writes go through the caller's open
/// transaction so bookkeeping commits atomically with the schema change it
/// describes.
pub trait HistoryStore {
    /// All applied migrations, in no particular order.
    fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError>;

    /// The most recently applied migration by `applied_at`, if any.
    fn latest_applied(&self) -> Result<Option<AppliedMigration>, MigrationError> {
        let applied = self.applied_migrations()?;
        Ok(applied.into_iter().max_by_key(|m| m.applied_at))
    }

    /// Whether a version is present in the history.
    fn is_applied(&self, version: &str) -> Result<bool, MigrationError> {
        let applied = self.applied_migrations()?;
        Ok(applied.iter().any(|m| m.version == version))
    }

    /// Record an applied migration inside the given transaction.
    fn record(
        &self,
        tx: &mut dyn SqlTransaction,
        record: &AppliedMigration,
    ) -> Result<(), MigrationError>;

    /// Remove a version from the history inside the given transaction.
    fn remove(&self, tx: &mut dyn SqlTransaction, version: &str) -> Result<(), MigrationError>;
}
