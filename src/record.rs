//! `AppliedMigration` - entries in the applied-migration history

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded for an applied migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedStatus {
    /// The migration ran and committed.
    Applied,
    /// The migration was deliberately skipped.
    Skipped,
    /// The migration failed.
    Failed,
    /// The migration partially completed.
    Partial,
}

/// One row of applied-migration history.
///
/// Written by the executor when an apply commits, removed when a rollback
/// commits; otherwise immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Migration version key.
    pub version: String,

    /// Checksum of the up script at the moment it was applied.
    pub checksum: String,

    /// When the migration was applied (UTC).
    pub applied_at: DateTime<Utc>,

    /// How long the SQL execution took.
    pub duration: Duration,

    /// Who applied the migration, when configured.
    pub applied_by: Option<String>,

    /// Outcome of the application.
    pub status: AppliedStatus,
}

impl AppliedMigration {
    /// Create a record with status [`AppliedStatus::Applied`].
    #[must_use]
    pub fn applied(
        version: impl Into<String>,
        checksum: impl Into<String>,
        applied_at: DateTime<Utc>,
        duration: Duration,
        applied_by: Option<String>,
    ) -> Self {
        Self {
            version: version.into(),
            checksum: checksum.into(),
            applied_at,
            duration,
            applied_by,
            status: AppliedStatus::Applied,
        }
    }
}
