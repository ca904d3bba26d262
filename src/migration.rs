//! Migration descriptor produced by discovery

use chrono::{DateTime, Utc};

/// Where a migration script came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationSource {
    /// Shipped inside the application distributable.
    Embedded,
    /// A `.sql` file an operator placed in the migrations directory.
    File,
}

/// A versioned unit of schema change discovered from an embedded resource or a
/// file on disk.
///
/// Descriptors are created fresh on every discovery pass and never persisted;
/// the applied history keeps its own [`crate::AppliedMigration`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version key, expected to be a zero-padded numeric string (e.g. `"001"`).
    pub version: String,

    /// SQL executed to apply the migration.
    pub up_content: String,

    /// SQL executed to roll the migration back, when a down script exists.
    pub down_content: Option<String>,

    /// Hex SHA-256 of `up_content`, computed at discovery time.
    pub checksum: String,

    /// Which source produced this migration.
    pub source: MigrationSource,

    /// Human-readable description derived from the file name, when present.
    pub description: Option<String>,

    /// Script author, when the source records one.
    pub author: Option<String>,

    /// Creation timestamp, when the source records one.
    pub created_at: Option<DateTime<Utc>>,
}

impl Migration {
    /// Whether this migration can be rolled back.
    #[must_use]
    pub fn has_down_script(&self) -> bool {
        self.down_content.is_some()
    }
}
