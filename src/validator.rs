//! Validation of discovered migrations against the applied history

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::migration::Migration;
use crate::record::AppliedMigration;

/// An applied migration whose current script no longer matches the checksum
/// recorded at apply time. Ephemeral; produced only by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub version: String,
    /// Checksum recorded in the history at apply time.
    pub expected_checksum: String,
    /// Checksum of the script as currently discovered.
    pub actual_checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// A hole in the expected contiguous numeric sequence of discovered versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGap {
    pub missing_version: String,
    pub before_version: String,
    pub after_version: String,
}

/// Result of validating discovered migrations against the applied history.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Discovered migrations not present in the history, in discovery order.
    pub pending_migrations: Vec<Migration>,
    /// Applied migrations whose scripts changed after being applied.
    pub checksum_mismatches: Vec<ChecksumMismatch>,
    /// Holes in the numeric version sequence.
    pub version_gaps: Vec<VersionGap>,
}

impl ValidationResult {
    /// Whether the migration set is structurally sound.
    ///
    /// Only version gaps invalidate the result. Checksum mismatches are
    /// warnings here; callers that treat integrity as fatal (the bootstrapper
    /// does) must check [`ValidationResult::checksum_mismatches`] themselves.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.version_gaps.is_empty()
    }
}

/// Compare discovered migrations with the applied history.
///
/// Pure and read-only: the only side effect is warning-level logging of
/// checksum mismatches. Pending is the set difference by version; gap
/// detection considers only versions that parse as integers and silently
/// skips the rest.
#[must_use]
pub fn validate(discovered: &[Migration], applied: &[AppliedMigration]) -> ValidationResult {
    let applied_by_version: HashMap<&str, &AppliedMigration> =
        applied.iter().map(|m| (m.version.as_str(), m)).collect();
    let applied_versions: HashSet<&str> = applied_by_version.keys().copied().collect();

    let pending_migrations: Vec<Migration> = discovered
        .iter()
        .filter(|m| !applied_versions.contains(m.version.as_str()))
        .cloned()
        .collect();

    let mut checksum_mismatches = Vec::new();
    for migration in discovered {
        if let Some(record) = applied_by_version.get(migration.version.as_str()) {
            if record.checksum != migration.checksum {
                log::warn!(
                    "checksum mismatch for migration {}: expected {}, actual {}",
                    migration.version,
                    record.checksum,
                    migration.checksum
                );
                checksum_mismatches.push(ChecksumMismatch {
                    version: migration.version.clone(),
                    expected_checksum: record.checksum.clone(),
                    actual_checksum: migration.checksum.clone(),
                    applied_at: record.applied_at,
                });
            }
        }
    }

    let version_gaps = detect_gaps(discovered);

    ValidationResult {
        pending_migrations,
        checksum_mismatches,
        version_gaps,
    }
}

/// Gap detection over the numeric subset of discovered versions.
///
/// Versions that do not parse as integers are excluded entirely; with a
/// non-numeric version scheme this check is effectively disabled.
fn detect_gaps(discovered: &[Migration]) -> Vec<VersionGap> {
    let mut numeric: Vec<(i64, &str)> = discovered
        .iter()
        .filter_map(|m| {
            m.version
                .parse::<i64>()
                .ok()
                .map(|value| (value, m.version.as_str()))
        })
        .collect();
    numeric.sort_by_key(|(value, _)| *value);

    let mut gaps = Vec::new();
    for pair in numeric.windows(2) {
        let (before_value, before) = pair[0];
        let (after_value, after) = pair[1];
        if after_value - before_value > 1 {
            // Pad the missing id to the narrower neighbor's width.
            let width = before.len().min(after.len());
            for missing in (before_value + 1)..after_value {
                gaps.push(VersionGap {
                    missing_version: format!("{missing:0width$}"),
                    before_version: before.to_string(),
                    after_version: after.to_string(),
                });
            }
        }
    }
    gaps
}
