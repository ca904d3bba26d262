//! Checksum calculation for migration scripts

use sha2::{Digest, Sha256};

/// Calculate the hex SHA-256 checksum of a migration script.
///
/// Used to detect that an applied migration's script was modified afterwards.
/// The same function runs at discovery time and at apply time so the stored and
/// recomputed values are directly comparable.
#[must_use]
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
