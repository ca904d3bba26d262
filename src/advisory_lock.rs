//! Advisory-lock strategy for client/server backends

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::error::MigrationError;
use crate::lock::{LockInfo, MigrationLock, LOCK_RETRY_INTERVAL};
use crate::sql::AdvisorySession;

/// Well-known name every process hashes to the same advisory lock key.
pub const ADVISORY_LOCK_NAME: &str = "schemastep_migration_lock";

/// The fixed 64-bit advisory lock key: the first 8 bytes (big-endian) of
/// `SHA-256(ADVISORY_LOCK_NAME)`. A stable hash means every process computes
/// the same key without coordination.
#[must_use]
pub fn advisory_lock_key() -> i64 {
    let digest = Sha256::digest(ADVISORY_LOCK_NAME.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Migration lock over a database-native advisory lock primitive
/// (e.g. PostgreSQL's `pg_try_advisory_lock`).
///
/// The primitive is session-scoped: closing the underlying session implicitly
/// releases the lock, so explicit release failures are swallowed (the session
/// may already be gone). Unlike the file strategy there is no visibility into
/// external holders; [`MigrationLock::lock_info`] returns `None` unless this
/// instance holds the lock.
pub struct AdvisoryMigrationLock {
    session: Arc<dyn AdvisorySession>,
    key: i64,
    clock: Arc<dyn Clock>,
    held: Option<LockInfo>,
}

impl AdvisoryMigrationLock {
    pub fn new(session: Arc<dyn AdvisorySession>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session,
            key: advisory_lock_key(),
            clock,
            held: None,
        }
    }

    /// The advisory lock key this instance polls.
    #[must_use]
    pub fn key(&self) -> i64 {
        self.key
    }
}

impl MigrationLock for AdvisoryMigrationLock {
    fn try_acquire(&mut self, timeout: Duration) -> Result<bool, MigrationError> {
        let start = self.clock.monotonic();

        loop {
            if self.session.try_lock(self.key)? {
                let info = LockInfo::for_current_process(self.clock.now());
                log::debug!(
                    "acquired advisory migration lock {} (lock id {})",
                    self.key,
                    info.lock_id
                );
                self.held = Some(info);
                return Ok(true);
            }

            if self.clock.monotonic().saturating_sub(start) >= timeout {
                return Ok(false);
            }
            self.clock.sleep(LOCK_RETRY_INTERVAL);
        }
    }

    fn release(&mut self) -> Result<(), MigrationError> {
        if self.held.take().is_some() {
            // The session may already be gone; its closure released the lock.
            if let Err(e) = self.session.unlock(self.key) {
                log::debug!("advisory unlock failed (session may be closed): {e}");
            }
        }
        Ok(())
    }

    fn force_release(&mut self) -> Result<(), MigrationError> {
        // Releases every advisory lock on this session, not just ours.
        self.held = None;
        self.session.unlock_all()
    }

    fn lock_info(&self) -> Result<Option<LockInfo>, MigrationError> {
        // No visibility into other sessions' holders.
        Ok(self.held.clone())
    }
}

impl Drop for AdvisoryMigrationLock {
    fn drop(&mut self) {
        if self.held.take().is_some() {
            let _ = self.session.unlock(self.key);
        }
    }
}
