//! Distributed migration lock contract

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MigrationError;

/// Fixed interval between lock acquisition attempts.
///
/// Polling is deliberately simple: a fixed short retry, no backoff, no
/// fairness. Starvation is possible under heavy contention.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Identity of a lock holder.
///
/// Written into the lock file by the file strategy; kept in memory by the
/// advisory strategy (other sessions' holders are not visible there).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Random id for this specific acquisition.
    pub lock_id: String,
    /// Process or session identity of the holder.
    pub holder_id: String,
    /// When the lock was acquired (UTC).
    pub acquired_at: DateTime<Utc>,
    /// Host name of the holder, when known.
    pub machine_name: Option<String>,
}

impl LockInfo {
    /// Fresh lock info for the current process.
    #[must_use]
    pub fn for_current_process(acquired_at: DateTime<Utc>) -> Self {
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder_id: std::process::id().to_string(),
            acquired_at,
            machine_name: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .ok(),
        }
    }
}

/// Cooperative, cross-process (or cross-session) mutual exclusion around the
/// discover → validate → apply critical section.
///
/// Two interchangeable strategies implement this contract:
/// [`crate::FileMigrationLock`] for embedded/local backends and
/// [`crate::AdvisoryMigrationLock`] for client/server backends. The strategy
/// is chosen at composition time, never branched per call site.
pub trait MigrationLock {
    /// Try to acquire the lock, polling at [`LOCK_RETRY_INTERVAL`] until the
    /// timeout elapses. Returns `Ok(false)` when the timeout is reached
    /// without acquiring.
    fn try_acquire(&mut self, timeout: Duration) -> Result<bool, MigrationError>;

    /// Release what this instance acquired, tolerating already-gone state.
    /// No-op when this instance does not hold the lock.
    fn release(&mut self) -> Result<(), MigrationError>;

    /// Unconditional release for manual recovery only. May release a lock
    /// held by another process.
    fn force_release(&mut self) -> Result<(), MigrationError>;

    /// Info about the current holder: this instance's own info when held,
    /// otherwise whatever the strategy can observe about external holders.
    fn lock_info(&self) -> Result<Option<LockInfo>, MigrationError>;
}
