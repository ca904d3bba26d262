//! File-based migration lock for embedded/local backends

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::MigrationError;
use crate::lock::{LockInfo, MigrationLock, LOCK_RETRY_INTERVAL};

/// Migration lock backed by exclusive creation of a lock file.
///
/// Suitable for embedded single-file backends and as a generic fallback. The
/// holder's [`LockInfo`] is written into the file as JSON so other processes
/// can see who holds the lock and detect staleness: a lock record older than
/// the acquisition timeout is presumed abandoned by a crashed holder and is
/// reclaimed without manual intervention.
pub struct FileMigrationLock {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    held: Option<LockInfo>,
}

impl FileMigrationLock {
    pub fn new(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            clock,
            held: None,
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort read of the lock file. An unreadable or unparsable file is
    /// treated as an active lock held by an unknown process.
    fn read_lock_file(&self) -> Option<LockInfo> {
        let json = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&json).ok()
    }

    fn try_create(&mut self) -> Result<bool, MigrationError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| MigrationError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            // Lost the race to another process.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(source) => {
                return Err(MigrationError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };

        let info = LockInfo::for_current_process(self.clock.now());
        let json = serde_json::to_string(&info).map_err(MigrationError::database)?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| MigrationError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        log::debug!(
            "acquired file migration lock {} (lock id {})",
            self.path.display(),
            info.lock_id
        );
        self.held = Some(info);
        Ok(true)
    }

    fn remove_lock_file(&self) -> Result<(), MigrationError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(MigrationError::Io {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }
}

impl MigrationLock for FileMigrationLock {
    fn try_acquire(&mut self, timeout: Duration) -> Result<bool, MigrationError> {
        let start = self.clock.monotonic();
        let start_wall = self.clock.now();

        loop {
            if self.path.exists() {
                if let Some(existing) = self.read_lock_file() {
                    // Age as of when this attempt began: a holder that was
                    // live then is never reclaimed while we wait on it.
                    let age = start_wall.signed_duration_since(existing.acquired_at);
                    if age.to_std().map(|a| a > timeout).unwrap_or(false) {
                        log::warn!(
                            "reclaiming stale migration lock {} held by {} since {}",
                            self.path.display(),
                            existing.holder_id,
                            existing.acquired_at
                        );
                        let removed = match fs::remove_file(&self.path) {
                            Ok(()) => true,
                            // Another contender reclaimed it first.
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                            Err(e) => {
                                log::warn!(
                                    "failed to remove stale migration lock {}: {e}",
                                    self.path.display()
                                );
                                false
                            }
                        };
                        if removed {
                            // Retry immediately, no sleep after a reclaim. The
                            // deadline still applies on this path.
                            if self.clock.monotonic().saturating_sub(start) >= timeout {
                                return Ok(false);
                            }
                            continue;
                        }
                        // An undeletable stale file is waited on like an
                        // active lock, bounded by the timeout below.
                    }
                }
                // Active lock (or unreadable file) held by another process.
            } else if self.try_create()? {
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
            self.remove_lock_file()?;
            log::debug!("released file migration lock {}", self.path.display());
        }
        Ok(())
    }

    fn force_release(&mut self) -> Result<(), MigrationError> {
        self.held = None;
        self.remove_lock_file()
    }

    fn lock_info(&self) -> Result<Option<LockInfo>, MigrationError> {
        if let Some(info) = &self.held {
            return Ok(Some(info.clone()));
        }
        Ok(self.read_lock_file())
    }
}

impl Drop for FileMigrationLock {
    fn drop(&mut self) {
        // Release what this instance acquired; errors cannot propagate here.
        if self.held.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::testing::ManualClock;
    use chrono::Utc;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join("schemastep.lock")
    }

    #[test]
    fn acquire_creates_lock_file_with_holder_info() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(SystemClock::new());
        let mut lock = FileMigrationLock::new(lock_path(&dir), clock);

        assert!(lock.try_acquire(Duration::from_secs(1)).expect("acquire"));
        let info = lock.lock_info().expect("info").expect("held");
        assert_eq!(info.holder_id, std::process::id().to_string());
        assert!(lock_path(&dir).exists());

        lock.release().expect("release");
        assert!(!lock_path(&dir).exists());
    }

    #[test]
    fn second_acquirer_fails_while_lock_is_held() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut first = FileMigrationLock::new(lock_path(&dir), clock.clone());
        let mut second = FileMigrationLock::new(lock_path(&dir), clock);

        assert!(first.try_acquire(Duration::from_secs(1)).expect("acquire"));
        assert!(!second
            .try_acquire(Duration::from_millis(300))
            .expect("try acquire"));
    }

    #[test]
    fn released_lock_can_be_acquired_by_another_instance() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(SystemClock::new());
        let mut first = FileMigrationLock::new(lock_path(&dir), clock.clone());
        let mut second = FileMigrationLock::new(lock_path(&dir), clock);

        assert!(first.try_acquire(Duration::from_secs(1)).expect("acquire"));
        first.release().expect("release");
        assert!(second.try_acquire(Duration::from_secs(1)).expect("acquire"));
    }

    #[test]
    fn stale_lock_is_reclaimed_without_manual_intervention() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(Utc::now()));

        // Simulate a crashed holder: a lock record far older than the timeout.
        let stale = LockInfo {
            lock_id: "dead".into(),
            holder_id: "99999".into(),
            acquired_at: clock.now() - chrono::Duration::minutes(10),
            machine_name: None,
        };
        fs::write(
            lock_path(&dir),
            serde_json::to_string(&stale).expect("serialize"),
        )
        .expect("write stale lock");

        let mut lock = FileMigrationLock::new(lock_path(&dir), clock);
        assert!(lock.try_acquire(Duration::from_secs(30)).expect("acquire"));
        let info = lock.lock_info().expect("info").expect("held");
        assert_ne!(info.lock_id, "dead");
    }

    #[test]
    fn stale_reclaim_still_honors_the_acquisition_deadline() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let stale = LockInfo {
            lock_id: "dead".into(),
            holder_id: "99999".into(),
            acquired_at: clock.now() - chrono::Duration::minutes(10),
            machine_name: None,
        };
        fs::write(
            lock_path(&dir),
            serde_json::to_string(&stale).expect("serialize"),
        )
        .expect("write stale lock");

        // A zero timeout is already elapsed: the stale record is reclaimed
        // but the acquisition must still report failure instead of looping.
        let mut lock = FileMigrationLock::new(lock_path(&dir), clock);
        assert!(!lock.try_acquire(Duration::ZERO).expect("try acquire"));
        assert!(!lock_path(&dir).exists(), "stale record was reclaimed");
    }

    #[test]
    fn lock_info_reads_another_holders_record() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(SystemClock::new());

        let other = LockInfo {
            lock_id: "other-lock".into(),
            holder_id: "12345".into(),
            acquired_at: Utc::now(),
            machine_name: Some("other-host".into()),
        };
        fs::write(
            lock_path(&dir),
            serde_json::to_string(&other).expect("serialize"),
        )
        .expect("write lock file");

        let lock = FileMigrationLock::new(lock_path(&dir), clock);
        let info = lock.lock_info().expect("info").expect("present");
        assert_eq!(info.lock_id, "other-lock");
        assert_eq!(info.holder_id, "12345");
    }

    #[test]
    fn force_release_removes_a_foreign_lock() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let foreign = LockInfo {
            lock_id: "foreign".into(),
            holder_id: "4242".into(),
            acquired_at: clock.now(),
            machine_name: None,
        };
        fs::write(
            lock_path(&dir),
            serde_json::to_string(&foreign).expect("serialize"),
        )
        .expect("write lock file");

        let mut lock = FileMigrationLock::new(lock_path(&dir), clock);
        lock.force_release().expect("force release");
        assert!(!lock_path(&dir).exists());
        assert!(lock.try_acquire(Duration::from_secs(1)).expect("acquire"));
    }

    #[test]
    fn release_tolerates_already_gone_lock_file() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(SystemClock::new());
        let mut lock = FileMigrationLock::new(lock_path(&dir), clock);

        assert!(lock.try_acquire(Duration::from_secs(1)).expect("acquire"));
        fs::remove_file(lock_path(&dir)).expect("remove externally");
        lock.release().expect("release tolerates missing file");
    }

    #[test]
    fn drop_releases_what_this_instance_acquired() {
        let dir = TempDir::new().expect("tempdir");
        let clock = Arc::new(SystemClock::new());
        {
            let mut lock = FileMigrationLock::new(lock_path(&dir), clock.clone());
            assert!(lock.try_acquire(Duration::from_secs(1)).expect("acquire"));
        }
        assert!(!lock_path(&dir).exists());
    }
}
