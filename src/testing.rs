//! In-memory doubles for the collaborator traits
//!
//! Everything here is deterministic and lock-step: the [`ManualClock`]
//! advances only when told to (its `sleep` advances simulated time, so polling
//! loops terminate instantly), and the [`MemoryDatabase`] stages statements
//! per transaction and publishes them atomically on commit. Tests and doc
//! examples use these instead of a real backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::MigrationError;
use crate::history::HistoryStore;
use crate::record::AppliedMigration;
use crate::sql::{AdvisorySession, SqlConnection, SqlTransaction};

fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock whose time only moves when the test moves it.
///
/// `sleep` advances the simulated wall and monotonic time by the requested
/// duration instead of blocking, so code that polls with a timeout runs its
/// full loop in microseconds of real time.
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, Duration)>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((now, Duration::ZERO)),
        }
    }

    /// Advance both wall and monotonic time.
    pub fn advance(&self, by: Duration) {
        let mut state = lock_state(&self.state);
        state.0 += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        state.1 += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        lock_state(&self.state).0
    }

    fn monotonic(&self) -> Duration {
        lock_state(&self.state).1
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// History writes ride the transaction as marked statements so they commit or
// roll back together with the schema change they describe.
const RECORD_HISTORY: &str = "-- history:record ";
const REMOVE_HISTORY: &str = "-- history:remove ";

#[derive(Default)]
struct DatabaseState {
    committed_sql: Vec<String>,
    history: Vec<AppliedMigration>,
    fail_on: Option<String>,
}

/// In-memory stand-in for a SQL backend plus its migration history table.
///
/// Clones share state. [`MemoryDatabase::connection`] and
/// [`MemoryDatabase::history`] hand out the collaborator implementations the
/// orchestrators expect.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every statement containing `fragment` fail from now on.
    pub fn fail_on(&self, fragment: impl Into<String>) {
        lock_state(&self.state).fail_on = Some(fragment.into());
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        lock_state(&self.state).fail_on = None;
    }

    /// All committed SQL statements, in commit order. Staged statements of
    /// open or rolled-back transactions are not included.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        lock_state(&self.state).committed_sql.clone()
    }

    #[must_use]
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            state: Arc::clone(&self.state),
        }
    }

    #[must_use]
    pub fn history(&self) -> MemoryHistory {
        MemoryHistory {
            state: Arc::clone(&self.state),
        }
    }
}

/// [`SqlConnection`] over a [`MemoryDatabase`].
pub struct MemoryConnection {
    state: Arc<Mutex<DatabaseState>>,
}

impl SqlConnection for MemoryConnection {
    fn begin(&mut self) -> Result<Box<dyn SqlTransaction + '_>, MigrationError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<DatabaseState>>,
    staged: Vec<String>,
}

impl SqlTransaction for MemoryTransaction {
    fn execute(&mut self, sql: &str) -> Result<u64, MigrationError> {
        let fail_on = lock_state(&self.state).fail_on.clone();
        if let Some(fragment) = fail_on {
            if sql.contains(&fragment) {
                return Err(MigrationError::database(format!(
                    "simulated failure executing: {sql}"
                )));
            }
        }
        self.staged.push(sql.to_string());
        Ok(0)
    }

    fn commit(self: Box<Self>) -> Result<(), MigrationError> {
        let Self { state, staged } = *self;
        let mut state = lock_state(&state);
        for sql in staged {
            if let Some(json) = sql.strip_prefix(RECORD_HISTORY) {
                let record: AppliedMigration =
                    serde_json::from_str(json).map_err(MigrationError::database)?;
                state.history.push(record);
            } else if let Some(version) = sql.strip_prefix(REMOVE_HISTORY) {
                state.history.retain(|m| m.version != version);
            } else {
                state.committed_sql.push(sql);
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), MigrationError> {
        // Staged statements are simply dropped.
        Ok(())
    }
}

/// [`HistoryStore`] over a [`MemoryDatabase`].
pub struct MemoryHistory {
    state: Arc<Mutex<DatabaseState>>,
}

impl HistoryStore for MemoryHistory {
    fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        Ok(lock_state(&self.state).history.clone())
    }

    fn record(
        &self,
        tx: &mut dyn SqlTransaction,
        record: &AppliedMigration,
    ) -> Result<(), MigrationError> {
        let json = serde_json::to_string(record).map_err(MigrationError::database)?;
        tx.execute(&format!("{RECORD_HISTORY}{json}"))?;
        Ok(())
    }

    fn remove(&self, tx: &mut dyn SqlTransaction, version: &str) -> Result<(), MigrationError> {
        tx.execute(&format!("{REMOVE_HISTORY}{version}"))?;
        Ok(())
    }
}

#[derive(Default)]
struct AdvisoryState {
    held: HashMap<i64, u64>,
    next_session: u64,
}

/// Process-wide registry of simulated advisory locks.
///
/// Mirrors the semantics of session-scoped database advisory locks: a key is
/// held by at most one session, re-locking by the holding session succeeds,
/// and sessions are distinguished by identity rather than by key.
#[derive(Clone, Default)]
pub struct MemoryAdvisoryLocks {
    state: Arc<Mutex<AdvisoryState>>,
}

impl MemoryAdvisoryLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this registry.
    #[must_use]
    pub fn session(&self) -> MemoryAdvisorySession {
        let mut state = lock_state(&self.state);
        state.next_session += 1;
        MemoryAdvisorySession {
            id: state.next_session,
            state: Arc::clone(&self.state),
        }
    }
}

/// One session on a [`MemoryAdvisoryLocks`] registry.
pub struct MemoryAdvisorySession {
    id: u64,
    state: Arc<Mutex<AdvisoryState>>,
}

impl AdvisorySession for MemoryAdvisorySession {
    fn try_lock(&self, key: i64) -> Result<bool, MigrationError> {
        let mut state = lock_state(&self.state);
        match state.held.get(&key) {
            Some(owner) => Ok(*owner == self.id),
            None => {
                state.held.insert(key, self.id);
                Ok(true)
            }
        }
    }

    fn unlock(&self, key: i64) -> Result<bool, MigrationError> {
        let mut state = lock_state(&self.state);
        if state.held.get(&key) == Some(&self.id) {
            state.held.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    fn unlock_all(&self) -> Result<(), MigrationError> {
        let mut state = lock_state(&self.state);
        state.held.retain(|_, owner| *owner != self.id);
        Ok(())
    }
}

impl Drop for MemoryAdvisorySession {
    fn drop(&mut self) {
        // Session closure implicitly releases its advisory locks.
        let mut state = lock_state(&self.state);
        state.held.retain(|_, owner| *owner != self.id);
    }
}
