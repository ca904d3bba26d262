//! Host-facing configuration for the migration engine

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bootstrap::BootstrapOptions;
use crate::runner::RunnerOptions;

/// Declarative migration settings, usually deserialized from the host's
/// configuration file.
///
/// Every field has a default, so an empty `[migrations]` section (or no
/// section at all) yields a working configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory scanned for `.sql` migration files.
    pub directory: PathBuf,
    /// Lock file used by the file-based lock strategy.
    pub lock_file: PathBuf,
    /// Lock acquisition timeout in seconds.
    pub lock_timeout_secs: u64,
    /// Apply pending migrations automatically at startup.
    pub auto_migrate: bool,
    /// Backend name echoed in status reports.
    pub provider: String,
    /// Recorded as the applier in the history.
    pub applied_by: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./migrations"),
            lock_file: PathBuf::from("./migrations/schemastep.lock"),
            lock_timeout_secs: 60,
            auto_migrate: true,
            provider: "default".into(),
            applied_by: None,
        }
    }
}

impl MigrationConfig {
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Startup options derived from this configuration.
    #[must_use]
    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            lock_timeout: self.lock_timeout(),
            auto_migrate: self.auto_migrate,
            applied_by: self.applied_by.clone(),
        }
    }

    /// Runner options derived from this configuration.
    #[must_use]
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            lock_timeout: self.lock_timeout(),
            provider_name: self.provider.clone(),
            applied_by: self.applied_by.clone(),
        }
    }
}
