//! Migration discovery from embedded resources and the file system

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::checksum::checksum;
use crate::error::MigrationError;
use crate::migration::{Migration, MigrationSource};

/// File naming contract: `<version>_<description>.sql` for up scripts and
/// `<version>_<description>_down.sql` for down scripts.
static MIGRATION_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<stem>.+)\.sql$").expect("migration file pattern"));

/// One embedded migration resource: a name and its script content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedResource {
    pub name: String,
    pub content: String,
}

/// Embedded-resource reader collaborator.
///
/// Applications typically back this with `include_str!` tables; see
/// [`StaticEmbedded`].
pub trait EmbeddedProvider {
    /// All embedded migration resources, in any order.
    fn resources(&self) -> Result<Vec<EmbeddedResource>, MigrationError>;
}

/// [`EmbeddedProvider`] over a static table of `(name, content)` pairs.
///
/// ```rust
/// use schemastep::StaticEmbedded;
///
/// const MIGRATIONS: &[(&str, &str)] = &[
///     ("001_initial_schema.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);"),
/// ];
/// let provider = StaticEmbedded(MIGRATIONS);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaticEmbedded(pub &'static [(&'static str, &'static str)]);

impl EmbeddedProvider for StaticEmbedded {
    fn resources(&self) -> Result<Vec<EmbeddedResource>, MigrationError> {
        Ok(self
            .0
            .iter()
            .map(|(name, content)| EmbeddedResource {
                name: (*name).to_string(),
                content: (*content).to_string(),
            })
            .collect())
    }
}

/// Discovers migrations from embedded resources and `.sql` files on disk.
///
/// Embedded migrations never carry a down script. On-disk scripts are paired by
/// version: a file whose stem ends in `_down` is the down script for that
/// version. Output is ordered by ordinal string comparison of the version,
/// which assumes consistently zero-padded numeric versions.
pub struct MigrationDiscovery {
    embedded: Box<dyn EmbeddedProvider>,
    directory: PathBuf,
}

impl MigrationDiscovery {
    pub fn new(embedded: Box<dyn EmbeddedProvider>, directory: impl AsRef<Path>) -> Self {
        Self {
            embedded,
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// The configured migrations directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Discover all migrations, ordered by version.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateVersion`] when two sources yield the
    /// same version (a structural defect in the migration set), or
    /// [`MigrationError::Io`] when a script file cannot be read. A missing
    /// migrations directory is not an error; it simply yields no file
    /// migrations.
    pub fn discover(&self) -> Result<Vec<Migration>, MigrationError> {
        let mut migrations: BTreeMap<String, Migration> = BTreeMap::new();

        for resource in self.embedded.resources()? {
            let stem = resource_stem(&resource.name);
            let (version, description) = split_version(&stem);
            if migrations.contains_key(&version) {
                return Err(MigrationError::DuplicateVersion(version));
            }

            log::debug!("discovered embedded migration {version}");
            // Embedded migrations never ship a down script.
            log::warn!("migration {version} has no down script for rollback");

            migrations.insert(
                version.clone(),
                Migration {
                    version,
                    checksum: checksum(&resource.content),
                    up_content: resource.content,
                    down_content: None,
                    source: MigrationSource::Embedded,
                    description,
                    author: None,
                    created_at: None,
                },
            );
        }

        if self.directory.is_dir() {
            self.discover_files(&mut migrations)?;
        } else {
            log::debug!(
                "migrations directory {} does not exist, skipping file discovery",
                self.directory.display()
            );
        }

        // BTreeMap iteration order is the ordinal version order.
        Ok(migrations.into_values().collect())
    }

    fn discover_files(
        &self,
        migrations: &mut BTreeMap<String, Migration>,
    ) -> Result<(), MigrationError> {
        let entries = fs::read_dir(&self.directory).map_err(|source| MigrationError::Io {
            path: self.directory.display().to_string(),
            source,
        })?;

        let mut ups: BTreeMap<String, (PathBuf, Option<String>)> = BTreeMap::new();
        let mut downs: BTreeMap<String, PathBuf> = BTreeMap::new();

        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                path: self.directory.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((stem, is_down)) = split_migration_filename(filename) else {
                continue;
            };
            let (version, description) = split_version(&stem);

            if is_down {
                downs.insert(version, path);
            } else if let Some((previous, _)) = ups.insert(version.clone(), (path, description)) {
                log::error!(
                    "two up scripts found for version {version}: {}",
                    previous.display()
                );
                return Err(MigrationError::DuplicateVersion(version));
            }
        }

        // Down scripts without a matching up script are discarded.
        for (version, path) in &downs {
            if !ups.contains_key(version) {
                log::debug!(
                    "discarding down script {} (version {version}) without a matching up script",
                    path.display()
                );
            }
        }

        for (version, (up_path, description)) in ups {
            if migrations.contains_key(&version) {
                return Err(MigrationError::DuplicateVersion(version));
            }

            let up_content = read_script(&up_path)?;
            let down_content = match downs.get(&version) {
                Some(down_path) => Some(read_script(down_path)?),
                None => None,
            };

            log::debug!(
                "discovered file migration {version} (has down script: {})",
                down_content.is_some()
            );
            if down_content.is_none() {
                log::warn!("migration {version} has no down script for rollback");
            }

            migrations.insert(
                version.clone(),
                Migration {
                    version,
                    checksum: checksum(&up_content),
                    up_content,
                    down_content,
                    source: MigrationSource::File,
                    description,
                    author: None,
                    created_at: None,
                },
            );
        }

        Ok(())
    }
}

fn read_script(path: &Path) -> Result<String, MigrationError> {
    fs::read_to_string(path).map_err(|source| MigrationError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Split an on-disk file name into its stem (minus any `_down` suffix) and
/// whether it denotes a down script. Returns `None` for non-`.sql` files.
fn split_migration_filename(filename: &str) -> Option<(String, bool)> {
    let caps = MIGRATION_FILE.captures(filename)?;
    let mut stem = caps["stem"].to_string();
    let is_down = stem.to_ascii_lowercase().ends_with("_down");
    if is_down {
        stem.truncate(stem.len() - "_down".len());
    }
    Some((stem, is_down))
}

/// Stem of an embedded resource name: extension and `_down` suffix removed.
fn resource_stem(name: &str) -> String {
    let mut stem = match name.to_ascii_lowercase().strip_suffix(".sql") {
        Some(_) => name[..name.len() - ".sql".len()].to_string(),
        None => name.to_string(),
    };
    if stem.to_ascii_lowercase().ends_with("_down") {
        stem.truncate(stem.len() - "_down".len());
    }
    stem
}

/// Version is the substring before the first `_`; the remainder becomes the
/// description. A stem without an interior underscore is the whole version.
fn split_version(stem: &str) -> (String, Option<String>) {
    match stem.split_once('_') {
        Some((version, description)) if !version.is_empty() => {
            (version.to_string(), Some(description.to_string()))
        }
        _ => (stem.to_string(), None),
    }
}
