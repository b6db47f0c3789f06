// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration store management.
//!
//! Altb keeps its entire state in one YAML document called the
//! __configuration store__. The store is loaded once per invocation, mutated in
//! memory, and saved once when the invocation succeeds. Nothing is saved when
//! an operation fails part way through.
//!
//! # Loading
//!
//! Loading goes through three gates before a typed
//! [`Configuration`] comes out:
//!
//! 1. The file must parse as YAML, and must not be empty.
//! 2. The document is migrated to the latest version, validating it against
//!    the schema of each version along the way. See [`migrate`](crate::migrate).
//! 3. The typed model must deserialize, and every `selected` pointer must name
//!    an existing tag.
//!
//! Failing any gate yields [`StoreError::Validation`] listing every violation
//! found. A truncated file from an interrupted save ends up here too, never as
//! a silently empty configuration.
//!
//! # Saving
//!
//! Saving writes the whole document to a sibling temporary file, and renames
//! it over the configuration file. Thus, readers either see the old document
//! or the new one. Concurrent invocations are still last-writer-wins.

use crate::{
    config::Configuration,
    migrate::{self, MigrateError},
};

use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Handle to the persisted configuration document.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

/// Result of loading the configuration store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    /// Loaded configuration, or a fresh one if nothing existed on disk.
    pub config: Configuration,

    /// Configuration file existed on disk.
    pub existed: bool,

    /// Document had to be migrated to the latest version.
    pub migrated: bool,
}

impl Loaded {
    /// Check if the loaded document differs from what is on disk.
    pub fn needs_save(&self) -> bool {
        !self.existed || self.migrated
    }
}

impl Store {
    /// Construct new store handle for configuration file at target path.
    ///
    /// Does not touch the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the configuration file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Load configuration from disk.
    ///
    /// Returns a fresh configuration if the file does not exist. Does not
    /// write anything back, not even after migrating.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadConfig`] if file exists but cannot be read.
    /// - Return [`StoreError::Validation`] if document is malformed.
    /// - Return [`StoreError::Migrate`] if document cannot be migrated.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> Result<Loaded> {
        if !self.path.exists() {
            debug!("no configuration at {:?}", self.path.display());
            return Ok(Loaded {
                config: Configuration::default(),
                existed: false,
                migrated: false,
            });
        }

        let data = fs::read_to_string(&self.path).map_err(|source| StoreError::ReadConfig {
            source,
            path: self.path.clone(),
        })?;
        let (config, migrated) = self.parse(&data)?;

        Ok(Loaded {
            config,
            existed: true,
            migrated,
        })
    }

    /// Load configuration, persisting it right away if it was missing or
    /// outdated.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Store::load`] or [`Store::save`].
    pub fn open(&self) -> Result<Configuration> {
        let loaded = self.load()?;
        if loaded.needs_save() {
            info!("write baseline configuration to {:?}", self.path.display());
            self.save(&loaded.config)?;
        }

        Ok(loaded.config)
    }

    /// Save configuration to disk.
    ///
    /// Creates parent directories as needed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if parent directory cannot be made.
    /// - Return [`StoreError::Serialize`] if configuration cannot be
    ///   serialized.
    /// - Return [`StoreError::WriteConfig`] if file cannot be written.
    #[instrument(skip(self, config), level = "debug")]
    pub fn save(&self, config: &Configuration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(|source| StoreError::CreateDir {
                source,
                path: parent.to_path_buf(),
            })?;
        }

        let contents = serde_yaml::to_string(config).map_err(StoreError::Serialize)?;
        let staging = self.staging_path();
        fs::write(&staging, contents).map_err(|source| StoreError::WriteConfig {
            source,
            path: staging.clone(),
        })?;
        fs::rename(&staging, &self.path).map_err(|source| StoreError::WriteConfig {
            source,
            path: self.path.clone(),
        })?;
        debug!("saved configuration to {:?}", self.path.display());

        Ok(())
    }

    /// Run action on configuration, and save it if and only if the action
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Store::open`] or [`Store::save`].
    /// - Return error of action untouched, without saving.
    pub fn use_config<T, E>(
        &self,
        action: impl FnOnce(&mut Configuration) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut config = self.open()?;
        let value = action(&mut config)?;
        self.save(&config)?;

        Ok(value)
    }

    fn parse(&self, data: &str) -> Result<(Configuration, bool)> {
        let document: Value =
            serde_yaml::from_str(data).map_err(|error| self.invalid(vec![error.to_string()]))?;
        if document.is_null() {
            return Err(self.invalid(vec!["configuration file is empty".into()]));
        }

        let migrated = !migrate::is_latest(&document);
        let document = migrate::migrate(document).map_err(|error| match error {
            MigrateError::InvalidDocument { errors, .. } => self.invalid(errors),
            MigrateError::NotAMapping => self.invalid(vec![error.to_string()]),
            error => StoreError::Migrate(error),
        })?;

        let config: Configuration = serde_json::from_value(document)
            .map_err(|error| self.invalid(vec![error.to_string()]))?;
        let violations = config.violations();
        if !violations.is_empty() {
            return Err(self.invalid(violations));
        }

        Ok((config, migrated))
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn invalid(&self, errors: Vec<String>) -> StoreError {
        StoreError::Validation {
            path: self.path.clone(),
            errors,
        }
    }
}

/// All possible error types for configuration store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Configuration document is malformed.
    #[error("invalid configuration at {:?}:\n  {}", path.display(), errors.join("\n  "))]
    Validation { path: PathBuf, errors: Vec<String> },

    /// Configuration file cannot be read.
    #[error("failed to read configuration at {:?}", path.display())]
    ReadConfig {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file cannot be written.
    #[error("failed to write configuration at {:?}", path.display())]
    WriteConfig {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Parent directory of configuration file cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration cannot be serialized.
    #[error(transparent)]
    Serialize(serde_yaml::Error),

    /// Configuration cannot be migrated to the latest version.
    #[error(transparent)]
    Migrate(#[from] MigrateError),
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BinaryRecord, CommandSpec, LinkSpec, Tag};
    use crate::migrate::LATEST_VERSION;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> Store {
        Store::new(dir.path().join("config").join("config.yaml"))
    }

    fn sample() -> Configuration {
        let mut app = BinaryRecord::new("app");
        app.tags.insert(
            "a".into(),
            Tag::link(LinkSpec::new("/bin/true", true), Some("copied".into())),
        );
        app.tags.insert("1.0".into(), Tag::command(CommandSpec::new("echo hi"), None));
        app.selected = Some("1.0".into());

        let mut config = Configuration::default();
        config.binaries.insert("app".into(), app);
        config.binaries.insert("empty".into(), BinaryRecord::new("empty"));
        config
    }

    #[test]
    fn load_missing_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);

        let result = store.load()?;
        assert_eq!(result.config, Configuration::default());
        assert!(!result.existed);
        assert!(result.needs_save());
        assert!(!store.path().exists());

        Ok(())
    }

    #[test]
    fn open_writes_pristine_baseline() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);

        store.open()?;
        let result = store.load()?;
        assert!(result.existed);
        assert!(!result.needs_save());
        assert_eq!(result.config.version, LATEST_VERSION);

        Ok(())
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);
        let expect = sample();

        store.save(&expect)?;
        let first = fs::read_to_string(store.path())?;
        let result = store.load()?;
        assert_eq!(result.config, expect);

        store.save(&result.config)?;
        let second = fs::read_to_string(store.path())?;
        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn load_rejects_empty_and_truncated_files() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);
        store.save(&sample())?;

        let contents = fs::read_to_string(store.path())?;
        let cut = contents.find("kind").unwrap_or(contents.len() / 2);
        fs::write(store.path(), &contents[..cut])?;
        assert!(matches!(store.load(), Err(StoreError::Validation { .. })));

        fs::write(store.path(), "")?;
        assert!(matches!(store.load(), Err(StoreError::Validation { .. })));

        Ok(())
    }

    #[test]
    fn load_reports_every_violation() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);
        fs::create_dir_all(dir.path().join("config"))?;
        fs::write(
            store.path(),
            indoc! {r#"
                version: 0.1.0
                binaries:
                  app:
                    name: app
                    colour: blue
                    tags:
                      a:
                        kind: link
                        spec:
                          path: /bin/true
                          mode: 755
            "#},
        )?;

        let result = store.load();
        assert!(matches!(result, Err(StoreError::Validation { ref errors, .. }) if errors.len() == 2));

        Ok(())
    }

    #[test]
    fn load_rejects_dangling_selection() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);
        fs::create_dir_all(dir.path().join("config"))?;
        fs::write(
            store.path(),
            indoc! {r#"
                version: 0.1.0
                binaries:
                  app:
                    name: app
                    selected: ghost
            "#},
        )?;

        let result = store.load();
        assert!(matches!(
            result,
            Err(StoreError::Validation { ref errors, .. }) if errors[0].contains("ghost")
        ));

        Ok(())
    }

    #[test]
    fn load_migrates_legacy_document() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);
        fs::create_dir_all(dir.path().join("config"))?;
        fs::write(
            store.path(),
            indoc! {r#"
                binaries:
                  app:
                    name: app
                    tags:
                      a:
                        kind: link
                        description: null
                        spec:
                          path: /bin/true
                          is_copy: false
                    selected: a
            "#},
        )?;

        let result = store.load()?;
        assert!(result.migrated);
        assert_eq!(result.config.version, LATEST_VERSION);
        assert_eq!(result.config.binaries["app"].selected(), Some("a"));

        store.open()?;
        let result = store.load()?;
        assert!(!result.migrated);

        Ok(())
    }

    #[test]
    fn load_rejects_unknown_version() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);
        fs::create_dir_all(dir.path().join("config"))?;
        fs::write(store.path(), "version: 42.0.0\nbinaries: {}\n")?;

        let result = store.load();
        assert!(matches!(
            result,
            Err(StoreError::Migrate(MigrateError::UnknownVersion { .. }))
        ));

        Ok(())
    }

    #[test]
    fn use_config_saves_only_on_success() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store_in(&dir);

        store.use_config(|config| -> anyhow::Result<()> {
            config.binaries.insert("app".into(), BinaryRecord::new("app"));
            Ok(())
        })?;
        assert!(store.load()?.config.binaries.contains_key("app"));

        let result = store.use_config(|config| -> anyhow::Result<()> {
            config.binaries.insert("other".into(), BinaryRecord::new("other"));
            anyhow::bail!("operation failed part way through");
        });
        assert!(result.is_err());
        assert!(!store.load()?.config.binaries.contains_key("other"));

        Ok(())
    }
}
