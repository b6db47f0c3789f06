// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where altb keeps its configuration file, where it places the
//! artifacts of selected tags, and where it stores private copies of tracked
//! binaries.
//!
//! # Default Layout
//!
//! All locations are relative to the user's home directory by default:
//!
//! - Configuration file: `~/.config/altb/config.yaml`.
//! - Bin directory: `~/.local/bin`.
//! - Data directory: `~/.local/share/altb`, copies live in its `versions`
//!   subdirectory.
//!
//! Each location can be overridden through an `ALTB_*` environment variable.
//! Overrides go through shell expansion, so `~` and `$VAR` can be used.

use std::{
    env::{self, VarError},
    ffi::OsString,
    path::PathBuf,
};

/// Name of the altb executable. Shim scripts call back into it.
pub const PACKAGE_NAME: &str = "altb";

const HOME_PATH_VAR: &str = "ALTB_HOME_PATH";
const CONFIG_PATH_VAR: &str = "ALTB_CONFIG_PATH";
const BIN_PATH_VAR: &str = "ALTB_BIN_PATH";
const DATA_PATH_VAR: &str = "ALTB_DATA_PATH";
const AUTO_SELECT_VAR: &str = "ALTB_AUTO_SELECT";

/// Resolved locations and behavior flags of altb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base directory for every default location.
    pub home_path: PathBuf,

    /// Path to the persisted configuration document.
    pub config_path: PathBuf,

    /// Directory receiving one artifact per selected application.
    pub bin_path: PathBuf,

    /// Directory for data owned by altb.
    pub data_path: PathBuf,

    /// Select newly tracked tags right away.
    pub auto_select: bool,
}

impl Settings {
    /// Construct default settings rooted at target home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home_path = home.into();
        Self {
            config_path: home_path.join(".config").join(PACKAGE_NAME).join("config.yaml"),
            bin_path: home_path.join(".local").join("bin"),
            data_path: home_path.join(".local").join("share").join(PACKAGE_NAME),
            auto_select: true,
            home_path,
        }
    }

    /// Construct settings from environment.
    ///
    /// Unset variables fall back to the default layout.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::NoWayHome`] if home directory cannot be
    ///   determined.
    /// - Return [`SettingsError::ShellExpansion`] if an override cannot be
    ///   expanded.
    /// - Return [`SettingsError::InvalidFlag`] if a boolean flag is malformed.
    pub fn from_env() -> Result<Self> {
        let home = match expand_var(HOME_PATH_VAR)? {
            Some(path) => path,
            None => home_dir()?,
        };

        let mut settings = Self::with_home(home);
        if let Some(path) = expand_var(CONFIG_PATH_VAR)? {
            settings.config_path = path;
        }

        if let Some(path) = expand_var(BIN_PATH_VAR)? {
            settings.bin_path = path;
        }

        if let Some(path) = expand_var(DATA_PATH_VAR)? {
            settings.data_path = path;
        }

        if let Some(value) = env::var_os(AUTO_SELECT_VAR) {
            settings.auto_select = parse_flag(AUTO_SELECT_VAR, value)?;
        }

        Ok(settings)
    }

    /// Directory holding private copies of tracked binaries.
    pub fn versions_path(&self) -> PathBuf {
        self.data_path.join("versions")
    }
}

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf, NoWayHome> {
    dirs::home_dir().ok_or(NoWayHome)
}

fn expand_var(name: &'static str) -> Result<Option<PathBuf>> {
    let Some(value) = env::var_os(name) else {
        return Ok(None);
    };

    let value = value.to_string_lossy();
    let expanded = shellexpand::full(value.as_ref())
        .map_err(|source| SettingsError::ShellExpansion { name, source })?;

    Ok(Some(PathBuf::from(expanded.into_owned())))
}

fn parse_flag(name: &'static str, value: OsString) -> Result<bool> {
    match value.to_string_lossy().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidFlag { name, value }),
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Settings resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Path override cannot be shell expanded.
    #[error("failed to expand {name}")]
    ShellExpansion {
        name: &'static str,
        #[source]
        source: shellexpand::LookupError<VarError>,
    },

    /// Boolean flag has a value that is neither true nor false.
    #[error("{name} must be true or false, found {value:?}")]
    InvalidFlag { name: &'static str, value: OsString },
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;
