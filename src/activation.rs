// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tag activation logic.
//!
//! Each tracked application owns exactly one __artifact__ in the bin
//! directory, i.e., `<bin_dir>/<app_name>`. The artifact reflects the selected
//! tag of the application:
//!
//! - A link tag is materialized as a symbolic link to the tracked binary.
//! - A command tag is materialized as a small shell script, the __shim__, that
//!   calls `altb run <app_name> -- "$@"`.
//! - An application without a selected tag has no artifact at all.
//!
//! # Selection State Machine
//!
//! Selecting a tag first checks that the artifact of the currently selected
//! tag still looks the way altb left it. If the user altered it behind altb's
//! back, i.e., the artifact __drifted__, selection is refused so manual edits
//! are never destroyed silently. Forcing skips this check. Afterwards the old
//! artifact is removed, and the artifact of the new tag is written.
//!
//! Only link tags are checked for drift. The contents of shim scripts are never
//! compared.
//!
//! # Tracking
//!
//! Tracking a path or command inserts a new tag, and selects it right away
//! unless automatic selection is turned off. Tracking a path that another tag
//! of the same application already links to is refused unless forced, in which
//! case the old tag is removed first.

use crate::{
    config::{BinaryRecord, CommandSpec, Configuration, LinkSpec, Tag, TagKind, TagSpec},
    path::{Settings, PACKAGE_NAME},
};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    os::unix::fs::{symlink, PermissionsExt},
    path::{self, Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Permission bits of shims and private copies.
const EXECUTABLE_MODE: u32 = 0o755;

/// Current state of an artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Nothing exists at the destination.
    Missing,

    /// Destination is a symbolic link to target path.
    Symlink(PathBuf),

    /// Destination is something other than a symbolic link.
    Other,
}

/// Layer of indirection for writing artifacts of selected tags.
pub trait Materialize {
    /// Destination of artifact for application.
    fn destination(&self, app: &str) -> PathBuf;

    /// Inspect current artifact of application.
    fn inspect(&self, app: &str) -> Result<Artifact>;

    /// Write artifact for tag of application.
    fn materialize(&self, app: &str, tag: &Tag) -> Result<()>;

    /// Remove artifact of application if there is one.
    fn dematerialize(&self, app: &str) -> Result<()>;
}

/// Artifacts written into a bin directory.
#[derive(Debug, Clone)]
pub struct BinDir {
    path: PathBuf,
}

impl BinDir {
    /// Construct new bin directory materializer.
    ///
    /// Directory is created lazily on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_exists(&self) -> Result<()> {
        mkdirp::mkdirp(&self.path).map_err(|source| ActivationError::Io {
            source,
            path: self.path.clone(),
        })?;

        Ok(())
    }
}

impl Materialize for BinDir {
    fn destination(&self, app: &str) -> PathBuf {
        self.path.join(app)
    }

    fn inspect(&self, app: &str) -> Result<Artifact> {
        let destination = self.destination(app);
        let metadata = match fs::symlink_metadata(&destination) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Artifact::Missing),
            Err(source) => {
                return Err(ActivationError::Io {
                    source,
                    path: destination,
                })
            }
        };

        if !metadata.file_type().is_symlink() {
            return Ok(Artifact::Other);
        }

        let target = fs::read_link(&destination).map_err(|source| ActivationError::Io {
            source,
            path: destination.clone(),
        })?;

        Ok(Artifact::Symlink(target))
    }

    #[instrument(skip(self, tag), level = "debug")]
    fn materialize(&self, app: &str, tag: &Tag) -> Result<()> {
        self.ensure_exists()?;
        let destination = self.destination(app);
        let io_error = |source| ActivationError::Io {
            source,
            path: destination.clone(),
        };

        match &tag.spec {
            TagSpec::Link(spec) => {
                debug!("link {:?} to {:?}", destination.display(), spec.path.display());
                symlink(&spec.path, &destination).map_err(io_error)?;
            }
            TagSpec::Command(_) => {
                debug!("write shim {:?}", destination.display());
                fs::write(&destination, shim_script(app)).map_err(io_error)?;
                fs::set_permissions(&destination, fs::Permissions::from_mode(EXECUTABLE_MODE))
                    .map_err(io_error)?;
            }
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn dematerialize(&self, app: &str) -> Result<()> {
        let destination = self.destination(app);
        match fs::remove_file(&destination) {
            Ok(()) => {
                debug!("removed {:?}", destination.display());
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ActivationError::Io {
                source,
                path: destination,
            }),
        }
    }
}

/// Contents of shim script that runs command tags of application.
pub fn shim_script(app: &str) -> String {
    format!("#!/bin/sh\n{PACKAGE_NAME} run {app} -- \"$@\"\n")
}

/// Options for tracking a binary path.
#[derive(Debug, Default, Clone)]
pub struct TrackPath {
    /// Name of new tag. A random one is generated if missing.
    pub tag: Option<String>,

    /// Description of new tag.
    pub description: Option<String>,

    /// Copy binary into the versions directory, and track the copy instead.
    pub copy: bool,

    /// Override existing copies, duplicate paths, and drifted artifacts.
    pub force: bool,
}

/// Options for tracking a command.
#[derive(Debug, Default, Clone)]
pub struct TrackCommand {
    /// Name of new tag. A random one is generated if missing.
    pub tag: Option<String>,

    /// Description of new tag.
    pub description: Option<String>,

    /// Directory to run command from.
    pub working_directory: Option<PathBuf>,

    /// Environment variables to set for command.
    pub env: Option<BTreeMap<String, String>>,
}

/// Single row of a tag listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<'a> {
    pub app: &'a str,
    pub tag: &'a str,
    pub kind: TagKind,
    pub spec: &'a TagSpec,
    pub selected: bool,
    pub description: Option<&'a str>,
}

/// Activation engine.
///
/// Keeps artifacts on disk in lockstep with the selection recorded in a
/// [`Configuration`]. The configuration is passed into every operation, and
/// is only ever mutated in memory. Saving is left to the caller.
#[derive(Debug, Clone)]
pub struct Activation<M = BinDir>
where
    M: Materialize,
{
    materializer: M,
    versions_path: PathBuf,
    auto_select: bool,
}

impl Activation<BinDir> {
    /// Construct new activation engine from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            BinDir::new(&settings.bin_path),
            settings.versions_path(),
            settings.auto_select,
        )
    }
}

impl<M> Activation<M>
where
    M: Materialize,
{
    /// Construct new activation engine.
    pub fn new(materializer: M, versions_path: impl Into<PathBuf>, auto_select: bool) -> Self {
        Self {
            materializer,
            versions_path: versions_path.into(),
            auto_select,
        }
    }

    /// Destination of artifact for application.
    pub fn destination(&self, app: &str) -> PathBuf {
        self.materializer.destination(app)
    }

    /// Select tag of application, or unselect its current tag.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::NotTracked`] if application is unknown.
    /// - Return [`ActivationError::TagNotFound`] if tag is unknown.
    /// - Return [`ActivationError::Drift`] if current artifact was altered,
    ///   and selection is not forced.
    /// - Return [`ActivationError::Io`] if artifacts cannot be written.
    #[instrument(skip(self, config), level = "debug")]
    pub fn select(
        &self,
        config: &mut Configuration,
        app: &str,
        tag: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let record = lookup_mut(config, app)?;
        if let Some(tag) = tag {
            require_tag(record, tag)?;
        }

        if record.selected.is_some() {
            if !force {
                self.assert_valid(record)?;
            }

            self.materializer.dematerialize(app)?;
            record.selected = None;
        } else {
            self.clear_unmanaged(record, force)?;
        }

        let Some(tag) = tag else {
            info!("unselect {app}");
            return Ok(());
        };

        self.materializer.materialize(app, &record.tags[tag])?;
        record.selected = Some(tag.into());
        info!("select {app}@{tag}");

        Ok(())
    }

    /// Check that artifact of selected tag still matches what altb wrote.
    ///
    /// Always holds for command tags, and for applications without a selected
    /// tag.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::Drift`] if artifact of selected link tag is
    ///   missing, is not a symbolic link, or links to a different path.
    pub fn assert_valid(&self, record: &BinaryRecord) -> Result<()> {
        let Some((tag, selected)) = record.selected_tag() else {
            return Ok(());
        };

        let TagSpec::Link(spec) = &selected.spec else {
            return Ok(());
        };

        let reason = match self.materializer.inspect(&record.name)? {
            Artifact::Symlink(target) if target == spec.path => return Ok(()),
            Artifact::Symlink(target) => DriftReason::WrongTarget(target),
            Artifact::Other => DriftReason::NotSymlink,
            Artifact::Missing => DriftReason::Missing,
        };

        Err(ActivationError::Drift {
            app: record.name.clone(),
            tag: Some(tag.into()),
            destination: self.materializer.destination(&record.name),
            reason,
        })
    }

    /// Track binary path as tag of application.
    ///
    /// Creates the application if it is not tracked yet. Returns name of new
    /// tag.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::PathNotFound`] if path does not exist.
    /// - Return [`ActivationError::AlreadyExists`] if copy destination exists,
    ///   or another tag links to the same path, and tracking is not forced.
    /// - Return any error of [`Activation::select`].
    #[instrument(skip(self, config, opts), level = "debug")]
    pub fn track_path(
        &self,
        config: &mut Configuration,
        app: &str,
        path: &Path,
        opts: TrackPath,
    ) -> Result<String> {
        if !path.exists() {
            return Err(ActivationError::PathNotFound { path: path.into() });
        }

        let source = absolute(path)?;
        let tag = opts.tag.unwrap_or_else(random_tag);
        let target = if opts.copy {
            self.versions_path.join(app).join(format!("{app}_{tag}"))
        } else {
            source.clone()
        };

        if opts.copy && target.exists() && !opts.force {
            return Err(ActivationError::AlreadyExists {
                app: app.into(),
                tag: tag.clone(),
                path: target,
            });
        }

        let record = config
            .binaries
            .entry(app.into())
            .or_insert_with(|| BinaryRecord::new(app));
        let duplicate = record.find_link(&target).map(ToString::to_string);
        if let (Some(existing), false) = (&duplicate, opts.force) {
            return Err(ActivationError::AlreadyExists {
                app: app.into(),
                tag: existing.clone(),
                path: target,
            });
        }

        let replaces_selected = record.selected.as_deref() == Some(tag.as_str());
        let reselect = self.auto_select || replaces_selected;
        if reselect {
            self.assert_selectable(record, opts.force)?;
        }

        // INVARIANT: Artifact of a tag must go before the tag is overwritten.
        if replaces_selected {
            self.select(config, app, None, opts.force)?;
        }

        if let Some(existing) = duplicate {
            warn!("replace tag {existing} of {app} tracking {:?}", target.display());
            self.remove_tag(config, app, &existing, None, opts.force)?;
        }

        let fresh_copy = opts.copy && !target.exists();
        if opts.copy {
            copy_binary(&source, &target)?;
        }

        info!("track {:?} as {app}@{tag}", target.display());
        let spec = LinkSpec::new(target.clone(), opts.copy);
        let tag_def = Tag::link(spec, opts.description);
        if let Err(error) = self.insert(config, app, &tag, tag_def, reselect, opts.force) {
            if fresh_copy {
                discard_copy(&target);
            }
            return Err(error);
        }

        Ok(tag)
    }

    /// Track command as tag of application.
    ///
    /// Creates the application if it is not tracked yet. The command itself is
    /// never checked. Returns name of new tag.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::PathNotFound`] if working directory does
    ///   not exist.
    /// - Return any error of [`Activation::select`].
    #[instrument(skip(self, config, opts), level = "debug")]
    pub fn track_command(
        &self,
        config: &mut Configuration,
        app: &str,
        command: &str,
        opts: TrackCommand,
    ) -> Result<String> {
        let working_directory = match opts.working_directory {
            Some(path) if !path.exists() => return Err(ActivationError::PathNotFound { path }),
            Some(path) => Some(absolute(&path)?),
            None => None,
        };

        let tag = opts.tag.unwrap_or_else(random_tag);
        let record = config
            .binaries
            .entry(app.into())
            .or_insert_with(|| BinaryRecord::new(app));
        let replaces_selected = record.selected.as_deref() == Some(tag.as_str());
        let reselect = self.auto_select || replaces_selected;
        if reselect {
            self.assert_selectable(record, false)?;
        }

        if replaces_selected {
            self.select(config, app, None, false)?;
        }

        info!("track command {command:?} as {app}@{tag}");
        let spec = CommandSpec {
            command: command.into(),
            working_directory,
            env: opts.env,
        };
        self.insert(config, app, &tag, Tag::command(spec, opts.description), reselect, false)?;

        Ok(tag)
    }

    /// Rename tag of application.
    ///
    /// Selection follows the tag to its new name.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::NotTracked`] if application is unknown.
    /// - Return [`ActivationError::TagNotFound`] if old tag is unknown.
    /// - Return [`ActivationError::TagExists`] if new tag already exists.
    /// - Return any error of [`Activation::select`].
    #[instrument(skip(self, config), level = "debug")]
    pub fn rename_tag(
        &self,
        config: &mut Configuration,
        app: &str,
        old: &str,
        new: &str,
    ) -> Result<()> {
        let record = lookup_mut(config, app)?;
        let tag = require_tag(record, old)?.clone();
        if old == new {
            return Ok(());
        }

        if record.tags.contains_key(new) {
            return Err(ActivationError::TagExists {
                app: app.into(),
                tag: new.into(),
            });
        }

        record.tags.insert(new.into(), tag);
        self.remove_tag(config, app, old, Some(new), false)?;
        info!("rename {app}@{old} to {app}@{new}");

        Ok(())
    }

    /// Set or clear description of tag.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::NotTracked`] if application is unknown.
    /// - Return [`ActivationError::TagNotFound`] if tag is unknown.
    pub fn describe_tag(
        &self,
        config: &mut Configuration,
        app: &str,
        tag: &str,
        description: Option<String>,
    ) -> Result<()> {
        let record = lookup_mut(config, app)?;
        require_tag(record, tag)?;
        if let Some(entry) = record.tags.get_mut(tag) {
            entry.description = description;
        }

        Ok(())
    }

    /// Remove tag of application.
    ///
    /// Removing the selected tag unselects it first, selecting `reselect` in
    /// its place if given. `reselect` must exist either way, but is ignored
    /// when the removed tag was not selected.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::NotTracked`] if application is unknown.
    /// - Return [`ActivationError::TagNotFound`] if tag or `reselect` is
    ///   unknown.
    /// - Return [`ActivationError::ReselectRemoved`] if `reselect` names the
    ///   removed tag.
    /// - Return any error of [`Activation::select`].
    #[instrument(skip(self, config), level = "debug")]
    pub fn remove(
        &self,
        config: &mut Configuration,
        app: &str,
        tag: &str,
        reselect: Option<&str>,
    ) -> Result<()> {
        self.remove_tag(config, app, tag, reselect, false)
    }

    /// List tags of one application, or of every application.
    ///
    /// Rows come out sorted by application, then by tag.
    ///
    /// # Errors
    ///
    /// - Return [`ActivationError::NotTracked`] if application is unknown.
    pub fn list<'a>(
        &self,
        config: &'a Configuration,
        app: Option<&str>,
    ) -> Result<Vec<Listing<'a>>> {
        let records: Vec<&BinaryRecord> = match app {
            Some(app) => vec![config.binary(app).ok_or_else(|| not_tracked(app))?],
            None => config.binaries.values().collect(),
        };

        Ok(records
            .into_iter()
            .flat_map(|record| {
                record.tags.iter().map(move |(name, tag)| Listing {
                    app: record.name.as_str(),
                    tag: name.as_str(),
                    kind: tag.kind(),
                    spec: &tag.spec,
                    selected: record.selected() == Some(name.as_str()),
                    description: tag.description.as_deref(),
                })
            })
            .collect())
    }

    fn remove_tag(
        &self,
        config: &mut Configuration,
        app: &str,
        tag: &str,
        reselect: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let record = lookup_mut(config, app)?;
        require_tag(record, tag)?;
        if reselect == Some(tag) {
            return Err(ActivationError::ReselectRemoved {
                app: app.into(),
                tag: tag.into(),
            });
        }

        if let Some(reselect) = reselect {
            require_tag(record, reselect)?;
        }

        if record.selected.as_deref() == Some(tag) {
            self.select(config, app, reselect, force)?;
        }

        let record = lookup_mut(config, app)?;
        record.tags.remove(tag);
        info!("remove {app}@{tag}");

        Ok(())
    }

    fn insert(
        &self,
        config: &mut Configuration,
        app: &str,
        name: &str,
        tag: Tag,
        select: bool,
        force: bool,
    ) -> Result<()> {
        let record = lookup_mut(config, app)?;
        record.tags.insert(name.into(), tag);
        if select {
            self.select(config, app, Some(name), force)?;
        }

        Ok(())
    }

    // Same checks as `select` runs before touching anything, so callers can
    // fail before doing work of their own.
    fn assert_selectable(&self, record: &BinaryRecord, force: bool) -> Result<()> {
        if force {
            return Ok(());
        }

        if record.selected.is_some() {
            self.assert_valid(record)
        } else {
            self.assert_unmanaged_absent(record)
        }
    }

    fn assert_unmanaged_absent(&self, record: &BinaryRecord) -> Result<()> {
        if self.materializer.inspect(&record.name)? == Artifact::Missing {
            return Ok(());
        }

        Err(ActivationError::Drift {
            app: record.name.clone(),
            tag: None,
            destination: self.materializer.destination(&record.name),
            reason: DriftReason::Unmanaged,
        })
    }

    // INVARIANT: An unselected application must not leave behind an artifact
    // that the new selection would collide with.
    fn clear_unmanaged(&self, record: &BinaryRecord, force: bool) -> Result<()> {
        if !force {
            return self.assert_unmanaged_absent(record);
        }

        if self.materializer.inspect(&record.name)? == Artifact::Missing {
            return Ok(());
        }

        warn!("remove unmanaged {:?}", self.materializer.destination(&record.name).display());
        self.materializer.dematerialize(&record.name)
    }
}

fn lookup_mut<'a>(config: &'a mut Configuration, app: &str) -> Result<&'a mut BinaryRecord> {
    config.binaries.get_mut(app).ok_or_else(|| not_tracked(app))
}

fn require_tag<'a>(record: &'a BinaryRecord, tag: &str) -> Result<&'a Tag> {
    record.tag(tag).ok_or_else(|| ActivationError::TagNotFound {
        app: record.name.clone(),
        tag: tag.into(),
    })
}

fn not_tracked(app: &str) -> ActivationError {
    ActivationError::NotTracked { app: app.into() }
}

fn random_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    path::absolute(path).map_err(|source| ActivationError::Io {
        source,
        path: path.into(),
    })
}

fn discard_copy(target: &Path) {
    if let Err(error) = fs::remove_file(target) {
        warn!("failed to discard copy {:?}: {error}", target.display());
    }
}

fn copy_binary(source: &Path, target: &Path) -> Result<()> {
    let io_error = |error| ActivationError::Io {
        source: error,
        path: target.into(),
    };

    if let Some(parent) = target.parent() {
        mkdirp::mkdirp(parent).map_err(io_error)?;
    }

    debug!("copy {:?} to {:?}", source.display(), target.display());
    fs::copy(source, target).map_err(io_error)?;
    fs::set_permissions(target, fs::Permissions::from_mode(EXECUTABLE_MODE)).map_err(io_error)?;

    Ok(())
}

/// Way an artifact drifted from the recorded selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    /// Artifact of selected link tag does not exist.
    Missing,

    /// Artifact of selected link tag is not a symbolic link.
    NotSymlink,

    /// Artifact of selected link tag links somewhere else.
    WrongTarget(PathBuf),

    /// Artifact exists even though no tag is selected.
    Unmanaged,
}

impl Display for DriftReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Missing => fmt.write_str("link is missing"),
            Self::NotSymlink => write!(fmt, "not a symlink, and probably not managed by {PACKAGE_NAME}"),
            Self::WrongTarget(target) => write!(fmt, "linked to {:?} instead", target.display()),
            Self::Unmanaged => write!(fmt, "exists, but is not managed by {PACKAGE_NAME}"),
        }
    }
}

/// Activation error types.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// Application is not tracked.
    #[error("app {app} isn't tracked")]
    NotTracked { app: String },

    /// Tag does not exist in application.
    #[error("tag {tag} doesn't exist in app {app}")]
    TagNotFound { app: String, tag: String },

    /// Tag already exists in application.
    #[error("tag {tag} already exists in app {app}")]
    TagExists { app: String, tag: String },

    /// Tag to reselect is the tag being removed.
    #[error("cannot reselect tag {tag} of app {app} while removing it")]
    ReselectRemoved { app: String, tag: String },

    /// Path to track does not exist.
    #[error("path {:?} doesn't exist", path.display())]
    PathNotFound { path: PathBuf },

    /// Path is already tracked, or copy destination is taken.
    #[error("path {:?} already exists at tag {tag} of app {app}, use force to override", path.display())]
    AlreadyExists {
        app: String,
        tag: String,
        path: PathBuf,
    },

    /// Artifact on disk no longer matches the selected tag.
    #[error("drift detected for app {app}: {:?} {reason}, remove it or use force to continue", destination.display())]
    Drift {
        app: String,
        /// Selected tag, or none if the artifact is not managed at all.
        tag: Option<String>,
        destination: PathBuf,
        reason: DriftReason,
    },

    /// File system operation failed.
    #[error("file system operation failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = ActivationError> = std::result::Result<T, E>;
