// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration document that altb persists to
//! simplify the process of serialization and deserialization. File I/O is left
//! to the [`store`](crate::store) module to figure out.
//!
//! # General Layout
//!
//! The configuration document maps application names to __binary records__.
//! Each binary record holds a set of named __tags__, i.e., versions of the
//! application, and optionally names the tag that is currently __selected__.
//!
//! A tag is either a __link__ to a binary file on the user's file system, or a
//! __command__ that altb runs on the user's behalf through a generated shim
//! script.
//!
//! ```yaml
//! version: 0.1.0
//! binaries:
//!   python:
//!     name: python
//!     tags:
//!       "3.12":
//!         kind: link
//!         spec:
//!           path: /usr/bin/python3.12
//!       venv:
//!         kind: command
//!         description: project virtualenv
//!         spec:
//!           command: .venv/bin/python
//!           working_directory: /home/blah/project
//!     selected: "3.12"
//! ```

use crate::migrate::LATEST_VERSION;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Whole persisted state of altb.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Tracked applications keyed by application name.
    #[serde(default)]
    pub binaries: BTreeMap<String, BinaryRecord>,

    /// Schema version of the document.
    pub version: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            binaries: BTreeMap::new(),
            version: LATEST_VERSION.into(),
        }
    }
}

impl Configuration {
    /// Lookup binary record of an application.
    pub fn binary(&self, app: &str) -> Option<&BinaryRecord> {
        self.binaries.get(app)
    }

    /// Check cross-field invariants that serde cannot express.
    ///
    /// Collects every violation instead of stopping at the first one, so the
    /// caller can report all of them at once.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for (key, record) in &self.binaries {
            if record.name != *key {
                violations.push(format!(
                    "binaries.{key}.name: expected {key:?}, found {:?}",
                    record.name
                ));
            }

            if let Some(selected) = &record.selected {
                if !record.tags.contains_key(selected) {
                    violations.push(format!(
                        "binaries.{key}.selected: tag {selected:?} does not exist"
                    ));
                }
            }
        }

        violations
    }
}

impl FromStr for Configuration {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Configuration {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_yaml::to_string(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Collection of tags for one tracked application.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryRecord {
    /// Name of the application. Also the file name of its artifact in the
    /// bin directory.
    pub name: String,

    #[serde(default)]
    pub(crate) tags: BTreeMap<String, Tag>,

    // INVARIANT: Only the activation engine moves this pointer, because the
    // artifact on disk must follow it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) selected: Option<String>,
}

impl BinaryRecord {
    /// Construct new binary record without any tags.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            selected: None,
        }
    }

    /// Name of the currently selected tag.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// All tags of the application.
    pub fn tags(&self) -> &BTreeMap<String, Tag> {
        &self.tags
    }

    /// Lookup tag by name.
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    /// Currently selected tag along with its name.
    pub fn selected_tag(&self) -> Option<(&str, &Tag)> {
        let name = self.selected.as_deref()?;
        self.tags.get(name).map(|tag| (name, tag))
    }

    /// Find link tag that already points at target path.
    pub fn find_link(&self, path: &Path) -> Option<&str> {
        let identity = TagIdentity::Link(path);
        self.tags
            .iter()
            .find(|(_, tag)| tag.identity() == identity)
            .map(|(name, _)| name.as_str())
    }
}

/// Tag kind discriminator.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Link,
    Command,
}

impl Display for TagKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Link => fmt.write_str("link"),
            Self::Command => fmt.write_str("command"),
        }
    }
}

/// One tracked version of an application.
///
/// The kind of a tag is derived from its spec, so the two can never disagree.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(from = "TagRepr", into = "TagRepr")]
pub struct Tag {
    /// Free-form note shown in listings.
    pub description: Option<String>,

    /// What the tag refers to.
    pub spec: TagSpec,
}

impl Tag {
    /// Construct new link tag.
    pub fn link(spec: LinkSpec, description: Option<String>) -> Self {
        Self {
            description,
            spec: TagSpec::Link(spec),
        }
    }

    /// Construct new command tag.
    pub fn command(spec: CommandSpec, description: Option<String>) -> Self {
        Self {
            description,
            spec: TagSpec::Command(spec),
        }
    }

    pub fn kind(&self) -> TagKind {
        match self.spec {
            TagSpec::Link(_) => TagKind::Link,
            TagSpec::Command(_) => TagKind::Command,
        }
    }

    /// Identity used to tell whether two tags refer to the same thing.
    ///
    /// Ignores the description, and everything in a command spec except the
    /// command string itself.
    pub fn identity(&self) -> TagIdentity<'_> {
        match &self.spec {
            TagSpec::Link(spec) => TagIdentity::Link(spec.path.as_path()),
            TagSpec::Command(spec) => TagIdentity::Command(spec.command.as_str()),
        }
    }
}

/// Identity of a tag for deduplication.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TagIdentity<'a> {
    Link(&'a Path),
    Command(&'a str),
}

/// What a tag points at.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TagSpec {
    Link(LinkSpec),
    Command(CommandSpec),
}

/// Reference to a binary file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSpec {
    /// Absolute path to the binary.
    pub path: PathBuf,

    /// Path is a private copy owned by altb in its versions directory.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_copy: bool,
}

impl LinkSpec {
    pub fn new(path: impl Into<PathBuf>, is_copy: bool) -> Self {
        Self {
            path: path.into(),
            is_copy,
        }
    }
}

/// Shell command that altb runs through its shim script.
#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    /// Shell-parseable command line.
    pub command: String,

    /// Directory to run the command from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Environment variables to set on top of the caller's environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

// On-disk shape of a tag: `kind` sits next to `description` and `spec`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
enum TagRepr {
    Link {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        spec: LinkSpec,
    },

    Command {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        spec: CommandSpec,
    },
}

impl From<TagRepr> for Tag {
    fn from(repr: TagRepr) -> Self {
        match repr {
            TagRepr::Link { description, spec } => Tag::link(spec, description),
            TagRepr::Command { description, spec } => Tag::command(spec, description),
        }
    }
}

impl From<Tag> for TagRepr {
    fn from(tag: Tag) -> Self {
        match tag.spec {
            TagSpec::Link(spec) => TagRepr::Link {
                description: tag.description,
                spec,
            },
            TagSpec::Command(spec) => TagRepr::Command {
                description: tag.description,
                spec,
            },
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(serde_yaml::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(serde_yaml::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn sample() -> Configuration {
        let mut python = BinaryRecord::new("python");
        python.tags.insert(
            "3.12".into(),
            Tag::link(LinkSpec::new("/usr/bin/python3.12", false), None),
        );
        python.tags.insert(
            "venv".into(),
            Tag::command(
                CommandSpec {
                    command: ".venv/bin/python".into(),
                    working_directory: Some("/home/blah/project".into()),
                    env: Some(BTreeMap::from([("PYTHONWARNINGS".into(), "ignore".into())])),
                },
                Some("project virtualenv".into()),
            ),
        );
        python.selected = Some("3.12".into());

        let mut config = Configuration::default();
        config.binaries.insert("python".into(), python);
        config
    }

    #[test]
    fn deserialize_configuration() -> anyhow::Result<()> {
        let result: Configuration = indoc! {r#"
            version: 0.1.0
            binaries:
              python:
                name: python
                tags:
                  "3.12":
                    kind: link
                    spec:
                      path: /usr/bin/python3.12
                  venv:
                    kind: command
                    description: project virtualenv
                    spec:
                      command: .venv/bin/python
                      working_directory: /home/blah/project
                      env:
                        PYTHONWARNINGS: ignore
                selected: "3.12"
        "#}
        .parse()?;

        assert_eq!(result, sample());

        Ok(())
    }

    #[test]
    fn serialize_then_parse_is_identity() -> anyhow::Result<()> {
        let expect = sample();
        let result: Configuration = expect.to_string().parse()?;
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_omits_empty_fields() {
        let mut app = BinaryRecord::new("app");
        app.tags.insert(
            "a".into(),
            Tag::link(LinkSpec::new("/bin/true", false), None),
        );
        let mut config = Configuration::default();
        config.binaries.insert("app".into(), app);

        let result = config.to_string();
        assert!(!result.contains("description"));
        assert!(!result.contains("is_copy"));
        assert!(!result.contains("selected"));
        assert!(result.contains("kind: link"));
    }

    #[test]
    fn reject_unknown_fields() {
        let top_level = indoc! {r#"
            version: 0.1.0
            binaries: {}
            colour: blue
        "#};
        assert!(top_level.parse::<Configuration>().is_err());

        let nested = indoc! {r#"
            version: 0.1.0
            binaries:
              app:
                name: app
                tags:
                  a:
                    kind: link
                    spec:
                      path: /bin/true
                      mode: 755
        "#};
        assert!(nested.parse::<Configuration>().is_err());

        let wrong_kind = indoc! {r#"
            version: 0.1.0
            binaries:
              app:
                name: app
                tags:
                  a:
                    kind: alias
                    spec:
                      path: /bin/true
        "#};
        assert!(wrong_kind.parse::<Configuration>().is_err());
    }

    #[test]
    fn tag_identity_ignores_description() {
        let lhs = Tag::link(LinkSpec::new("/bin/true", false), Some("one".into()));
        let rhs = Tag::link(LinkSpec::new("/bin/true", true), Some("two".into()));
        assert_eq!(lhs.identity(), rhs.identity());

        let lhs = Tag::command(CommandSpec::new("echo hi"), None);
        let mut spec = CommandSpec::new("echo hi");
        spec.working_directory = Some("/tmp".into());
        let rhs = Tag::command(spec, None);
        assert_eq!(lhs.identity(), rhs.identity());

        let link = Tag::link(LinkSpec::new("echo hi", false), None);
        assert_ne!(link.identity(), lhs.identity());
    }

    #[test]
    fn violations_report_every_broken_record() {
        let mut config = sample();
        let mut broken = BinaryRecord::new("node");
        broken.selected = Some("20".into());
        config.binaries.insert("nodejs".into(), broken);

        let result = config.violations();
        assert_eq!(result.len(), 2);
        assert!(result[0].contains("binaries.nodejs.name"));
        assert!(result[1].contains("binaries.nodejs.selected"));
    }
}
