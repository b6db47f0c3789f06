// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command tag execution.
//!
//! The stored command string is split into words the way a POSIX shell would
//! split it, and the caller's arguments are appended verbatim. The result is
//! executed directly, never handed to a shell, so arguments are not expanded a
//! second time. Standard I/O is inherited from altb.

use crate::config::{CommandSpec, Configuration, TagSpec};

use std::{
    io,
    path::PathBuf,
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument};

/// Run selected command tag of application.
///
/// Blocks until the command exits, and returns its exit status.
///
/// # Errors
///
/// - Return [`RunError::NotTracked`] if application is unknown.
/// - Return [`RunError::NoSelection`] if application has no selected tag.
/// - Return [`RunError::WrongTagKind`] if selected tag is not a command tag.
/// - Return [`RunError::PathNotFound`] if working directory does not exist.
/// - Return [`RunError::Spawn`] if command cannot be started.
#[instrument(skip(config, args), level = "debug")]
pub fn run(config: &Configuration, app: &str, args: &[String]) -> Result<ExitStatus> {
    let mut command = prepare(config, app, args)?;
    debug!("spawn {command:?}");

    let program = command.get_program().to_string_lossy().into_owned();
    command
        .status()
        .map_err(|source| RunError::Spawn { source, program })
}

/// Build process for selected command tag of application without spawning it.
///
/// # Errors
///
/// - Return every error of [`run`] except [`RunError::Spawn`].
pub fn prepare(config: &Configuration, app: &str, args: &[String]) -> Result<Command> {
    let record = config
        .binary(app)
        .ok_or_else(|| RunError::NotTracked { app: app.into() })?;
    let (tag, selected) = record
        .selected_tag()
        .ok_or_else(|| RunError::NoSelection { app: app.into() })?;

    let TagSpec::Command(spec) = &selected.spec else {
        return Err(RunError::WrongTagKind {
            app: app.into(),
            tag: tag.into(),
        });
    };

    build(spec, args).map_err(|error| match error {
        BuildError::PathNotFound { path } => RunError::PathNotFound {
            app: app.into(),
            tag: tag.into(),
            path,
        },
        BuildError::Parse(source) => RunError::Parse {
            app: app.into(),
            tag: tag.into(),
            source,
        },
        BuildError::EmptyCommand => RunError::EmptyCommand {
            app: app.into(),
            tag: tag.into(),
        },
    })
}

fn build(spec: &CommandSpec, args: &[String]) -> Result<Command, BuildError> {
    let words = shell_words::split(&spec.command).map_err(BuildError::Parse)?;
    let (program, rest) = words.split_first().ok_or(BuildError::EmptyCommand)?;

    let mut command = Command::new(program);
    command.args(rest).args(args);

    if let Some(path) = &spec.working_directory {
        if !path.is_dir() {
            return Err(BuildError::PathNotFound { path: path.clone() });
        }

        command.current_dir(path);
    }

    if let Some(env) = &spec.env {
        command.envs(env);
    }

    Ok(command)
}

#[derive(Debug)]
enum BuildError {
    PathNotFound { path: PathBuf },
    Parse(shell_words::ParseError),
    EmptyCommand,
}

/// Command runner error types.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("app {app} isn't tracked")]
    NotTracked { app: String },

    #[error("app {app} doesn't have any selected tag")]
    NoSelection { app: String },

    /// Only command tags can be run.
    #[error("tag {tag} of app {app} must be of kind command to be runnable")]
    WrongTagKind { app: String, tag: String },

    #[error("path {:?} doesn't exist for command in tag {tag} of app {app}", path.display())]
    PathNotFound {
        app: String,
        tag: String,
        path: PathBuf,
    },

    /// Command string has unbalanced quoting.
    #[error("failed to split command of tag {tag} of app {app}")]
    Parse {
        app: String,
        tag: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("command of tag {tag} of app {app} is empty")]
    EmptyCommand { app: String, tag: String },

    #[error("failed to spawn {program:?}")]
    Spawn {
        #[source]
        source: io::Error,
        program: String,
    },
}

/// Friendly result alias :3
type Result<T, E = RunError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BinaryRecord, LinkSpec, Tag};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{collections::BTreeMap, ffi::OsStr};
    use tempfile::TempDir;

    fn config_with(spec: CommandSpec) -> Configuration {
        let mut record = BinaryRecord::new("app");
        record.tags.insert("a".into(), Tag::command(spec, None));
        record.selected = Some("a".into());

        let mut config = Configuration::default();
        config.binaries.insert("app".into(), record);
        config
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn prepare_splits_command_and_appends_args() -> anyhow::Result<()> {
        let config = config_with(CommandSpec::new("echo 'hi there' \"$HOME\""));
        let command = prepare(&config, "app", &args(&["a b", "*"]))?;

        assert_eq!(command.get_program(), OsStr::new("echo"));
        let result: Vec<&OsStr> = command.get_args().collect();
        let expect: Vec<&OsStr> = ["hi there", "$HOME", "a b", "*"]
            .into_iter()
            .map(OsStr::new)
            .collect();
        assert_eq!(result, expect);
        assert_eq!(command.get_current_dir(), None);

        Ok(())
    }

    #[test]
    fn prepare_overlays_env() -> anyhow::Result<()> {
        let spec = CommandSpec {
            env: Some(BTreeMap::from([("LANG".into(), "C".into())])),
            ..CommandSpec::new("locale")
        };
        let config = config_with(spec);
        let command = prepare(&config, "app", &[])?;

        let result: Vec<(&OsStr, Option<&OsStr>)> = command.get_envs().collect();
        assert_eq!(result, vec![(OsStr::new("LANG"), Some(OsStr::new("C")))]);

        Ok(())
    }

    #[test]
    fn prepare_rejects_unrunnable_selection() {
        let mut config = config_with(CommandSpec::new("echo"));
        let result = prepare(&config, "ghost", &[]);
        assert!(matches!(result, Err(RunError::NotTracked { .. })));

        if let Some(record) = config.binaries.get_mut("app") {
            record.selected = None;
        }
        let result = prepare(&config, "app", &[]);
        assert!(matches!(result, Err(RunError::NoSelection { .. })));

        if let Some(record) = config.binaries.get_mut("app") {
            let spec = LinkSpec::new("/usr/bin/true", false);
            record.tags.insert("b".into(), Tag::link(spec, None));
            record.selected = Some("b".into());
        }
        let result = prepare(&config, "app", &[]);
        assert!(matches!(result, Err(RunError::WrongTagKind { ref tag, .. }) if tag == "b"));
    }

    #[test_case("echo 'unbalanced"; "unbalanced quote")]
    #[test_case("   "; "blank command")]
    #[test]
    fn prepare_rejects_malformed_command(command: &str) {
        let config = config_with(CommandSpec::new(command));
        let result = prepare(&config, "app", &[]);
        assert!(matches!(
            result,
            Err(RunError::Parse { .. } | RunError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn run_requires_working_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let spec = CommandSpec {
            working_directory: Some(dir.path().join("gone")),
            ..CommandSpec::new("true")
        };
        let config = config_with(spec);

        let result = run(&config, "app", &[]);
        assert!(matches!(result, Err(RunError::PathNotFound { .. })));

        Ok(())
    }

    #[test]
    fn run_propagates_exit_status() -> anyhow::Result<()> {
        let config = config_with(CommandSpec::new("sh -c 'exit \"$1\"' sh"));
        let status = run(&config, "app", &args(&["3"]))?;
        assert_eq!(status.code(), Some(3));

        Ok(())
    }

    #[test]
    fn run_inside_working_directory_with_env() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("marker"), "")?;
        let spec = CommandSpec {
            working_directory: Some(dir.path().into()),
            env: Some(BTreeMap::from([("ALTB_PROBE".into(), "yes".into())])),
            ..CommandSpec::new(r#"sh -c 'test -f marker && test "$ALTB_PROBE" = yes'"#)
        };
        let config = config_with(spec);

        let status = run(&config, "app", &[])?;
        assert!(status.success());

        Ok(())
    }

    #[test]
    fn run_reports_missing_program() {
        let config = config_with(CommandSpec::new("altb-surely-missing-program"));
        let result = run(&config, "app", &[]);
        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }
}
