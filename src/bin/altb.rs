// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use altb::{
    activation::{Activation, Listing, TrackCommand, TrackPath},
    config::{Configuration, TagSpec},
    path::Settings,
    runner,
    store::Store,
};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use inquire::{Confirm, Select};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::exit,
    str::FromStr,
};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "altb [options] <altb-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        let settings = Settings::from_env()?;
        let ctx = Context {
            store: Store::new(&settings.config_path),
            engine: Activation::from_settings(&settings),
        };

        match self.command {
            Command::Track(TrackCommandKind::Path(opts)) => run_track_path(&ctx, opts),
            Command::Track(TrackCommandKind::Command(opts)) => run_track_command(&ctx, opts),
            Command::Use(opts) => run_use(&ctx, opts),
            Command::Unlink(opts) => run_unlink(&ctx, opts),
            Command::Run(opts) => return run_run(&ctx, opts),
            Command::Rename(opts) => run_rename(&ctx, opts),
            Command::Describe(opts) => run_describe(&ctx, opts),
            Command::Untrack(opts) => run_untrack(&ctx, opts),
            Command::List(opts) => run_list(&ctx, opts),
            Command::Config(opts) => run_config(&ctx, opts),
        }?;

        Ok(0)
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Track new tag of an application.
    #[command(subcommand)]
    Track(TrackCommandKind),

    /// Select which tag of an application to use.
    #[command(override_usage = "altb use [options] <app_name>[@<tag>]")]
    Use(UseOptions),

    /// Unselect current tag of an application.
    #[command(override_usage = "altb unlink [options] <app_name>")]
    Unlink(UnlinkOptions),

    /// Run selected command tag of an application with propagated arguments.
    #[command(override_usage = "altb run <app_name> [-- <args>...]")]
    Run(RunOptions),

    /// Rename tag of an application.
    #[command(override_usage = "altb rename <app_name>@<tag> <new_tag>")]
    Rename(RenameOptions),

    /// Set or clear description of a tag.
    #[command(override_usage = "altb describe [options] <app_name>@<tag>")]
    Describe(DescribeOptions),

    /// Stop tracking a tag of an application.
    #[command(override_usage = "altb untrack [options] <app_name>[@<tag>]")]
    Untrack(UntrackOptions),

    /// List tracked applications and their tags.
    #[command(override_usage = "altb list [options] [app_name]")]
    List(ListOptions),

    /// Print configuration document.
    #[command(override_usage = "altb config [options]")]
    Config(ConfigOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum TrackCommandKind {
    /// Track binary path as link tag.
    #[command(override_usage = "altb track path [options] <app_name>[@<tag>] <path>")]
    Path(TrackPathOptions),

    /// Track shell command as command tag.
    #[command(override_usage = "altb track command [options] <app_name>[@<tag>] <command>")]
    Command(TrackCommandOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TrackPathOptions {
    /// Application to track, with optional tag name.
    #[arg(value_name = "app_name[@tag]")]
    pub app: AppRef,

    /// Path to binary.
    #[arg(value_name = "path")]
    pub path: PathBuf,

    /// Brief description of tag.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,

    /// Copy binary into versions directory, mainly for binaries that move.
    #[arg(short, long)]
    pub copy: bool,

    /// Override existing copies, duplicate paths, and drifted links.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TrackCommandOptions {
    /// Application to track, with optional tag name.
    #[arg(value_name = "app_name[@tag]")]
    pub app: AppRef,

    /// Command line to run.
    #[arg(value_name = "command")]
    pub command: String,

    /// Brief description of tag.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,

    /// Working directory of command.
    #[arg(short, long, value_name = "path")]
    pub working_directory: Option<PathBuf>,

    /// Environment variable to set for command.
    #[arg(short, long, value_name = "key=value", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UseOptions {
    /// Application to select tag of. Prompts for tag if missing.
    #[arg(value_name = "app_name[@tag]")]
    pub app: AppRef,

    /// Replace link even if it was changed outside of altb.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UnlinkOptions {
    /// Application to unselect.
    #[arg(value_name = "app_name")]
    pub app_name: String,

    /// Remove link even if it was changed outside of altb.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Application to run.
    #[arg(value_name = "app_name")]
    pub app_name: String,

    /// Arguments passed verbatim to command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "args")]
    pub args: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RenameOptions {
    /// Tag to rename.
    #[arg(value_name = "app_name@tag")]
    pub app: AppRef,

    /// New name of tag.
    #[arg(value_name = "new_tag")]
    pub new_tag: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DescribeOptions {
    /// Tag to describe.
    #[arg(value_name = "app_name@tag")]
    pub app: AppRef,

    /// New description. Clears description if missing.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,

    /// Clear description without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UntrackOptions {
    /// Tag to stop tracking. Prompts for tag if missing.
    #[arg(value_name = "app_name[@tag]")]
    pub app: AppRef,

    /// Tag to select in place of removed tag if it was selected.
    #[arg(short, long, value_name = "tag")]
    pub reselect: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// List only this application.
    #[arg(value_name = "app_name")]
    pub app_name: Option<String>,

    /// Print every tag, not just selected ones.
    #[arg(short, long)]
    pub all: bool,

    /// Print tag names only.
    #[arg(short, long)]
    pub short: bool,

    /// Print selected tag of application only.
    #[arg(short = 't', long, requires = "app_name")]
    pub current_tag: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ConfigOptions {
    /// Print as JSON instead of YAML.
    #[arg(short, long)]
    pub json: bool,
}

/// Application name with optional tag, i.e., `<app_name>[@<tag>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AppRef {
    pub name: String,
    pub tag: Option<String>,
}

impl AppRef {
    fn require_tag(&self) -> Result<&str> {
        self.tag
            .as_deref()
            .ok_or_else(|| anyhow!("tag not specified for app {}", self.name))
    }
}

impl FromStr for AppRef {
    type Err = String;

    fn from_str(data: &str) -> std::result::Result<Self, Self::Err> {
        let (name, tag) = match data.split_once('@') {
            Some((name, tag)) => (name, Some(tag)),
            None => (data, None),
        };

        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(format!(
                "app name must be in format <app_name>[@<tag>], e.g., python@3.9.8, found {data:?}"
            ));
        }

        if tag.is_some_and(str::is_empty) {
            return Err(format!("tag of {name} is empty"));
        }

        Ok(Self {
            name: name.into(),
            tag: tag.map(Into::into),
        })
    }
}

struct Context {
    store: Store,
    engine: Activation,
}

/// Tag offered in interactive prompts.
struct TagChoice {
    name: String,
    label: String,
}

impl Display for TagChoice {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.label)
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match Cli::parse().run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

fn run_track_path(ctx: &Context, opts: TrackPathOptions) -> Result<()> {
    let track = TrackPath {
        tag: opts.app.tag,
        description: opts.description,
        copy: opts.copy,
        force: opts.force,
    };
    ctx.store.use_config(|config| {
        ctx.engine
            .track_path(config, &opts.app.name, &opts.path, track)?;
        Ok(())
    })
}

fn run_track_command(ctx: &Context, opts: TrackCommandOptions) -> Result<()> {
    let track = TrackCommand {
        tag: opts.app.tag,
        description: opts.description,
        working_directory: opts.working_directory,
        env: (!opts.env.is_empty()).then(|| opts.env.into_iter().collect::<BTreeMap<_, _>>()),
    };
    ctx.store.use_config(|config| {
        ctx.engine
            .track_command(config, &opts.app.name, &opts.command, track)?;
        Ok(())
    })
}

fn run_use(ctx: &Context, opts: UseOptions) -> Result<()> {
    ctx.store.use_config(|config| {
        let tag = match opts.app.tag {
            Some(tag) => tag,
            None => prompt_tag(config, &opts.app.name, "Select tag to use:")?,
        };
        ctx.engine
            .select(config, &opts.app.name, Some(&tag), opts.force)?;
        Ok(())
    })
}

fn run_unlink(ctx: &Context, opts: UnlinkOptions) -> Result<()> {
    ctx.store.use_config(|config| {
        ctx.engine.select(config, &opts.app_name, None, opts.force)?;
        Ok(())
    })
}

fn run_run(ctx: &Context, opts: RunOptions) -> Result<i32> {
    let config = ctx.store.open()?;
    let status = runner::run(&config, &opts.app_name, &opts.args)?;

    Ok(match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    })
}

fn run_rename(ctx: &Context, opts: RenameOptions) -> Result<()> {
    let old = opts.app.require_tag()?;
    ctx.store.use_config(|config| {
        ctx.engine
            .rename_tag(config, &opts.app.name, old, &opts.new_tag)?;
        Ok(())
    })
}

fn run_describe(ctx: &Context, opts: DescribeOptions) -> Result<()> {
    let tag = opts.app.require_tag()?;
    if opts.description.is_none() && !opts.yes {
        let proceed = Confirm::new("Description will be deleted, are you sure?")
            .with_default(false)
            .prompt()?;
        if !proceed {
            bail!("description of {}@{tag} left untouched", opts.app.name);
        }
    }

    ctx.store.use_config(|config| {
        ctx.engine
            .describe_tag(config, &opts.app.name, tag, opts.description)?;
        Ok(())
    })
}

fn run_untrack(ctx: &Context, opts: UntrackOptions) -> Result<()> {
    ctx.store.use_config(|config| {
        let tag = match opts.app.tag {
            Some(tag) => tag,
            None => prompt_tag(config, &opts.app.name, "Select tag to untrack:")?,
        };
        ctx.engine
            .remove(config, &opts.app.name, &tag, opts.reselect.as_deref())?;
        Ok(())
    })
}

fn run_list(ctx: &Context, opts: ListOptions) -> Result<()> {
    let config = ctx.store.open()?;
    if config.binaries.is_empty() {
        eprintln!("No binaries currently tracked, please use \"altb track\" command to start");
        return Ok(());
    }

    if let (true, Some(app)) = (opts.current_tag, &opts.app_name) {
        let record = config
            .binary(app)
            .ok_or_else(|| anyhow!("app {app} isn't tracked"))?;
        let tag = record
            .selected()
            .ok_or_else(|| anyhow!("app {app} doesn't have any selected tag"))?;
        println!("{tag}");
        return Ok(());
    }

    let mut rows = ctx.engine.list(&config, opts.app_name.as_deref())?;
    rows.retain(|row| opts.all || row.selected);
    rows.sort_by(|a, b| a.app.cmp(b.app).then_with(|| natural_cmp(a.tag, b.tag)));

    let apps: Vec<&str> = match &opts.app_name {
        Some(app) => vec![app.as_str()],
        None => config.binaries.keys().map(String::as_str).collect(),
    };
    for app in apps {
        println!("{app}");
        for row in rows.iter().filter(|row| row.app == app) {
            println!("{}", render_row(row, opts.short));
        }
    }

    Ok(())
}

fn run_config(ctx: &Context, opts: ConfigOptions) -> Result<()> {
    let config = ctx.store.open()?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{config}");
    }

    Ok(())
}

fn prompt_tag(config: &Configuration, app: &str, message: &str) -> Result<String> {
    let record = config
        .binary(app)
        .ok_or_else(|| anyhow!("app {app} isn't tracked"))?;
    let mut choices: Vec<TagChoice> = record
        .tags()
        .iter()
        .map(|(name, tag)| TagChoice {
            name: name.clone(),
            label: format!("{name} - {}", describe_spec(&tag.spec)),
        })
        .collect();
    if choices.is_empty() {
        bail!("app {app} doesn't have any tags");
    }

    choices.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    let choice = Select::new(message, choices).prompt()?;

    Ok(choice.name)
}

fn render_row(row: &Listing<'_>, short: bool) -> String {
    let marker = if row.selected { "*" } else { " " };
    let mut line = format!("  {marker} {}", row.tag);
    if short {
        return line;
    }

    line.push_str(&format!(" - {}", describe_spec(row.spec)));
    if let Some(description) = row.description {
        line.push_str(&format!("\n      {description}"));
    }

    line
}

fn describe_spec(spec: &TagSpec) -> String {
    match spec {
        TagSpec::Link(spec) => spec.path.display().to_string(),
        TagSpec::Command(spec) => match &spec.working_directory {
            Some(path) => format!("{} at {}", spec.command, path.display()),
            None => spec.command.clone(),
        },
    }
}

fn parse_env_pair(data: &str) -> std::result::Result<(String, String), String> {
    match data.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.into(), value.into())),
        _ => Err(format!("expected key=value, found {data:?}")),
    }
}

/// Compare tag names so that embedded numbers sort by value, e.g., `3.9` comes
/// before `3.10`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut lhs = a.chars().peekable();
    let mut rhs = b.chars().peekable();

    loop {
        match (lhs.peek().copied(), rhs.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let x = take_number(&mut lhs);
                let y = take_number(&mut rhs);
                let ordering = x
                    .len()
                    .cmp(&y.len())
                    .then_with(|| x.cmp(&y));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                lhs.next();
                rhs.next();
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(digit) = chars.next_if(char::is_ascii_digit) {
        digits.push(digit);
    }

    let trimmed = digits.trim_start_matches('0');
    trimmed.to_string()
}
