use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use tokenart_service::config::Config;

/// The name of the configuration file.
pub const CONFIG_RC_FILE_NAME: &str = ".tokenartrc";

/// A utility to resolve the artwork of bridged NFTs from the command line.
///
/// Defaults for the options can be put into `~/.tokenartrc` or a `.tokenartrc` in the current
/// directory or any of its parents.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to the service configuration file (YAML).
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The severity level of logging output.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, Subcommand)]
enum Commands {
    /// Prints the candidate URLs of identifiers, without any network access.
    Normalize {
        /// The identifiers to normalize, e.g. `ipfs://<cid>/1.json`.
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Resolves identifiers into loadable artwork.
    Resolve {
        /// The identifiers to resolve.
        #[arg(required = true)]
        identifiers: Vec<String>,

        /// Overrides the resolution deadline, e.g. `10s`.
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Lists the tokens an account holds on a bridge.
    Tokens(TokensArgs),
    /// Forgets all remembered resolutions of the current session.
    ///
    /// Requires a `session_dir`, otherwise the session never outlives a single command.
    EndSession,
}

#[derive(Clone, Debug, Args)]
struct TokensArgs {
    /// The name of the bridge, as configured under `bridges`.
    #[arg(long)]
    bridge: Option<String>,

    /// The chain to list tokens on.
    #[arg(long)]
    chain: Option<u64>,

    /// The account holding the tokens.
    #[arg(long)]
    account: Option<String>,

    /// Only lists tokens whose name, symbol, address or token id contain this text.
    #[arg(long, default_value = "")]
    search: String,

    /// Also resolves the artwork of every listed token.
    #[arg(long)]
    resolve: bool,
}

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
struct ConfigFile {
    pub config: Option<PathBuf>,
    pub session_dir: Option<PathBuf>,
    pub bridge: Option<String>,
    pub account: Option<String>,
}

impl ConfigFile {
    pub fn parse(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(buf) => toml::from_str(&buf).context("Could not parse configuration file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Configuration file not found");
                Ok(Self::default())
            }
            Err(e) => Err(e).context(format!(
                "Could not read configuration file at {}",
                path.display()
            )),
        }
    }
}

/// The command to run, with all defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Normalize {
        identifiers: Vec<String>,
    },
    Resolve {
        identifiers: Vec<String>,
    },
    Tokens {
        bridge: String,
        chain: Option<u64>,
        account: Option<String>,
        search: String,
        resolve: bool,
    },
    EndSession,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub config: Config,
    pub log_level: LevelFilter,
    pub command: Command,
}

impl Settings {
    pub fn get() -> Result<Self> {
        let cli = Cli::parse();

        let global_config_path = find_global_config_file()?;
        let global_config_file = ConfigFile::parse(&global_config_path)?;
        let project_config_file = match find_project_config_file() {
            Some(path) if path != global_config_path => ConfigFile::parse(&path)?,
            _ => ConfigFile::default(),
        };

        Self::from_parts(cli, project_config_file, global_config_file)
    }

    fn from_parts(cli: Cli, mut project: ConfigFile, mut global: ConfigFile) -> Result<Self> {
        let config_path = cli
            .config
            .or_else(|| project.config.take())
            .or_else(|| global.config.take());
        let mut config =
            Config::get(config_path.as_deref()).context("failed loading config")?;

        if config.session_dir.is_none() {
            config.session_dir = project.session_dir.take().or(global.session_dir.take());
        }

        let command = match cli.command {
            Commands::Normalize { identifiers } => Command::Normalize { identifiers },
            Commands::EndSession => {
                if config.session_dir.is_none() {
                    bail!(
                        "No session directory configured. Put `session_dir` in .tokenartrc or the service configuration."
                    );
                }
                Command::EndSession
            }
            Commands::Resolve {
                identifiers,
                timeout,
            } => {
                if let Some(timeout) = timeout {
                    config.resolution_timeout = timeout;
                }
                Command::Resolve { identifiers }
            }
            Commands::Tokens(args) => {
                let bridge = match args
                    .bridge
                    .or_else(|| project.bridge.take())
                    .or_else(|| global.bridge.take())
                {
                    Some(bridge) => bridge,
                    None => {
                        let enabled = config.enabled_bridges();
                        let mut names = enabled.keys();
                        match (names.next(), names.next()) {
                            (Some(name), None) => name.to_string(),
                            _ => bail!(
                                "No bridge provided. Pass it either via the `--bridge` option or put it in .tokenartrc."
                            ),
                        }
                    }
                };

                Command::Tokens {
                    bridge,
                    chain: args.chain,
                    account: args
                        .account
                        .or_else(|| project.account.take())
                        .or_else(|| global.account.take()),
                    search: args.search,
                    resolve: args.resolve,
                }
            }
        };

        Ok(Settings {
            config,
            log_level: cli.log_level,
            command,
        })
    }
}

fn find_global_config_file() -> Result<PathBuf> {
    dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not find home dir"))
        .map(|mut path| {
            path.push(CONFIG_RC_FILE_NAME);
            path
        })
}

fn find_project_config_file() -> Option<PathBuf> {
    std::env::current_dir().ok().and_then(|mut path| {
        loop {
            path.push(CONFIG_RC_FILE_NAME);
            if path.exists() {
                return Some(path);
            }
            path.pop();
            if !path.pop() {
                return None;
            }
        }
    })
}
