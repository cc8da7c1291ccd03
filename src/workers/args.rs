//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file (`config.toml` by default)
//! - Merging CLI with file config (CLI takes precedence)

use crate::workers::settings::Settings;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Peerdrop - browser-compatible P2P chat and file transfer.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Signaling store directory shared with the remote peer.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Display name for this peer.
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Directory where received files are saved.
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,

    /// Settings file. Defaults to ./config.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for logs and default stores. Defaults to ~/.peerdrop/
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create a new session and wait for a peer to join.
    Host,
    /// Join an existing session by id.
    Join { session: String },
}

impl Args {
    /// Load Args from the CLI and settings from the TOML file (if it exists).
    /// CLI values override those from the file.
    pub fn load() -> anyhow::Result<(Self, Settings)> {
        let mut cli_args = Args::parse();

        // Resolve relative paths to absolute before any working directory change
        cli_args.store = cli_args.store.map(Self::resolve_path);
        cli_args.out = cli_args.out.map(Self::resolve_path);
        cli_args.data_dir = cli_args.data_dir.map(Self::resolve_path);

        let config_path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.toml"));
        let settings = match Settings::from_file(&config_path)? {
            Some(file) => Self::merge(file, &cli_args),
            None => Self::merge(Settings::default(), &cli_args),
        };

        Ok((cli_args, settings))
    }

    /// Resolve a potentially relative path to an absolute one.
    fn resolve_path(p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir().unwrap_or_default().join(p)
        }
    }

    /// Merge file settings with CLI args (CLI takes precedence).
    fn merge(mut file: Settings, cli: &Args) -> Settings {
        if cli.name.is_some() {
            file.display_name = cli.name.clone();
        }
        if cli.store.is_some() {
            file.store = cli.store.clone();
        }
        if cli.out.is_some() {
            file.out = cli.out.clone();
        }
        file
    }
}
