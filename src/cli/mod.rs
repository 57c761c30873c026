//! Command-line interface definitions.

pub mod check;
pub mod console;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vmgate - admission-control gateway and console relay for hypervisor APIs.
#[derive(Parser, Debug)]
#[command(name = "vmgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a configuration file and print a summary
    Check(ConfigPathArg),

    /// Relay a single console ticket and serve it until the session ends
    Console(ConsoleArgs),
}

/// Shared argument for commands that only need a config path.
#[derive(Parser, Debug)]
pub struct ConfigPathArg {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,
}

/// Arguments for the `console` subcommand.
#[derive(Parser, Debug)]
pub struct ConsoleArgs {
    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Hypervisor host serving the console
    #[arg(long)]
    pub host: String,

    /// Console port on the host
    #[arg(long, default_value = "443")]
    pub port: u16,

    /// Console ticket issued by the management API
    #[arg(long)]
    pub ticket: String,

    /// Override the relay listen address
    #[arg(long)]
    pub listen: Option<String>,

    /// Dial the upstream with ws:// instead of wss://
    #[arg(long)]
    pub plain: bool,

    /// Override log level (debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}
