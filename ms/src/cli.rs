//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// masterstore - lock-guarded master state
#[derive(Parser, Debug)]
#[command(
    name = "ms",
    author,
    version,
    about = "Lock-guarded durable state store for singleton masters",
    after_help = "Logs are written to: ~/.local/share/masterstore/logs/masterstore.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Acquire the lock and save a file (stdin when omitted) as the state
    Save {
        /// File holding the payload
        file: Option<PathBuf>,
    },

    /// Acquire the lock and print the saved state
    Load {
        /// Write the state to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Acquire the lock and hold it until interrupted
    Hold,
}
