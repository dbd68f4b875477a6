//! Command-line interface for replystream
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ordered streaming pipeline for tagged model replies
#[derive(Parser, Debug)]
#[command(
    name = "replystream",
    version,
    about = "Ordered streaming pipeline for tagged model replies"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Override the number of enrichment workers
    #[arg(long, global = true, value_name = "N")]
    pub workers: Option<usize>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a recorded model reply through the pipeline and print reply units as JSON lines
    Replay {
        /// File with the recorded reply, or `-` for stdin
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Fragment size in characters
        #[arg(long, short = 'c', value_name = "CHARS", default_value = "4")]
        chunk_size: usize,

        /// User message echoed on every unit
        #[arg(long, short = 'm', value_name = "TEXT", default_value = "")]
        message: String,

        /// Speaking character's display name
        #[arg(long, value_name = "NAME")]
        speaker: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}

impl Cli {
    /// Log filter directive derived from `-q`/`-v`.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
