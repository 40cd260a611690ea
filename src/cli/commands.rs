//! CLI commands and argument parsing

use crate::types::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resumable activity ingestion
#[derive(Parser, Debug)]
#[command(name = "activity-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Engine configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Default log level; `RUST_LOG` still takes precedence per target
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one invocation for a trigger message
    Run {
        /// Trigger message file (JSON)
        #[arg(short, long)]
        message: PathBuf,

        /// Integration store file (JSON); in-memory when omitted
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Append activity operations to this JSONL file
        #[arg(short, long)]
        activities: Option<PathBuf>,

        /// Append continuation messages to this JSONL file
        #[arg(short, long)]
        queue: Option<PathBuf>,
    },

    /// Print the checkpoint carried by a trigger message
    Inspect {
        /// Trigger message file (JSON)
        #[arg(short, long)]
        message: PathBuf,
    },

    /// Print a synthetic source id
    Hash {
        /// Remote member id or username
        member: String,
        /// Activity type
        activity_type: String,
        /// Timestamp as it appears in the record
        timestamp: String,
        /// Platform name
        platform: String,
    },
}
