//! CLI module
//!
//! Command-line interface for running trigger messages.
//!
//! # Commands
//!
//! - `run` - Run one invocation for a trigger message
//! - `inspect` - Print the checkpoint a message carries
//! - `hash` - Print a synthetic source id

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::{build_adapter, build_source, run_trigger, Runner};
