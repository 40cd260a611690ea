//! activity-sync CLI
//!
//! Command-line interface for running trigger messages

use activity_sync::cli::{Cli, Runner};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level: tracing::Level = match (cli.log_level, cli.verbose) {
        (Some(level), _) => level.into(),
        (None, true) => tracing::Level::DEBUG,
        (None, false) => tracing::Level::INFO,
    };
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let runner = Runner::new(cli);

    if let Err(e) = runner.run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
