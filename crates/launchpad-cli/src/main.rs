// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod commands;
mod format;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "launchpad", version, about = "Launchpad service supervisor for end-to-end tests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate an options file and show the resolved launch.
    Check {
        /// TOML options file.
        #[arg(long, default_value = "launchpad.toml")]
        config: PathBuf,

        /// Build the coverage-tool command line.
        #[arg(long)]
        cover: bool,

        /// Print the resolved config as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the service and keep it up until Ctrl-C.
    Up {
        /// TOML options file.
        #[arg(long, default_value = "launchpad.toml")]
        config: PathBuf,

        /// Build the coverage-tool command line.
        #[arg(long)]
        cover: bool,

        /// Print the exit report as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("launchpad=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("launchpad=info"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Check {
            config,
            cover,
            json,
        } => commands::check(&config, cover, json),
        Commands::Up {
            config,
            cover,
            json,
        } => commands::up(&config, cover, json).await,
    }
}
