//! `tandem-node` command line.

use std::{io::Write, path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use tandem_node::{DemoConfig, demo};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Two-party state channel node
#[derive(Parser, Debug)]
#[command(name = "tandem-node", version, about)]
struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run SETUP, INSTALL, UPDATEs and UNINSTALL between two in-process parties
    Demo {
        /// How long WAIT suspends before a round fails (milliseconds)
        #[arg(long, default_value_t = 30_000)]
        wait_timeout_ms: u64,

        /// Persist each party's channels to redb files in this directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seed for party keys and the channel id
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Number of UPDATE rounds
        #[arg(long, default_value_t = 5)]
        moves: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Demo { wait_timeout_ms, data_dir, seed, moves } => {
            let config = DemoConfig {
                wait_timeout: Duration::from_millis(wait_timeout_ms),
                seed,
                moves,
                data_dir,
                ..DemoConfig::default()
            };
            match demo::run(&config).await {
                Ok(report) => {
                    let mut out = std::io::stdout().lock();
                    if let Err(e) = writeln!(out, "{report}") {
                        error!(error = %e, "failed to write report");
                        return ExitCode::FAILURE;
                    }
                    ExitCode::SUCCESS
                },
                Err(e) => {
                    error!(error = %e, "demo failed");
                    ExitCode::FAILURE
                },
            }
        },
    }
}
