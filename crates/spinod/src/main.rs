//! spinod — the Spino simulator.
//!
//! Runs a complete Spino cluster inside one process on top of the
//! in-memory substrate, to watch how routing views react to activations
//! and membership churn.
//!
//! # Usage
//!
//! ```text
//! spinod simulate --config spino.toml
//! spinod scaffold > spino.toml
//! ```

mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use spino_core::SpinoConfig;

const DEFAULT_LOG_FILTER: &str = "info,spinod=debug,spino_core=debug,spino_cluster=debug,spino_proxy=debug";

#[derive(Parser)]
#[command(name = "spinod", about = "Spino service-location simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an in-process cluster and print the routing view as it changes.
    Simulate {
        /// Config file. Uses the scaffold config when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print views as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Print a default spino.toml.
    Scaffold,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate { config, json } => {
            let config = match config {
                Some(path) => SpinoConfig::from_file(&path)?,
                None => SpinoConfig::scaffold(),
            };
            simulate::run_simulation(config, json).await
        }
        Command::Scaffold => {
            print!("{}", SpinoConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}
