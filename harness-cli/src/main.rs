//! # flock-harness
//!
//! Command-line driver for fault-injection test sweeps against a
//! SimpleFileLock fleet.
//!
//! ## Commands
//!
//! - `sweep`: Run the full configuration matrix and append the report
//! - `run`: Execute a single run with an explicit shape
//! - `install`: Copy service binaries and workload scripts onto the fleet
//! - `teardown`: Kill every service process on the fleet
//!
//! ## Example
//!
//! ```bash
//! # Push binaries and scripts to a 5-server / 2-client fleet
//! flock-harness install --servers 5 --clients 2 \
//!     --server-dir ./dist/server --client-dir ./dist/client \
//!     --scripts-dir ./workloads
//!
//! # Run the sweep declared in harness.toml
//! flock-harness sweep
//!
//! # One-off run: 2 clients against 5 servers, 2 injected failures
//! flock-harness run --clients 2 --servers 5 --failures 2 \
//!     --scripts StarTrek.cmd,StarWars.cmd
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use flock_harness::config::HarnessConfig;

mod commands;

use commands::{install, run, sweep, teardown};

/// Fault-injection test harness for the SimpleFileLock service.
#[derive(Parser, Debug)]
#[command(name = "flock-harness")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Harness configuration file
    #[arg(long, global = true, default_value = "harness.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full sweep matrix from the configuration file
    Sweep {
        /// Print per-run results as JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },

    /// Execute a single run with an explicit shape
    Run {
        /// Concurrent workload clients
        #[arg(long)]
        clients: usize,

        /// Cluster size
        #[arg(long)]
        servers: usize,

        /// Server processes to kill mid-run
        #[arg(long, default_value_t = 0)]
        failures: usize,

        /// Workload script per client, comma-separated, index-aligned
        #[arg(long, value_delimiter = ',')]
        scripts: Vec<String>,

        /// Print the result as JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },

    /// Copy service binaries and workload scripts onto the fleet
    Install {
        /// Number of server hosts to install to
        #[arg(long)]
        servers: usize,

        /// Number of client hosts to install to
        #[arg(long)]
        clients: usize,

        /// Local directory of server-side files (binaries, consensus config)
        #[arg(long)]
        server_dir: Option<PathBuf>,

        /// Local directory of client-side files (binaries, tools)
        #[arg(long)]
        client_dir: Option<PathBuf>,

        /// Local directory of workload scripts
        #[arg(long)]
        scripts_dir: Option<PathBuf>,
    },

    /// Kill every service process on the fleet
    Teardown {
        /// Number of server hosts to sweep
        #[arg(long)]
        servers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Sweep { json } => {
            sweep::run(&config, json).await?;
        }
        Commands::Run {
            clients,
            servers,
            failures,
            scripts,
            json,
        } => {
            run::run(&config, clients, servers, failures, scripts, json).await?;
        }
        Commands::Install {
            servers,
            clients,
            server_dir,
            client_dir,
            scripts_dir,
        } => {
            install::run(
                &config,
                servers,
                clients,
                server_dir.as_deref(),
                client_dir.as_deref(),
                scripts_dir.as_deref(),
            )
            .await?;
        }
        Commands::Teardown { servers } => {
            teardown::run(&config, servers).await?;
        }
    }

    Ok(())
}

/// Load the harness configuration. A missing file at the default path
/// falls back to built-in defaults; an explicitly named file must exist.
fn load_config(path: &std::path::Path) -> Result<HarnessConfig> {
    if path.exists() {
        return HarnessConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()));
    }
    if path == std::path::Path::new("harness.toml") {
        tracing::warn!("harness.toml not found, using built-in defaults");
        return Ok(HarnessConfig::default());
    }
    anyhow::bail!("config file {} does not exist", path.display());
}
