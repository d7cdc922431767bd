//! Database Connection Firewall
//!
//! A TCP relay that sits in front of a database server and decides, per
//! incoming connection, whether the client may reach the backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                 DB FIREWALL                  │
//!                     │                                              │
//!     Client          │  ┌──────────┐   ┌───────────┐   ┌─────────┐  │
//!     ────────────────┼─▶│   net    │──▶│ security  │──▶│  relay  │──┼──▶ Database
//!                     │  │ listener │   │ admission │   │ session │  │
//!                     │  └──────────┘   └───────────┘   └─────────┘  │
//!                     │                                              │
//!                     │  ┌────────────────────────────────────────┐  │
//!                     │  │          Cross-Cutting Concerns        │  │
//!                     │  │  config · observability · lifecycle    │  │
//!                     │  └────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use db_firewall::config::watcher::ConfigWatcher;
use db_firewall::config::{load_config, resolve_config_path};
use db_firewall::lifecycle::shutdown_signal;
use db_firewall::observability::{logging, metrics};
use db_firewall::{Listener, Shutdown};

#[derive(Parser)]
#[command(name = "db-firewall")]
#[command(about = "Connection firewall for database servers", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = load_config(&config_path)?;

    if cli.check {
        println!("{}: configuration OK", config_path.display());
        return Ok(());
    }

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "db-firewall starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config).await?;

    let (watcher, config_updates) = ConfigWatcher::new(&config_path);
    // Dropping the notify handle stops delivery, so it lives until main returns.
    let _watch_guard = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let shutdown = Shutdown::new();
    let mut accept_loop = tokio::spawn(listener.run(config_updates, shutdown.subscribe()));

    tokio::select! {
        () = shutdown_signal() => {
            shutdown.trigger();
            accept_loop.await??;
        }
        joined = &mut accept_loop => joined??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
