//! fleetd — the fleet controller daemon.
//!
//! Single binary that assembles the control plane:
//! - Instance store (redb)
//! - Provisioning client (HTTP + bearer token)
//! - Routing table
//! - Heartbeat listener (JSON lines over TCP)
//! - Reconciliation + autoscaling loop
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetd/fleetd.toml
//! ```

mod config;
mod listener;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleet_controller::{CapacityGauge, FleetController};
use fleet_provision::HttpProvisioner;
use fleet_routing::InProcessRouting;
use fleet_state::InstanceStore;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet controller daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "/etc/fleetd/fleetd.toml")]
        config: PathBuf,

        /// Override the configured data directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug,fleet=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, data_dir } => {
            let mut cfg = Config::load(&config)?;
            if let Some(dir) = data_dir {
                cfg.data_dir = dir;
            }
            run(cfg).await
        }
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    info!("fleet controller daemon starting");

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = cfg.data_dir.join("fleet.redb");
    let store = InstanceStore::open(&db_path)?;
    info!(path = ?db_path, "instance store opened");

    let provisioner = Arc::new(HttpProvisioner::new(
        &cfg.provisioner.base_url,
        cfg.provisioner.token.clone(),
        Duration::from_secs(cfg.provisioner.timeout_secs),
    ));
    let routing = Arc::new(InProcessRouting::new());
    let (gauge, mut capacity_rx) = CapacityGauge::new(cfg.controller.capacity_floor);

    let controller = Arc::new(FleetController::new(
        store,
        provisioner,
        routing,
        Arc::new(gauge),
        cfg.controller.clone(),
    ));
    controller.sync_static_roster(&cfg.static_instances)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    // Capacity observer: logs the published aggregate as it changes.
    tokio::spawn(async move {
        while capacity_rx.changed().await.is_ok() {
            let total = *capacity_rx.borrow_and_update();
            info!(total, "aggregate capacity updated");
        }
    });

    // Heartbeat listener.
    let hb_listener = tokio::net::TcpListener::bind(&cfg.heartbeat_bind).await?;
    info!(addr = %cfg.heartbeat_bind, "heartbeat listener bound");
    let listener_handle = tokio::spawn(listener::run(
        hb_listener,
        Arc::clone(&controller),
        shutdown_rx.clone(),
    ));

    // Reconciliation loop.
    let controller_handle = {
        let controller = Arc::clone(&controller);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { controller.run(shutdown).await })
    };

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = controller_handle.await;
    let _ = listener_handle.await;

    info!("fleet controller daemon stopped");
    Ok(())
}
