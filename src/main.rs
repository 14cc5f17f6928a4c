//! worldsync host process.
//!
//! # Architecture Overview
//!
//! ```text
//!   producers ──send──▶ ┌──────────────┐ ──drain──▶ ┌───────────┐ ──▶ NonceGuard ──▶ Sequencer
//!                       │MessageBatcher│            │ Submitter │     (file store)
//!                       └──────────────┘            │(loop actor)│
//!                                                   └─────▲─────┘
//!   SIGINT/SIGTERM ──▶ shutdown_all() ──request/ack──────┤
//!                                     ──request/ack──▶ server actor
//!
//!   StageRegister: PreStart → Starting → Running → ShuttingDown → ShutDown
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use worldsync::config::{load_config, WorldsyncConfig};
use worldsync::lifecycle::{wait_for_signal, Actor, ShutdownCoordinator, Stage, StageRegister};
use worldsync::nonce::{FileNonceStore, NonceGuard};
use worldsync::observability::{logging, metrics};
use worldsync::submission::{ChainMessage, LoggingSequencer, Submitter};
use worldsync::MessageBatcher;

#[derive(Parser)]
#[command(name = "worldsync")]
#[command(about = "Coordinates a world tick loop with a chain sequencer", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => WorldsyncConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability);
    tracing::info!("worldsync v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let stage = StageRegister::global();
    if let Err(observed) = stage.transition(Stage::PreStart, Stage::Starting) {
        return Err(format!("world already started (stage: {})", observed).into());
    }

    let coordinator = ShutdownCoordinator::new(&config.shutdown, Arc::clone(&stage))?;

    let batcher = Arc::new(MessageBatcher::<ChainMessage>::from_config(&config.batcher));
    let store = Arc::new(FileNonceStore::open(&config.nonce.store_path).await?);
    let guard = Arc::new(NonceGuard::new(store, config.nonce.namespace.clone())?);
    let submitter = Arc::new(Submitter::new(
        Arc::clone(&batcher),
        guard,
        Arc::new(LoggingSequencer),
    ));

    tracing::info!(
        namespace = %config.nonce.namespace,
        store_path = %config.nonce.store_path,
        server_timeout_secs = config.shutdown.server_timeout_secs,
        loop_timeout_secs = config.shutdown.loop_timeout_secs,
        "Configuration loaded"
    );

    let loop_actor = tokio::spawn(submitter.run(coordinator.clone(), config.submission.interval()));
    let server_actor = tokio::spawn(run_server_actor(coordinator.clone(), Arc::clone(&stage)));

    match stage.transition(Stage::Starting, Stage::Running) {
        Ok(()) => tracing::info!("World running"),
        Err(observed) => tracing::warn!(stage = %observed, "World did not enter running stage"),
    }

    let signal = wait_for_signal().await?;
    tracing::info!(signal = ?signal, pending = batcher.len(), "Shutdown signal received");

    if !coordinator.shutdown_all().await {
        tracing::error!(stage = %stage.load(), "Shutdown did not complete in time");
        return Err("shutdown handshake failed".into());
    }

    if let Ok(Err(e)) = loop_actor.await {
        tracing::error!(error = %e, "Loop actor reported a shutdown error");
    }
    server_actor.await.ok();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Stand-in for the API server: stops admitting work when asked.
async fn run_server_actor(coordinator: ShutdownCoordinator, stage: Arc<StageRegister>) {
    loop {
        let handled = coordinator
            .handle_shutdown(Actor::Server, coordinator.poll_interval(), || async {
                tracing::info!(stage = %stage.load(), "Server no longer admitting requests");
                Ok::<(), Infallible>(())
            })
            .await;

        match handled {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Server cleanup failed");
                return;
            }
        }
    }
}
