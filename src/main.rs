//! keygate - Runtime-mutable security state and cached artifacts
//!
//! This is the main entry point for the keygate application.

use clap::Parser;
use tokio::signal;
use tracing::info;

use keygate::config::Config;
use keygate::server::{AppState, Server};
use keygate::telemetry::init_tracing;

/// keygate - API key gate with lockout and a cached API document
#[derive(Parser, Debug)]
#[command(name = "keygate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "KEYGATE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting keygate");

    let state = AppState::from_config(&config);
    info!(
        auth_enabled = config.auth.enabled,
        strategy = ?config.auth.strategy,
        keys = config.auth.keys.len(),
        "Authenticator initialized"
    );

    state.tracker.spawn_sweeper();
    info!(
        max_attempts = config.lockout.max_attempts,
        lockout_secs = config.lockout.lockout_duration_secs,
        sweep_interval_secs = config.lockout.sweep_interval_secs,
        "Lockout tracker started"
    );

    info!(
        ttl_secs = config.document.ttl_secs,
        resources = config.document.resources.len(),
        "API document cache initialized"
    );

    let tracker = state.tracker.clone();

    // Create and start the HTTP server
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    // Stop the background sweep before exiting
    tracker.shutdown().await;

    info!("keygate shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
